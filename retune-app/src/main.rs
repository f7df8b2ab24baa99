//! Retune - real-time pitch correction
//!
//! Console host: default input device in, corrected signal out, with a
//! line-based control plane on stdin.

mod commands;
mod config;

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use tracing_subscriber::EnvFilter;

use commands::{parse_command, ControlCommand, HELP_TEXT};
use config::Config;
use retune_analysis::{note_name, NOTE_NAMES};
use retune_audio::{AutoTuneEngine, EngineConfig, EngineEvent, EngineHandle, StatusReport};

/// Default engine chunk when the device buffer size is not fixed
const DEFAULT_MAX_BLOCK: usize = 1024;

/// Mono scratch for one callback (frames)
const CALLBACK_SCRATCH: usize = 16384;

/// Input-to-output FIFO length (seconds)
const FIFO_SECONDS: f32 = 0.25;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = Config::load();
    tracing::debug!(?config, path = %Config::config_path().display(), "config loaded");

    // Shutdown flag
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_audio = shutdown.clone();

    // Audio streams live on their own thread; the engine handle comes back
    let (ready_tx, ready_rx) = bounded(1);
    let audio_config = config.clone();
    let audio_handle = thread::spawn(move || {
        if let Err(e) = run_audio_thread(&audio_config, ready_tx.clone(), shutdown_audio) {
            let _ = ready_tx.try_send(Err(e));
        }
    });

    let handle = match ready_rx.recv() {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => {
            let _ = audio_handle.join();
            return Err(e.context("audio setup failed"));
        }
        Err(_) => {
            let _ = audio_handle.join();
            return Err(anyhow!("audio thread exited during setup"));
        }
    };

    let result = run_console(&mut config, handle);

    // Cleanup
    shutdown.store(true, Ordering::SeqCst);
    let _ = audio_handle.join();

    result
}

/// Engine when construction succeeded, plain copy otherwise
enum Processor {
    Engine(Box<AutoTuneEngine>),
    Passthrough,
}

impl Processor {
    #[inline]
    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        match self {
            Processor::Engine(engine) => engine.process(input, output),
            Processor::Passthrough => output.copy_from_slice(input),
        }
    }
}

fn run_audio_thread(
    config: &Config,
    ready_tx: Sender<anyhow::Result<Option<EngineHandle>>>,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    // Get audio host and devices
    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .context("no audio input device found")?;
    let output_device = host
        .default_output_device()
        .context("no audio output device found")?;

    let input_supported = input_device
        .default_input_config()
        .context("failed to get input config")?;
    let output_supported = output_device
        .default_output_config()
        .context("failed to get output config")?;

    let sample_rate = input_supported.sample_rate().0;
    let in_channels = input_supported.channels() as usize;
    let out_channels = output_supported.channels() as usize;
    let buffer_size = match config.block_size {
        Some(frames) => cpal::BufferSize::Fixed(frames),
        None => cpal::BufferSize::Default,
    };

    let input_config = cpal::StreamConfig {
        channels: input_supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: buffer_size.clone(),
    };
    // Output runs at the input rate so one engine serves both
    let output_config = cpal::StreamConfig {
        channels: output_supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size,
    };

    tracing::info!(
        input = %input_device.name().unwrap_or_else(|_| "unknown".into()),
        output = %output_device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        in_channels,
        out_channels,
        "audio devices selected"
    );

    // Create the engine, falling back to pass-through
    let max_block_size = config
        .block_size
        .map(|frames| frames as usize)
        .unwrap_or(DEFAULT_MAX_BLOCK);
    let engine_config = EngineConfig {
        max_block_size,
        initial: config.correction_config(),
        ..EngineConfig::for_sample_rate(sample_rate)
    };
    let (mut processor, handle) = match AutoTuneEngine::new(engine_config) {
        Ok((engine, handle)) => (Processor::Engine(Box::new(engine)), Some(handle)),
        Err(e) => {
            tracing::error!("correction engine unavailable, passing audio through: {}", e);
            (Processor::Passthrough, None)
        }
    };

    // Input callback -> FIFO -> output callback
    let fifo_len = ((sample_rate as f32 * FIFO_SECONDS) as usize).max(CALLBACK_SCRATCH);
    let (mut producer, mut consumer) = HeapRb::<f32>::new(fifo_len).split();

    // Pre-allocate conversion buffers (avoid allocation in audio callbacks)
    let mut mono_in = vec![0.0f32; CALLBACK_SCRATCH];
    let mut block_in = vec![0.0f32; CALLBACK_SCRATCH];
    let mut block_out = vec![0.0f32; CALLBACK_SCRATCH];

    let input_stream = input_device.build_input_stream(
        &input_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for frames in data.chunks(CALLBACK_SCRATCH * in_channels) {
                let n = frames.len() / in_channels;
                let mono = &mut mono_in[..n];
                for (m, frame) in mono.iter_mut().zip(frames.chunks_exact(in_channels)) {
                    *m = frame.iter().sum::<f32>() / in_channels as f32;
                }
                // Overrun drops the newest samples
                producer.push_slice(mono);
            }
        },
        |err| {
            tracing::error!("audio input stream error: {}", err);
        },
        None,
    )?;

    let output_stream = output_device.build_output_stream(
        &output_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frames in data.chunks_mut(CALLBACK_SCRATCH * out_channels) {
                let n = frames.len() / out_channels;
                let input = &mut block_in[..n];
                let got = consumer.pop_slice(input);
                // Underrun: pad with silence
                input[got..].fill(0.0);

                let output = &mut block_out[..n];
                processor.process(input, output);

                for (frame, &sample) in frames.chunks_exact_mut(out_channels).zip(output.iter()) {
                    frame.fill(sample);
                }
            }
        },
        |err| {
            tracing::error!("audio output stream error: {}", err);
        },
        None,
    )?;

    input_stream.play().context("failed to start input stream")?;
    output_stream.play().context("failed to start output stream")?;

    if ready_tx.send(Ok(handle)).is_err() {
        return Ok(());
    }

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(20));
    }

    Ok(())
}

/// Read commands from stdin until quit or end of input
fn run_console(config: &mut Config, mut handle: Option<EngineHandle>) -> anyhow::Result<()> {
    let (line_tx, line_rx) = bounded::<String>(16);
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("retune ready; type 'help' for commands");
    let tick = Duration::from_millis(config.status_interval_ms);

    loop {
        match line_rx.recv_timeout(tick) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(ControlCommand::Quit) => break,
                    Ok(cmd) => handle_command(config, handle.as_mut(), cmd)?,
                    Err(e) => println!("{}", e),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(handle) = handle.as_mut() {
                    if let Some(report) = handle.latest_status() {
                        print!("\r{}\x1b[K", format_status(&report));
                        io::stdout().flush()?;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Some(handle) = handle.as_ref() {
            log_events(handle);
        }
    }

    println!();
    Ok(())
}

fn handle_command(
    config: &mut Config,
    handle: Option<&mut EngineHandle>,
    cmd: ControlCommand,
) -> anyhow::Result<()> {
    match cmd {
        ControlCommand::Help => {
            println!("{}", HELP_TEXT);
            return Ok(());
        }
        ControlCommand::SaveConfig => {
            if let Some(handle) = handle.as_ref() {
                config.set_correction(&handle.params());
            }
            let path = config.save().context("failed to save config")?;
            println!("saved {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let Some(handle) = handle else {
        println!("correction engine unavailable (pass-through)");
        return Ok(());
    };

    match cmd {
        ControlCommand::SetRootKey(key) => {
            handle.set_root_key(key);
            println!("key {}", NOTE_NAMES[key as usize % 12]);
        }
        ControlCommand::SetScale(scale) => {
            handle.set_scale(scale);
            println!("scale {}", scale);
        }
        ControlCommand::SetRetuneSpeed(speed) => {
            handle.set_retune_speed(speed);
            println!("speed {:.2}", speed);
        }
        ControlCommand::SetAmount(amount) => {
            handle.set_amount(amount);
            println!("amount {:.2}", amount);
        }
        ControlCommand::SetHumanize(humanize) => {
            handle.set_humanize(humanize);
            println!("humanize {:.2}", humanize);
        }
        ControlCommand::SetFormantShift(shift) => {
            handle.set_formant_shift(shift);
            println!("formant {:.2} (stored, no audible effect)", shift);
        }
        ControlCommand::SetBypass(bypass) => {
            handle.set_bypass(bypass);
            println!("bypass {}", if bypass { "on" } else { "off" });
        }
        ControlCommand::ToggleBypass => {
            let bypass = handle.toggle_bypass();
            println!("bypass {}", if bypass { "on" } else { "off" });
        }
        ControlCommand::Rearm => {
            if handle.is_disabled() {
                handle.rearm();
                println!("re-arming");
            } else {
                println!("engine is running");
            }
        }
        ControlCommand::ShowStatus => {
            let params = handle.params();
            println!(
                "key {} | scale {} | speed {:.2} | amount {:.2} | humanize {:.2} | bypass {}",
                NOTE_NAMES[params.root_key as usize % 12],
                params.scale,
                params.retune_speed,
                params.amount,
                params.humanize,
                if params.bypass { "on" } else { "off" },
            );
            match handle.latest_status() {
                Some(report) => println!("{}", format_status(&report)),
                None => println!("no pitch data yet"),
            }
        }
        ControlCommand::Help | ControlCommand::SaveConfig | ControlCommand::Quit => {}
    }

    Ok(())
}

fn log_events(handle: &EngineHandle) {
    for event in handle.poll_events() {
        match event {
            EngineEvent::Fault(kind) => {
                tracing::warn!(?kind, "block fault, dry signal substituted");
            }
            EngineEvent::Disabled { consecutive_faults } => {
                tracing::error!(
                    consecutive_faults,
                    "correction disabled, passing audio through; type 'rearm' to retry"
                );
            }
            EngineEvent::Recovered => tracing::info!("correction re-armed"),
        }
    }
}

/// One-line status display
fn format_status(report: &StatusReport) -> String {
    if report.detected_pitch <= 0.0 {
        return format!("-- no pitch -- | ratio {:.3}", report.ratio);
    }

    let detected = note_name(report.detected_pitch).unwrap_or_else(|| "?".into());
    let target = note_name(report.target_pitch).unwrap_or_else(|| "?".into());
    format!(
        "in {:7.2} Hz {:<4} -> {:7.2} Hz {:<4} | {:+6.1} cents | conf {:.2} | ratio {:.3}",
        report.detected_pitch,
        detected,
        report.target_pitch,
        target,
        report.correction_cents,
        report.confidence,
        report.ratio
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status() {
        let line = format_status(&StatusReport {
            detected_pitch: 466.0,
            target_pitch: 440.0,
            correction_cents: 99.6,
            confidence: 0.97,
            ratio: 0.944,
        });
        assert!(line.contains("A#4"), "{}", line);
        assert!(line.contains("A4"), "{}", line);
        assert!(line.contains("+99.6"), "{}", line);
    }

    #[test]
    fn test_format_no_pitch() {
        let line = format_status(&StatusReport::default());
        assert!(line.contains("no pitch"));
    }

    #[test]
    fn test_passthrough_processor() {
        let mut processor = Processor::Passthrough;
        let input = [0.1, -0.2, 0.3];
        let mut output = [0.0; 3];
        processor.process(&input, &mut output);
        assert_eq!(input, output);
    }
}
