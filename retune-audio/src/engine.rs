//! Correction engine - orchestrates detection, retargeting, shifting and mixing
//!
//! `AutoTuneEngine` lives on the audio thread. `EngineHandle` is its control
//! side: it publishes parameter snapshots, reads status telemetry and engine
//! events, and can re-arm the engine after it disabled itself.

use crate::correction::{Humanizer, RatioSmoother};
use crate::effect::Effect;
use crate::mixer::{self, Mixer};
use crate::params::{CorrectionConfig, ParamStore};
use crate::shifter::PitchShifter;
use crate::status::{status_channel, StatusReceiver, StatusReport, StatusSender, STATUS_CAPACITY};
use crossbeam_channel::{bounded, Receiver, Sender};
use retune_analysis::{
    map_to_scale, DetectorConfig, DetectorError, PitchDetector, PitchEstimate, PitchStabilizer,
    Scale, TargetPitch,
};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use thiserror::Error;

/// Supported sample rates (Hz)
pub const SAMPLE_RATE_RANGE: std::ops::RangeInclusive<u32> = 8_000..=384_000;

/// Samples between status reports
pub const DEFAULT_STATUS_INTERVAL: usize = 512;

/// Consecutive faulted blocks before the engine disables itself
pub const MAX_CONSECUTIVE_FAULTS: u32 = 3;

/// Event channel depth
const EVENT_CAPACITY: usize = 32;

thread_local! {
    /// Set while a block runs under `catch_unwind`
    static IN_GUARDED_BLOCK: Cell<bool> = const { Cell::new(false) };
}

static QUIET_PANIC_HOOK: Once = Once::new();

/// Wrap the panic hook so panics caught by a guarded block print nothing
///
/// Panics anywhere else still reach the previously installed hook.
fn install_quiet_panic_hook() {
    QUIET_PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !IN_GUARDED_BLOCK.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// `catch_unwind` with the panic hook silenced on this thread
fn run_guarded<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    IN_GUARDED_BLOCK.with(|flag| flag.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    IN_GUARDED_BLOCK.with(|flag| flag.set(false));
    result
}

/// Engine construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("unsupported sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    #[error("invalid maximum block size: {0}")]
    InvalidBlockSize(usize),
    #[error("invalid status interval: {0}")]
    InvalidStatusInterval(usize),
    #[error(transparent)]
    Detector(#[from] DetectorError),
}

/// Construction settings, fixed for the engine's lifetime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Largest chunk processed at once; longer blocks are split
    pub max_block_size: usize,
    pub detector: DetectorConfig,
    /// Samples between status reports
    pub status_interval: usize,
    /// Parameters in effect before the control plane changes anything
    pub initial: CorrectionConfig,
}

impl EngineConfig {
    /// Defaults sized for `sample_rate`
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            max_block_size: 1024,
            detector: DetectorConfig::for_sample_rate(sample_rate),
            status_interval: DEFAULT_STATUS_INTERVAL,
            initial: CorrectionConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_sample_rate(48_000)
    }
}

/// What went wrong inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The DSP chain panicked
    Panic,
    /// The mixed output contained NaN or infinity
    NonFiniteOutput,
}

/// Events sent from the audio thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A block was replaced with the dry signal
    Fault(FaultKind),
    /// Too many consecutive faults; passing audio through until re-armed
    Disabled { consecutive_faults: u32 },
    /// Re-armed after being disabled
    Recovered,
}

/// Flags shared between the engine and its handle
#[derive(Debug, Default)]
struct EngineShared {
    disabled: AtomicBool,
    rearm: AtomicBool,
}

/// Real-time pitch corrector (held in the audio thread)
pub struct AutoTuneEngine {
    sample_rate: u32,
    max_block_size: usize,
    status_interval: usize,
    params: ParamStore,
    detector: PitchDetector,
    stabilizer: PitchStabilizer,
    smoother: RatioSmoother,
    humanizer: Humanizer,
    shifter: PitchShifter,
    mixer: Mixer,
    /// Sanitized copy of the current chunk
    dry: Vec<f32>,
    /// Shifter output for the current chunk
    wet: Vec<f32>,
    /// Input copy for in-place processing
    inplace: Vec<f32>,
    last_estimate: PitchEstimate,
    last_target: Option<TargetPitch>,
    applied_ratio: f32,
    samples_since_status: usize,
    status_tx: StatusSender,
    event_tx: Sender<EngineEvent>,
    shared: Arc<EngineShared>,
    consecutive_faults: u32,
    disabled: bool,
    #[cfg(test)]
    inject_panic: bool,
}

impl AutoTuneEngine {
    /// Build an engine and its control handle
    ///
    /// All buffers are allocated here; `process` never allocates.
    pub fn new(config: EngineConfig) -> Result<(Self, EngineHandle), EngineError> {
        if !SAMPLE_RATE_RANGE.contains(&config.sample_rate) {
            return Err(EngineError::InvalidSampleRate(config.sample_rate));
        }
        if config.max_block_size == 0 {
            return Err(EngineError::InvalidBlockSize(config.max_block_size));
        }
        if config.status_interval == 0 {
            return Err(EngineError::InvalidStatusInterval(config.status_interval));
        }

        let detector = PitchDetector::new(config.sample_rate, config.detector)?;
        install_quiet_panic_hook();
        let params = ParamStore::new(config.initial);
        let initial = params.load();
        let (status_tx, status_rx) = status_channel(STATUS_CAPACITY);
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let shared = Arc::new(EngineShared::default());

        tracing::info!(
            sample_rate = config.sample_rate,
            max_block_size = config.max_block_size,
            window = config.detector.window_size,
            scale = %initial.scale,
            root_key = initial.root_key,
            "correction engine ready"
        );

        let engine = Self {
            sample_rate: config.sample_rate,
            max_block_size: config.max_block_size,
            status_interval: config.status_interval,
            params: params.clone(),
            detector,
            stabilizer: PitchStabilizer::new(),
            smoother: RatioSmoother::new(),
            humanizer: Humanizer::new(config.sample_rate as f32),
            shifter: PitchShifter::new(config.sample_rate),
            mixer: Mixer::new(initial.amount),
            dry: vec![0.0; config.max_block_size],
            wet: vec![0.0; config.max_block_size],
            inplace: vec![0.0; config.max_block_size],
            last_estimate: PitchEstimate::NONE,
            last_target: None,
            applied_ratio: 1.0,
            samples_since_status: 0,
            status_tx,
            event_tx,
            shared: Arc::clone(&shared),
            consecutive_faults: 0,
            disabled: false,
            #[cfg(test)]
            inject_panic: false,
        };

        let handle = EngineHandle {
            params,
            status_rx,
            event_rx,
            shared,
            sample_rate: config.sample_rate,
        };

        Ok((engine, handle))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Ratio the smoother is gliding towards
    pub fn target_ratio(&self) -> f32 {
        self.smoother.target()
    }

    /// Smoothed ratio before humanizing
    pub fn current_ratio(&self) -> f32 {
        self.smoother.current()
    }

    /// Ratio applied to the last block
    pub fn applied_ratio(&self) -> f32 {
        self.applied_ratio
    }

    /// Stabilized input pitch
    pub fn stable_pitch(&self) -> Option<f32> {
        self.stabilizer.stable_pitch()
    }

    /// Latest raw detector output
    pub fn last_estimate(&self) -> PitchEstimate {
        self.last_estimate
    }

    /// Latest scale target
    pub fn last_target(&self) -> Option<TargetPitch> {
        self.last_target
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Process one block; `output` must be at least as long as `input`
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let len = input.len().min(output.len());
        let (input, output) = (&input[..len], &mut output[..len]);

        self.check_rearm();
        let params = self.params.load();

        if params.bypass {
            mixer::bypass(input, output);
            self.keep_warm(input);
            return;
        }

        if self.disabled {
            mixer::sanitized_copy(input, output);
            self.keep_warm(input);
            return;
        }

        let chunk = self.max_block_size;
        for (inp, out) in input.chunks(chunk).zip(output.chunks_mut(chunk)) {
            self.process_guarded(inp, out, &params);
            if self.disabled {
                break;
            }
        }
    }

    /// Feed analysis and shifter history without producing output
    fn keep_warm(&mut self, input: &[f32]) {
        self.detector.feed(input);
        self.shifter.feed(input);
    }

    fn check_rearm(&mut self) {
        if !self.shared.rearm.swap(false, Ordering::AcqRel) || !self.disabled {
            return;
        }
        self.disabled = false;
        self.consecutive_faults = 0;
        self.shared.disabled.store(false, Ordering::Release);
        self.reset_dsp();
        let _ = self.event_tx.try_send(EngineEvent::Recovered);
    }

    /// Run one chunk, falling back to the dry signal on a fault
    ///
    /// A caught panic prints nothing, so the audio thread never blocks on
    /// stderr. The fault is reported through `EngineEvent::Fault` instead.
    fn process_guarded(&mut self, input: &[f32], output: &mut [f32], params: &CorrectionConfig) {
        let result = run_guarded(|| self.process_chunk(input, output, params));

        let fault = match result {
            Ok(true) => None,
            Ok(false) => Some(FaultKind::NonFiniteOutput),
            Err(_) => Some(FaultKind::Panic),
        };

        match fault {
            None => {
                self.consecutive_faults = 0;
                self.post_status(input.len());
            }
            Some(kind) => self.handle_fault(kind, input, output),
        }
    }

    /// The correction chain; returns false if the output is not finite
    fn process_chunk(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        params: &CorrectionConfig,
    ) -> bool {
        #[cfg(test)]
        if self.inject_panic {
            panic!("injected fault");
        }

        let n = input.len();
        let dry = &mut self.dry[..n];
        mixer::sanitized_copy(input, dry);

        // Analysis: every hop boundary updates the stabilizer
        let stabilizer = &mut self.stabilizer;
        let last_estimate = &mut self.last_estimate;
        self.detector.push(dry, |estimate| {
            *last_estimate = estimate;
            stabilizer.update(estimate);
        });

        // Retarget every block so parameter changes apply immediately
        if let Some(pitch) = self.stabilizer.stable_pitch() {
            self.shifter.set_source_pitch(pitch);
            self.last_target =
                map_to_scale(pitch, params.root_key, params.scale, params.retune_speed);
            match self.last_target {
                Some(target) => self.smoother.set_target(target.frequency, pitch),
                None => self.smoother.set_target_ratio(1.0),
            }
        }

        let ratio = self.smoother.step(params.retune_speed);
        let ratio = self.humanizer.apply(ratio, params.humanize, n);
        self.applied_ratio = ratio;

        let wet = &mut self.wet[..n];
        self.shifter.process(&self.dry[..n], wet, ratio);

        self.mixer.set_amount(params.amount);
        self.mixer.mix(&self.dry[..n], &self.wet[..n], output)
    }

    fn handle_fault(&mut self, kind: FaultKind, input: &[f32], output: &mut [f32]) {
        mixer::sanitized_copy(input, output);
        self.reset_dsp();
        self.consecutive_faults += 1;
        let _ = self.event_tx.try_send(EngineEvent::Fault(kind));

        if self.consecutive_faults >= MAX_CONSECUTIVE_FAULTS {
            self.disabled = true;
            self.shared.disabled.store(true, Ordering::Release);
            let _ = self.event_tx.try_send(EngineEvent::Disabled {
                consecutive_faults: self.consecutive_faults,
            });
        }
    }

    /// Clear all DSP state (no allocation)
    fn reset_dsp(&mut self) {
        self.detector.reset();
        self.stabilizer.reset();
        self.smoother.reset();
        self.humanizer.reset();
        self.shifter.reset();
        self.mixer.reset();
        self.last_estimate = PitchEstimate::NONE;
        self.last_target = None;
        self.applied_ratio = 1.0;
        self.samples_since_status = 0;
    }

    fn post_status(&mut self, processed: usize) {
        self.samples_since_status += processed;
        if self.samples_since_status < self.status_interval {
            return;
        }
        self.samples_since_status %= self.status_interval;

        let report = StatusReport {
            detected_pitch: self.stabilizer.stable_pitch().unwrap_or(0.0),
            target_pitch: self.last_target.map_or(0.0, |t| t.frequency),
            correction_cents: self.last_target.map_or(0.0, |t| t.cents),
            confidence: self.last_estimate.confidence,
            ratio: self.applied_ratio,
        };
        self.status_tx.send(report);
    }
}

impl Effect for AutoTuneEngine {
    fn process(&mut self, samples: &mut [f32]) {
        let mut scratch = std::mem::take(&mut self.inplace);
        let chunk = scratch.len().max(1);
        for block in samples.chunks_mut(chunk) {
            let n = block.len();
            scratch[..n].copy_from_slice(block);
            AutoTuneEngine::process(self, &scratch[..n], block);
        }
        self.inplace = scratch;
    }

    fn reset(&mut self) {
        self.reset_dsp();
    }

    fn is_enabled(&self) -> bool {
        !self.params.load().bypass
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.params.update(|c| c.bypass = !enabled);
    }

    fn name(&self) -> &'static str {
        "Auto-Tune"
    }
}

/// Control-side handle to a running engine
pub struct EngineHandle {
    params: ParamStore,
    status_rx: StatusReceiver,
    event_rx: Receiver<EngineEvent>,
    shared: Arc<EngineShared>,
    sample_rate: u32,
}

impl EngineHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current parameter snapshot
    pub fn params(&self) -> CorrectionConfig {
        self.params.load()
    }

    /// Replace every parameter at once
    pub fn apply(&self, config: CorrectionConfig) {
        if config.formant_shift != 0.0 {
            warn_formant_inert(config.formant_shift);
        }
        self.params.store(config);
    }

    /// Read-modify-write the parameters
    pub fn update<F: Fn(&mut CorrectionConfig)>(&self, f: F) -> CorrectionConfig {
        self.params.update(f)
    }

    pub fn set_root_key(&self, root_key: u8) {
        let root_key = root_key % 12;
        self.params.update(|c| c.root_key = root_key);
        tracing::debug!(root_key, "root key set");
    }

    pub fn set_scale(&self, scale: Scale) {
        self.params.update(|c| c.scale = scale);
        tracing::debug!(%scale, "scale set");
    }

    /// 0.0 = robotic, 1.0 = natural glide
    pub fn set_retune_speed(&self, speed: f32) {
        let config = self.params.update(|c| c.retune_speed = speed);
        tracing::debug!(speed = config.retune_speed, "retune speed set");
    }

    /// Dry/wet blend
    pub fn set_amount(&self, amount: f32) {
        let config = self.params.update(|c| c.amount = amount);
        tracing::debug!(amount = config.amount, "amount set");
    }

    pub fn set_humanize(&self, humanize: f32) {
        let config = self.params.update(|c| c.humanize = humanize);
        tracing::debug!(humanize = config.humanize, "humanize set");
    }

    /// Stored only; the shifter does not preserve or move formants
    pub fn set_formant_shift(&self, shift: f32) {
        let config = self.params.update(|c| c.formant_shift = shift);
        if config.formant_shift != 0.0 {
            warn_formant_inert(config.formant_shift);
        }
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.params.update(|c| c.bypass = bypass);
        tracing::info!(bypass, "bypass set");
    }

    /// Flip bypass and return the new state
    pub fn toggle_bypass(&self) -> bool {
        let config = self.params.update(|c| c.bypass = !c.bypass);
        tracing::info!(bypass = config.bypass, "bypass toggled");
        config.bypass
    }

    /// Status channel
    pub fn status(&mut self) -> &mut StatusReceiver {
        &mut self.status_rx
    }

    /// Newest status report, discarding older ones
    pub fn latest_status(&mut self) -> Option<StatusReport> {
        self.status_rx.latest()
    }

    /// Pending engine events
    pub fn poll_events(&self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.event_rx.try_iter()
    }

    /// Whether the engine has disabled itself after repeated faults
    pub fn is_disabled(&self) -> bool {
        self.shared.disabled.load(Ordering::Acquire)
    }

    /// Ask the engine to resume correction at its next block
    pub fn rearm(&self) {
        self.shared.rearm.store(true, Ordering::Release);
        tracing::info!("engine re-arm requested");
    }
}

fn warn_formant_inert(shift: f32) {
    tracing::warn!(shift, "formant shift is stored but has no effect on the output");
}
