//! Pitch-synchronous overlap-add pitch shifter
//!
//! Incoming samples are written to a circular buffer. Two grains read back
//! from it through Hann windows. Both are driven by one master phase, with
//! the second grain fixed half a cycle ahead, so their weights always sum
//! to one. Each grain reads `phase × span` behind the write head, where the
//! span is two detected periods latched when that grain wraps (window
//! weight zero). The grains therefore sit a whole period apart and add in
//! phase.
//!
//! The master phase advances by `(1/period - 1/synthesis_hop) / 2` per
//! sample with `synthesis_hop = period / ratio`, using the current detected
//! period, so the read head runs at `ratio` times the input rate. At ratio 1
//! the shifter is a fixed delay of one period with unity gain.
//!
//! Pitch and timbre shift together (no formant preservation).

use std::f32::consts::TAU;

/// Pitch assumed before anything has been detected (Hz)
const DEFAULT_PITCH_HZ: f32 = 220.0;

/// Lowest pitch the buffer is sized for (Hz)
const LOWEST_PITCH_HZ: f32 = 60.0;

/// Highest pitch used to bound the period (Hz)
const HIGHEST_PITCH_HZ: f32 = 1200.0;

/// Grains kept in the buffer per longest period
const PERIODS_IN_BUFFER: usize = 4;

/// Periods covered by one grain
const GRAIN_PERIODS: f32 = 2.0;

/// Phase offset of each grain from the master phase
const GRAIN_OFFSETS: [f32; 2] = [0.0, 0.5];

/// Hann window at phase 0..1
#[inline(always)]
fn hann(phase: f32) -> f32 {
    0.5 * (1.0 - (TAU * phase).cos())
}

/// Wrap a phase into 0..1
#[inline(always)]
fn wrap_phase(phase: f32) -> f32 {
    let wrapped = phase - phase.floor();
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

/// Real-time mono pitch shifter
pub struct PitchShifter {
    /// Circular input history (power of two)
    buffer: Vec<f32>,
    mask: usize,
    write_pos: usize,
    /// Master grain phase, 0..1
    phase: f32,
    /// Read span of each grain (samples), latched at wrap
    spans: [f32; 2],
    /// Current detected period in samples (integer valued)
    period: f32,
    min_period: f32,
    max_period: f32,
    sample_rate: f32,
}

impl PitchShifter {
    /// Create a shifter for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let max_period = (sr / LOWEST_PITCH_HZ).ceil();
        let min_period = (sr / HIGHEST_PITCH_HZ).floor().max(2.0);
        let buffer_len = (max_period as usize * PERIODS_IN_BUFFER).next_power_of_two();
        let period = (sr / DEFAULT_PITCH_HZ).round().clamp(min_period, max_period);

        Self {
            buffer: vec![0.0; buffer_len],
            mask: buffer_len - 1,
            write_pos: 0,
            phase: 0.0,
            spans: [period * GRAIN_PERIODS; 2],
            period,
            min_period,
            max_period,
            sample_rate: sr,
        }
    }

    /// Circular buffer length
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Current period in samples
    pub fn period(&self) -> f32 {
        self.period
    }

    /// Update the source period from a detected pitch
    ///
    /// Non-finite or non-positive pitches are ignored. Grains pick up the
    /// new period as they wrap.
    pub fn set_source_pitch(&mut self, pitch_hz: f32) {
        if !(pitch_hz.is_finite() && pitch_hz > 0.0) {
            return;
        }
        self.period = (self.sample_rate / pitch_hz)
            .round()
            .clamp(self.min_period, self.max_period);
    }

    /// Write samples into the history without producing output
    ///
    /// Keeps the buffer current while the effect is bypassed.
    pub fn feed(&mut self, input: &[f32]) {
        for &s in input {
            self.write(s);
            self.write_pos = (self.write_pos + 1) & self.mask;
        }
    }

    /// Shift a block by `ratio` (output pitch / input pitch)
    pub fn process(&mut self, input: &[f32], output: &mut [f32], ratio: f32) {
        let ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            1.0
        };

        for (inp, out) in input.iter().zip(output.iter_mut()) {
            self.write(*inp);
            *out = self.render(ratio);
            self.write_pos = (self.write_pos + 1) & self.mask;
        }
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.phase = 0.0;
        self.spans = [self.period * GRAIN_PERIODS; 2];
    }

    #[inline]
    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = if sample.is_finite() { sample } else { 0.0 };
    }

    #[inline]
    fn grain_phase(&self, grain: usize) -> f32 {
        wrap_phase(self.phase + GRAIN_OFFSETS[grain])
    }

    /// Produce one output sample from both grains, then advance the master phase
    #[inline]
    fn render(&mut self, ratio: f32) -> f32 {
        let mut acc = 0.0;
        for grain in 0..GRAIN_OFFSETS.len() {
            let phase = self.grain_phase(grain);
            acc += self.read_interpolated(phase * self.spans[grain]) * hann(phase);
        }

        let synthesis_hop = self.period / ratio;
        let advance = (1.0 / self.period - 1.0 / synthesis_hop) / GRAIN_PERIODS;
        let before = [self.grain_phase(0), self.grain_phase(1)];
        self.phase = wrap_phase(self.phase + advance);

        // A grain that crossed 0/1 sits at zero weight: latch the new span
        for (grain, &old) in before.iter().enumerate() {
            if (self.grain_phase(grain) - old).abs() > 0.5 {
                self.spans[grain] = self.period * GRAIN_PERIODS;
            }
        }

        acc
    }

    /// Linear interpolation `offset` samples behind the write head
    #[inline]
    fn read_interpolated(&self, offset: f32) -> f32 {
        let offset = offset.max(0.0);
        let whole = offset as usize;
        let frac = offset - whole as f32;

        let p0 = self.write_pos.wrapping_sub(whole) & self.mask;
        let p1 = p0.wrapping_sub(1) & self.mask;

        self.buffer[p0] * (1.0 - frac) + self.buffer[p1] * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    /// Average zero-crossing frequency, ignoring the first `skip` samples
    fn zero_crossing_freq(signal: &[f32], sample_rate: u32, skip: usize) -> f32 {
        let tail = &signal[skip..];
        let crossings = tail
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count();
        crossings as f32 * sample_rate as f32 / tail.len() as f32
    }

    fn rms(signal: &[f32]) -> f32 {
        (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
    }

    #[test]
    fn test_buffer_sized_for_low_pitch() {
        let shifter = PitchShifter::new(48000);
        assert!(shifter.buffer_len() >= 800 * PERIODS_IN_BUFFER);
        assert!(shifter.buffer_len() as f32 > 800.0 * GRAIN_PERIODS);
        assert!(shifter.buffer_len().is_power_of_two());
    }

    #[test]
    fn test_period_clamped() {
        let mut shifter = PitchShifter::new(48000);
        shifter.set_source_pitch(10.0);
        assert_eq!(shifter.period(), 800.0);
        shifter.set_source_pitch(5000.0);
        assert_eq!(shifter.period(), 40.0);
        shifter.set_source_pitch(f32::NAN);
        assert_eq!(shifter.period(), 40.0);
        shifter.set_source_pitch(480.0);
        assert_eq!(shifter.period(), 100.0);
    }

    #[test]
    fn test_unity_ratio_is_delay() {
        let sr = 48000;
        let mut shifter = PitchShifter::new(sr);
        shifter.set_source_pitch(200.0);
        shifter.reset();

        let input = sine(300.0, sr, 4800);
        let mut output = vec![0.0; input.len()];
        shifter.process(&input, &mut output, 1.0);

        // Half a grain of delay: one 240-sample period at 200 Hz
        let delay = 240;
        for i in 1000..4800 {
            assert!(
                (output[i] - input[i - delay]).abs() < 1e-4,
                "sample {}: {} vs {}",
                i,
                output[i],
                input[i - delay]
            );
        }
    }

    #[test]
    fn test_shift_up_and_down() {
        let sr = 48000;
        for (ratio, expected) in [(1.5, 330.0), (0.75, 165.0), (2.0, 440.0)] {
            let mut shifter = PitchShifter::new(sr);
            shifter.set_source_pitch(220.0);
            let input = sine(220.0, sr, 24000);
            let mut output = vec![0.0; input.len()];
            for (inp, out) in input.chunks(128).zip(output.chunks_mut(128)) {
                shifter.process(inp, out, ratio);
            }

            let measured = zero_crossing_freq(&output, sr, 4800);
            let cents = 1200.0 * (measured / expected).log2();
            assert!(
                cents.abs() < 30.0,
                "ratio {}: expected {} Hz, got {} Hz",
                ratio,
                expected,
                measured
            );
        }
    }

    #[test]
    fn test_level_preserved() {
        let sr = 48000;
        let mut shifter = PitchShifter::new(sr);
        shifter.set_source_pitch(220.0);
        let input = sine(220.0, sr, 24000);
        let mut output = vec![0.0; input.len()];
        shifter.process(&input, &mut output, 1.12);

        let ratio = rms(&output[4800..]) / rms(&input[4800..]);
        assert!(ratio > 0.7 && ratio < 1.3, "level ratio {}", ratio);
    }

    #[test]
    fn test_non_finite_input_and_ratio() {
        let mut shifter = PitchShifter::new(44100);
        let mut input = sine(220.0, 44100, 512);
        input[10] = f32::NAN;
        input[20] = f32::NEG_INFINITY;
        let mut output = vec![0.0; 512];
        shifter.process(&input, &mut output, f32::NAN);
        assert!(output.iter().all(|s| s.is_finite()));
        shifter.process(&input, &mut output, 0.0);
        assert!(output.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_feed_keeps_history() {
        let sr = 48000;
        let mut shifter = PitchShifter::new(sr);
        shifter.set_source_pitch(200.0);
        shifter.reset();

        let input = sine(300.0, sr, 2048);
        shifter.feed(&input[..1024]);
        let mut output = vec![0.0; 1024];
        shifter.process(&input[1024..], &mut output, 1.0);

        // Output is warm from the first sample: delayed input, no ramp-in
        assert!((output[0] - input[1024 - 240]).abs() < 1e-4);
    }

    /// Process `input` at `ratio`, switch the source to `to_hz` and keep going
    fn run_with_pitch_change(from_hz: f32, to_hz: f32, ratio: f32) -> (PitchShifter, Vec<f32>) {
        let sr = 48000;
        let mut shifter = PitchShifter::new(sr);
        shifter.set_source_pitch(from_hz);
        shifter.reset();

        let before = sine(from_hz, sr, 9600);
        let mut out = vec![0.0; before.len()];
        for (inp, o) in before.chunks(128).zip(out.chunks_mut(128)) {
            shifter.process(inp, o, ratio);
        }

        shifter.set_source_pitch(to_hz);
        let after = sine(to_hz, sr, 48000);
        let mut output = vec![0.0; after.len()];
        for (inp, o) in after.chunks(128).zip(output.chunks_mut(128)) {
            shifter.process(inp, o, ratio);
        }
        (shifter, output)
    }

    #[test]
    fn test_grains_stay_aligned_after_pitch_change() {
        for to_hz in [110.0, 196.0, 330.0] {
            let (shifter, output) = run_with_pitch_change(220.0, to_hz, 1.5);

            let separation = wrap_phase(shifter.grain_phase(1) - shifter.grain_phase(0));
            assert!(
                (separation - 0.5).abs() < 1e-4,
                "{} Hz: grain separation {}",
                to_hz,
                separation
            );
            let expected_span = shifter.period() * GRAIN_PERIODS;
            assert_eq!(shifter.spans, [expected_span; 2], "{} Hz", to_hz);

            // Settled output keeps the input level in every window
            let input_rms = 0.5 / 2f32.sqrt();
            for window in output[4800..].chunks_exact(960) {
                let level = rms(window) / input_rms;
                assert!(
                    level > 0.75 && level < 1.25,
                    "{} Hz: windowed level {}",
                    to_hz,
                    level
                );
            }
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        for step in 0..100 {
            let phase = step as f32 / 100.0;
            let sum = hann(wrap_phase(phase)) + hann(wrap_phase(phase + 0.5));
            assert!((sum - 1.0).abs() < 1e-5, "phase {}: {}", phase, sum);
        }
    }
}
