//! Real-time YIN pitch detector
//!
//! Estimates the fundamental frequency of a mono stream over a rolling
//! window. Samples are pushed block by block; every `hop_size` new samples
//! (once the window is full) the window is analyzed:
//!
//! 1. Difference function d(τ) = Σ (x[i] - x[i+τ])² over the half-window
//! 2. Cumulative mean normalized difference d'(τ) = d(τ)·τ / Σ_{k=1..τ} d(k)
//! 3. First τ ≥ 2 with d'(τ) below the threshold, then descend to the
//!    local minimum
//! 4. Parabolic interpolation around τ for sub-sample accuracy
//!
//! The difference function dominates the cost (O(W²) for a half-window W).
//! The default backend computes it through an FFT cross-correlation instead,
//! d(τ) = e(0) + e(τ) - 2·r(τ), which is O(N log N).
//!
//! All buffers, including FFT scratch, are allocated in the constructor.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;
use thiserror::Error;

/// Reference analysis window (samples)
pub const REFERENCE_WINDOW: usize = 1024;

/// Samples between analyses
pub const DEFAULT_HOP: usize = 256;

/// Default YIN threshold on d'(τ)
pub const DEFAULT_THRESHOLD: f32 = 0.15;

/// Lowest pitch the default window must be able to resolve (Hz)
const WINDOW_FLOOR_HZ: f32 = 60.0;

/// Detector configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("Invalid window size: {0} (must be even and at least 8)")]
    InvalidWindowSize(usize),
    #[error("Invalid hop size: {0} (must be between 1 and the window size)")]
    InvalidHopSize(usize),
    #[error("Invalid threshold: {0} (must be in (0, 1))")]
    InvalidThreshold(f32),
}

/// One detector output
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz (0.0 = no pitch found)
    pub frequency: f32,
    /// 1 - d'(τ) at the chosen lag, 0.0 - 1.0
    pub confidence: f32,
}

impl PitchEstimate {
    /// "No pitch found"
    pub const NONE: PitchEstimate = PitchEstimate {
        frequency: 0.0,
        confidence: 0.0,
    };

    /// Check if a pitch was found
    pub fn is_voiced(&self) -> bool {
        self.frequency > 0.0
    }
}

/// How the difference function is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DifferenceMethod {
    /// Direct squared-difference sum, O(W²)
    Direct,
    /// FFT cross-correlation, O(N log N)
    #[default]
    Fft,
}

/// Detector settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Rolling window length; half of it is compared against itself
    pub window_size: usize,
    /// New samples between analyses
    pub hop_size: usize,
    /// d'(τ) must dip below this to count as periodic
    pub threshold: f32,
    /// Difference function backend
    pub method: DifferenceMethod,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: REFERENCE_WINDOW,
            hop_size: DEFAULT_HOP,
            threshold: DEFAULT_THRESHOLD,
            method: DifferenceMethod::default(),
        }
    }
}

impl DetectorConfig {
    /// Window sized so the half-window covers a 60 Hz period
    ///
    /// Smallest power of two ≥ max(1024, 2·sr/60): 2048 at 44.1 and 48 kHz.
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        let needed = (2.0 * sample_rate as f32 / WINDOW_FLOOR_HZ).ceil() as usize;
        Self {
            window_size: needed.max(REFERENCE_WINDOW).next_power_of_two(),
            ..Self::default()
        }
    }

    /// Half-window (number of lags analyzed)
    pub fn half_window(&self) -> usize {
        self.window_size / 2
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.window_size < 8 || self.window_size % 2 != 0 {
            return Err(DetectorError::InvalidWindowSize(self.window_size));
        }
        if self.hop_size == 0 || self.hop_size > self.window_size {
            return Err(DetectorError::InvalidHopSize(self.hop_size));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(DetectorError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Pre-planned FFT cross-correlation r(τ) = Σ_{i<W} x[i]·x[i+τ]
struct FftCorrelator {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    head: Vec<Complex<f64>>,
    full: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl FftCorrelator {
    fn new(window_size: usize) -> Self {
        // 2x the window so lags up to W never wrap around
        let size = (window_size * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            size,
            forward,
            inverse,
            head: vec![Complex::new(0.0, 0.0); size],
            full: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    /// Fill `out[τ]` with r(τ) for τ in 0..out.len()
    fn correlate(&mut self, frame: &[f32], half: usize, out: &mut [f64]) {
        for (i, c) in self.head.iter_mut().enumerate() {
            let x = if i < half { frame[i] as f64 } else { 0.0 };
            *c = Complex::new(x, 0.0);
        }
        for (i, c) in self.full.iter_mut().enumerate() {
            let x = if i < frame.len() { frame[i] as f64 } else { 0.0 };
            *c = Complex::new(x, 0.0);
        }

        self.forward
            .process_with_scratch(&mut self.head, &mut self.scratch);
        self.forward
            .process_with_scratch(&mut self.full, &mut self.scratch);

        // conj(A)·B -> correlation after the inverse transform
        for (b, a) in self.full.iter_mut().zip(self.head.iter()) {
            *b *= a.conj();
        }
        self.inverse
            .process_with_scratch(&mut self.full, &mut self.scratch);

        let norm = 1.0 / self.size as f64;
        for (tau, r) in out.iter_mut().enumerate() {
            *r = self.full[tau].re * norm;
        }
    }
}

/// Rolling-window YIN pitch detector
pub struct PitchDetector {
    sample_rate: f32,
    config: DetectorConfig,
    half: usize,
    /// Circular window of the most recent samples
    ring: Vec<f32>,
    ring_pos: usize,
    filled: usize,
    hop_counter: usize,
    /// Contiguous copy of the window, oldest sample first
    frame: Vec<f32>,
    /// d(τ)
    difference: Vec<f32>,
    /// d'(τ)
    cmnd: Vec<f32>,
    correlation: Vec<f64>,
    correlator: Option<FftCorrelator>,
    last: PitchEstimate,
}

impl PitchDetector {
    /// Create a detector; fails on unusable settings
    pub fn new(sample_rate: u32, config: DetectorConfig) -> Result<Self, DetectorError> {
        if sample_rate == 0 {
            return Err(DetectorError::InvalidSampleRate(sample_rate));
        }
        config.validate()?;

        let window = config.window_size;
        let half = config.half_window();
        let correlator = match config.method {
            DifferenceMethod::Direct => None,
            DifferenceMethod::Fft => Some(FftCorrelator::new(window)),
        };

        tracing::debug!(
            sample_rate,
            window,
            hop = config.hop_size,
            method = ?config.method,
            "pitch detector ready"
        );

        Ok(Self {
            sample_rate: sample_rate as f32,
            config,
            half,
            ring: vec![0.0; window],
            ring_pos: 0,
            filled: 0,
            hop_counter: 0,
            frame: vec![0.0; window],
            difference: vec![0.0; half],
            cmnd: vec![0.0; half],
            correlation: vec![0.0; half],
            correlator,
            last: PitchEstimate::NONE,
        })
    }

    /// Detector settings
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Most recent estimate (NONE until the window has filled)
    pub fn last_estimate(&self) -> PitchEstimate {
        self.last
    }

    /// Whether enough samples have arrived for a full window
    pub fn is_primed(&self) -> bool {
        self.filled == self.config.window_size
    }

    /// Append samples without analyzing (keeps the window current)
    pub fn feed(&mut self, samples: &[f32]) {
        for &s in samples {
            self.write_sample(s);
        }
    }

    /// Append samples, analyzing at every hop boundary
    ///
    /// `on_estimate` is called once per analysis, in order.
    pub fn push<F: FnMut(PitchEstimate)>(&mut self, samples: &[f32], mut on_estimate: F) {
        for &s in samples {
            self.write_sample(s);
            self.hop_counter += 1;

            if self.hop_counter >= self.config.hop_size && self.is_primed() {
                self.hop_counter = 0;
                let estimate = self.analyze_window();
                on_estimate(estimate);
            }
        }
    }

    /// Analyze an explicit frame (uses the first `window_size` samples)
    ///
    /// Returns NONE if the frame is shorter than the window.
    pub fn detect(&mut self, frame: &[f32]) -> PitchEstimate {
        if frame.len() < self.config.window_size {
            return PitchEstimate::NONE;
        }
        let window = self.config.window_size;
        self.frame.copy_from_slice(&frame[..window]);
        for s in self.frame.iter_mut() {
            if !s.is_finite() {
                *s = 0.0;
            }
        }
        let estimate = self.analyze_frame();
        self.last = estimate;
        estimate
    }

    /// Clear the window and all history
    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.ring_pos = 0;
        self.filled = 0;
        self.hop_counter = 0;
        self.last = PitchEstimate::NONE;
    }

    #[inline]
    fn write_sample(&mut self, sample: f32) {
        self.ring[self.ring_pos] = if sample.is_finite() { sample } else { 0.0 };
        self.ring_pos += 1;
        if self.ring_pos == self.ring.len() {
            self.ring_pos = 0;
        }
        if self.filled < self.ring.len() {
            self.filled += 1;
        }
    }

    fn analyze_window(&mut self) -> PitchEstimate {
        // ring_pos points at the oldest sample
        let (newer, older) = self.ring.split_at(self.ring_pos);
        let split = older.len();
        self.frame[..split].copy_from_slice(older);
        self.frame[split..].copy_from_slice(newer);

        let estimate = self.analyze_frame();
        self.last = estimate;
        estimate
    }

    fn analyze_frame(&mut self) -> PitchEstimate {
        self.compute_difference();
        self.compute_cmnd();

        let Some(tau) = self.find_lag() else {
            return PitchEstimate::NONE;
        };

        let refined = self.parabolic_interpolation(tau);
        let frequency = self.sample_rate / refined;
        if !frequency.is_finite() || frequency <= 0.0 {
            return PitchEstimate::NONE;
        }

        PitchEstimate {
            frequency,
            confidence: (1.0 - self.cmnd[tau]).clamp(0.0, 1.0),
        }
    }

    /// Step 1: d(τ) for τ in 0..W
    fn compute_difference(&mut self) {
        let half = self.half;

        match self.correlator.as_mut() {
            Some(correlator) => {
                correlator.correlate(&self.frame, half, &mut self.correlation);

                let frame = &self.frame;
                let energy_head: f64 = frame[..half].iter().map(|&x| (x as f64) * (x as f64)).sum();
                let mut energy_lag = energy_head;

                for tau in 0..half {
                    let d = energy_head + energy_lag - 2.0 * self.correlation[tau];
                    self.difference[tau] = d.max(0.0) as f32;

                    let leaving = frame[tau] as f64;
                    let entering = frame[tau + half] as f64;
                    energy_lag += entering * entering - leaving * leaving;
                }
            }
            None => {
                let frame = &self.frame;
                for (tau, d) in self.difference.iter_mut().enumerate() {
                    let mut sum = 0.0f32;
                    for i in 0..half {
                        let delta = frame[i] - frame[i + tau];
                        sum += delta * delta;
                    }
                    *d = sum;
                }
            }
        }
    }

    /// Step 2: cumulative mean normalized difference
    fn compute_cmnd(&mut self) {
        self.cmnd[0] = 1.0;
        let mut running = 0.0f32;

        for tau in 1..self.half {
            running += self.difference[tau];
            self.cmnd[tau] = if running > 0.0 {
                self.difference[tau] * tau as f32 / running
            } else {
                1.0
            };
        }
    }

    /// Step 3: absolute threshold plus local-minimum descent
    fn find_lag(&self) -> Option<usize> {
        let threshold = self.config.threshold;
        let mut tau = 2;

        while tau < self.half {
            if self.cmnd[tau] < threshold {
                while tau + 1 < self.half && self.cmnd[tau + 1] < self.cmnd[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }

        None
    }

    /// Step 4: vertex of the parabola through (τ-1, τ, τ+1)
    fn parabolic_interpolation(&self, tau: usize) -> f32 {
        if tau == 0 || tau + 1 >= self.half {
            return tau as f32;
        }

        let s0 = self.cmnd[tau - 1];
        let s1 = self.cmnd[tau];
        let s2 = self.cmnd[tau + 1];
        let curvature = s0 - 2.0 * s1 + s2;

        if curvature.abs() < f32::EPSILON {
            return tau as f32;
        }

        let shift = 0.5 * (s0 - s2) / curvature;
        if shift.abs() < 1.0 {
            tau as f32 + shift
        } else {
            tau as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.8)
            .collect()
    }

    fn cents_off(detected: f32, expected: f32) -> f32 {
        (1200.0 * (detected / expected).log2()).abs()
    }

    fn last_estimate(detector: &mut PitchDetector, samples: &[f32]) -> PitchEstimate {
        let mut last = PitchEstimate::NONE;
        for block in samples.chunks(128) {
            detector.push(block, |e| last = e);
        }
        last
    }

    #[test]
    fn test_window_for_sample_rate() {
        assert_eq!(DetectorConfig::for_sample_rate(48000).window_size, 2048);
        assert_eq!(DetectorConfig::for_sample_rate(44100).window_size, 2048);
        assert_eq!(DetectorConfig::for_sample_rate(16000).window_size, 1024);
        assert_eq!(DetectorConfig::for_sample_rate(96000).window_size, 4096);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad_window = DetectorConfig { window_size: 7, ..Default::default() };
        assert!(PitchDetector::new(48000, bad_window).is_err());

        let bad_hop = DetectorConfig { hop_size: 0, ..Default::default() };
        assert!(matches!(
            PitchDetector::new(48000, bad_hop),
            Err(DetectorError::InvalidHopSize(0))
        ));

        let bad_threshold = DetectorConfig { threshold: 1.5, ..Default::default() };
        assert!(PitchDetector::new(48000, bad_threshold).is_err());

        assert!(PitchDetector::new(0, DetectorConfig::default()).is_err());
    }

    #[test]
    fn test_sine_accuracy_fft() {
        let sr = 48000;
        for freq in [80.0, 110.0, 220.0, 440.0, 660.0, 1000.0] {
            let mut detector = PitchDetector::new(sr, DetectorConfig::for_sample_rate(sr)).unwrap();
            let est = last_estimate(&mut detector, &sine(freq, sr, 6000));
            assert!(est.is_voiced(), "no pitch for {} Hz", freq);
            assert!(
                cents_off(est.frequency, freq) < 10.0,
                "{} Hz detected as {} Hz",
                freq,
                est.frequency
            );
            assert!(est.confidence > 0.8, "low confidence {} at {} Hz", est.confidence, freq);
        }
    }

    #[test]
    fn test_sine_accuracy_direct() {
        let sr = 44100;
        let config = DetectorConfig {
            method: DifferenceMethod::Direct,
            ..DetectorConfig::for_sample_rate(sr)
        };
        for freq in [80.0, 440.0, 1000.0] {
            let mut detector = PitchDetector::new(sr, config).unwrap();
            let est = last_estimate(&mut detector, &sine(freq, sr, 4096));
            assert!(
                cents_off(est.frequency, freq) < 10.0,
                "{} Hz detected as {} Hz",
                freq,
                est.frequency
            );
        }
    }

    #[test]
    fn test_backends_agree() {
        let sr = 48000;
        let signal = sine(196.0, sr, 2048);

        let mut direct = PitchDetector::new(
            sr,
            DetectorConfig {
                method: DifferenceMethod::Direct,
                ..DetectorConfig::for_sample_rate(sr)
            },
        )
        .unwrap();
        let mut fft = PitchDetector::new(sr, DetectorConfig::for_sample_rate(sr)).unwrap();

        let a = direct.detect(&signal);
        let b = fft.detect(&signal);
        assert!((a.frequency - b.frequency).abs() < 0.05, "{} vs {}", a.frequency, b.frequency);
        assert!((a.confidence - b.confidence).abs() < 0.01);
    }

    #[test]
    fn test_reference_window() {
        // 1024 window / 512 lags resolves A4 comfortably
        let sr = 44100;
        let mut detector = PitchDetector::new(sr, DetectorConfig::default()).unwrap();
        let est = last_estimate(&mut detector, &sine(440.0, sr, 4096));
        assert!(cents_off(est.frequency, 440.0) < 10.0, "got {}", est.frequency);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let sr = 48000;
        let mut detector = PitchDetector::new(sr, DetectorConfig::for_sample_rate(sr)).unwrap();
        let est = last_estimate(&mut detector, &vec![0.0; 8192]);
        assert_eq!(est, PitchEstimate::NONE);
    }

    #[test]
    fn test_hop_rate() {
        let sr = 48000;
        let config = DetectorConfig::for_sample_rate(sr);
        let mut detector = PitchDetector::new(sr, config).unwrap();

        let signal = sine(220.0, sr, config.window_size + 4 * config.hop_size);
        let mut count = 0;
        for block in signal.chunks(128) {
            detector.push(block, |_| count += 1);
        }
        // One analysis when the window fills, then one per hop
        assert_eq!(count, 5);
    }

    #[test]
    fn test_no_estimate_before_window_fills() {
        let sr = 48000;
        let mut detector = PitchDetector::new(sr, DetectorConfig::for_sample_rate(sr)).unwrap();
        let mut count = 0;
        detector.push(&sine(220.0, sr, 1024), |_| count += 1);
        assert_eq!(count, 0);
        assert!(!detector.is_primed());
    }

    #[test]
    fn test_non_finite_input_is_sanitized() {
        let sr = 48000;
        let mut detector = PitchDetector::new(sr, DetectorConfig::for_sample_rate(sr)).unwrap();
        let mut signal = sine(330.0, sr, 4096);
        signal[100] = f32::NAN;
        signal[200] = f32::INFINITY;
        let est = last_estimate(&mut detector, &signal);
        assert!(est.frequency.is_finite());
        assert!(est.confidence.is_finite());
    }
}
