//! Humanizer - vibrato and micro pitch drift on the correction ratio
//!
//! - Vibrato: slow sine at ~5.5 Hz, about 10 cents deep at full amount
//! - Drift: leaky random walk, a few cents of wandering intonation
//!
//! Both scale with the humanize amount; at 0 the ratio passes unchanged.

use super::smoother::clamp_ratio;
use std::f32::consts::TAU;

/// Humanizer state, advanced once per block
pub struct Humanizer {
    sample_rate: f32,
    vibrato_phase: f32,
    /// Unscaled random walk
    drift: f32,
    random_state: u32,
}

impl Humanizer {
    const VIBRATO_RATE_HZ: f32 = 5.5;
    /// Relative ratio deviation at humanize = 1 (~10 cents)
    const VIBRATO_DEPTH: f32 = 0.006;
    /// Largest random step per block
    const DRIFT_STEP: f32 = 0.000_15;
    /// Leak towards zero per block
    const DRIFT_DECAY: f32 = 0.99;

    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            vibrato_phase: 0.0,
            drift: 0.0,
            random_state: 0x9E37_79B9,
        }
    }

    /// Simple xorshift PRNG (no allocation, deterministic), -1..1
    #[inline]
    fn next_random(&mut self) -> f32 {
        self.random_state ^= self.random_state << 13;
        self.random_state ^= self.random_state >> 17;
        self.random_state ^= self.random_state << 5;
        (self.random_state as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    /// Advance one block of `block_len` samples and perturb `ratio`
    pub fn apply(&mut self, ratio: f32, humanize: f32, block_len: usize) -> f32 {
        let phase_inc = TAU * Self::VIBRATO_RATE_HZ * block_len as f32 / self.sample_rate;
        self.vibrato_phase += phase_inc;
        if self.vibrato_phase >= TAU {
            self.vibrato_phase %= TAU;
        }

        self.drift = self.drift * Self::DRIFT_DECAY + self.next_random() * Self::DRIFT_STEP;

        let amount = if humanize.is_finite() {
            humanize.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if amount == 0.0 {
            return ratio;
        }

        let vibrato = self.vibrato_phase.sin() * Self::VIBRATO_DEPTH * amount;
        let micro = self.drift * amount;
        let shaped = ratio * (1.0 + vibrato + micro);

        if shaped.is_finite() {
            clamp_ratio(shaped)
        } else {
            ratio
        }
    }

    /// Current vibrato phase (radians)
    pub fn vibrato_phase(&self) -> f32 {
        self.vibrato_phase
    }

    pub fn reset(&mut self) {
        self.vibrato_phase = 0.0;
        self.drift = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_humanize_is_identity() {
        let mut h = Humanizer::new(48000.0);
        for _ in 0..1000 {
            assert_eq!(h.apply(0.93, 0.0, 128), 0.93);
        }
    }

    #[test]
    fn test_full_humanize_varies_around_ratio() {
        let mut h = Humanizer::new(48000.0);
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;

        // ~2 seconds of 128-sample blocks
        for _ in 0..750 {
            let r = h.apply(1.0, 1.0, 128);
            min = min.min(r);
            max = max.max(r);
        }

        assert!(min < 0.998 && max > 1.002, "range {}..{}", min, max);
        // Stays within a fraction of a semitone
        assert!(min > 0.97 && max < 1.03, "range {}..{}", min, max);
    }

    #[test]
    fn test_phase_advances_per_block() {
        let mut h = Humanizer::new(48000.0);
        h.apply(1.0, 0.0, 480);
        let expected = TAU * 5.5 * 480.0 / 48000.0;
        assert!((h.vibrato_phase() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_result_is_clamped() {
        let mut h = Humanizer::new(48000.0);
        for _ in 0..100 {
            let r = h.apply(2.0, 1.0, 128);
            assert!(r <= 2.0 && r >= 0.5);
        }
    }
}
