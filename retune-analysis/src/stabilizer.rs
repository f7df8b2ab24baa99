//! Median stabilization of raw pitch estimates
//!
//! Keeps the last few plausible estimates and reports their median, so a
//! single octave jump or noisy frame cannot steer the correction. Frames
//! with no pitch, or a pitch outside the vocal range, leave the stable
//! pitch where it was.

use crate::yin::PitchEstimate;

/// Number of estimates kept for the median
pub const HISTORY_SIZE: usize = 8;

/// Lowest admitted pitch (Hz)
pub const MIN_PITCH_HZ: f32 = 60.0;

/// Highest admitted pitch (Hz)
pub const MAX_PITCH_HZ: f32 = 1200.0;

/// Ring of recent estimates with median output
#[derive(Debug, Clone)]
pub struct PitchStabilizer {
    /// 0.0 marks an empty slot
    history: [f32; HISTORY_SIZE],
    write_idx: usize,
    stable: Option<f32>,
}

impl Default for PitchStabilizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchStabilizer {
    pub fn new() -> Self {
        Self {
            history: [0.0; HISTORY_SIZE],
            write_idx: 0,
            stable: None,
        }
    }

    /// Check whether a frequency may enter the history
    #[inline]
    pub fn is_plausible(freq: f32) -> bool {
        freq.is_finite() && (MIN_PITCH_HZ..=MAX_PITCH_HZ).contains(&freq)
    }

    /// Feed a detector output, returning the current stable pitch
    ///
    /// Unvoiced or out-of-range estimates are discarded and the previous
    /// stable pitch is kept.
    pub fn update(&mut self, estimate: PitchEstimate) -> Option<f32> {
        if Self::is_plausible(estimate.frequency) {
            self.history[self.write_idx] = estimate.frequency;
            self.write_idx = (self.write_idx + 1) % HISTORY_SIZE;
            self.stable = self.median();
        }
        self.stable
    }

    /// Last stable pitch, None until a plausible estimate has arrived
    pub fn stable_pitch(&self) -> Option<f32> {
        self.stable
    }

    /// Number of occupied history slots
    pub fn len(&self) -> usize {
        self.history.iter().filter(|&&f| f > 0.0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        self.history = [0.0; HISTORY_SIZE];
        self.write_idx = 0;
        self.stable = None;
    }

    /// Median of occupied slots; upper-middle element for an even count
    fn median(&self) -> Option<f32> {
        let mut sorted = [0.0f32; HISTORY_SIZE];
        let mut count = 0;
        for &f in self.history.iter().filter(|&&f| f > 0.0) {
            sorted[count] = f;
            count += 1;
        }

        if count == 0 {
            return None;
        }

        let values = &mut sorted[..count];
        values.sort_unstable_by(f32::total_cmp);
        Some(values[count / 2])
    }
}
