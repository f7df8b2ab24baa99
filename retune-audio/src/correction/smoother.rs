//! One-pole glide of the correction ratio

/// Lowest correction ratio (one octave down)
pub const MIN_RATIO: f32 = 0.5;

/// Highest correction ratio (one octave up)
pub const MAX_RATIO: f32 = 2.0;

/// Clamp a ratio to ±1 octave; non-finite values mean "no correction"
#[inline]
pub fn clamp_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() {
        ratio.clamp(MIN_RATIO, MAX_RATIO)
    } else {
        1.0
    }
}

/// Glides the applied ratio towards the target ratio once per block
///
/// Both ratios stay within [MIN_RATIO, MAX_RATIO] at all times.
#[derive(Debug, Clone)]
pub struct RatioSmoother {
    target: f32,
    current: f32,
}

impl Default for RatioSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl RatioSmoother {
    /// Pole at retune speed 0 (hard, robotic)
    const FASTEST_POLE: f32 = 0.04;
    /// Pole span up to retune speed 1 (slow glide)
    const POLE_RANGE: f32 = 0.95;

    pub fn new() -> Self {
        Self {
            target: 1.0,
            current: 1.0,
        }
    }

    /// Smoothing factor for a retune speed (0.04 at speed 0, 0.99 at speed 1)
    #[inline]
    pub fn smoothing_factor(retune_speed: f32) -> f32 {
        let speed = if retune_speed.is_finite() {
            retune_speed.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self::FASTEST_POLE + speed * Self::POLE_RANGE
    }

    /// Set the target from a target frequency and the detected pitch
    pub fn set_target(&mut self, target_freq: f32, detected: f32) {
        self.target = clamp_ratio(target_freq / detected);
    }

    /// Set the target ratio directly
    pub fn set_target_ratio(&mut self, ratio: f32) {
        self.target = clamp_ratio(ratio);
    }

    /// Advance one block and return the applied ratio
    pub fn step(&mut self, retune_speed: f32) -> f32 {
        let factor = Self::smoothing_factor(retune_speed);
        let next = self.current * factor + self.target * (1.0 - factor);
        self.current = clamp_ratio(next);
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn reset(&mut self) {
        self.target = 1.0;
        self.current = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_ratio() {
        assert_eq!(clamp_ratio(3.0), MAX_RATIO);
        assert_eq!(clamp_ratio(0.1), MIN_RATIO);
        assert_eq!(clamp_ratio(f32::NAN), 1.0);
        assert_eq!(clamp_ratio(f32::INFINITY), 1.0);
        assert_eq!(clamp_ratio(1.1), 1.1);
    }

    #[test]
    fn test_divide_by_zero_guard() {
        let mut s = RatioSmoother::new();
        s.set_target(440.0, 0.0);
        assert_eq!(s.target(), 1.0);
        s.set_target(0.0, 0.0);
        assert_eq!(s.target(), 1.0);
    }

    #[test]
    fn test_smoothing_factor_range() {
        assert!((RatioSmoother::smoothing_factor(0.0) - 0.04).abs() < 1e-6);
        assert!((RatioSmoother::smoothing_factor(1.0) - 0.99).abs() < 1e-6);
        assert!((RatioSmoother::smoothing_factor(f32::NAN) - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_fast_speed_snaps() {
        let mut s = RatioSmoother::new();
        s.set_target_ratio(0.9);
        s.step(0.0);
        let after_two = s.step(0.0);
        assert!((after_two - 0.9).abs() < 0.001, "got {}", after_two);
    }

    #[test]
    fn test_slow_speed_glides() {
        let mut s = RatioSmoother::new();
        s.set_target_ratio(0.9);
        let mut blocks = 0;
        while (s.current() - 0.9).abs() > 0.001 {
            s.step(1.0);
            blocks += 1;
            assert!(blocks < 10_000);
        }
        assert!(blocks > 100, "converged in {} blocks", blocks);
    }

    #[test]
    fn test_ratio_stays_in_range() {
        let mut s = RatioSmoother::new();
        for (i, target) in [5.0, -1.0, 0.0, f32::NAN, 0.5, 2.0, 1e9].iter().enumerate() {
            s.set_target_ratio(*target);
            for _ in 0..10 {
                let r = s.step(i as f32 / 7.0);
                assert!((MIN_RATIO..=MAX_RATIO).contains(&r));
            }
        }
    }
}
