//! Mixer implementation - dry/wet blend and bypass routing

/// Blends the shifted signal with the dry input
pub struct Mixer {
    /// Wet amount (0.0 = dry only, 1.0 = corrected only)
    amount: f32,
    /// Smoothed amount (interpolates toward amount to prevent clicks)
    smoothed_amount: f32,
}

impl Mixer {
    /// Smoothing coefficient for the amount (~5ms at 48kHz)
    const AMOUNT_SMOOTH_COEFF: f32 = 0.995;
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Mixer {
    /// Create a mixer starting at `amount`
    pub fn new(amount: f32) -> Self {
        let amount = sanitize_amount(amount);
        Self {
            amount,
            smoothed_amount: amount,
        }
    }

    /// Set the wet amount (0.0 to 1.0)
    pub fn set_amount(&mut self, amount: f32) {
        self.amount = sanitize_amount(amount);
    }

    /// Get the wet amount
    pub fn amount(&self) -> f32 {
        self.amount
    }

    /// Jump the smoothed amount to the target
    pub fn reset(&mut self) {
        self.smoothed_amount = self.amount;
    }

    /// Mix `wet` and `dry` into `output` with per-sample amount smoothing
    ///
    /// Returns `false` if any mixed sample is not finite.
    pub fn mix(&mut self, dry: &[f32], wet: &[f32], output: &mut [f32]) -> bool {
        let mut finite = true;

        for ((out, &d), &w) in output.iter_mut().zip(dry).zip(wet) {
            self.smoothed_amount = Self::AMOUNT_SMOOTH_COEFF * self.smoothed_amount
                + (1.0 - Self::AMOUNT_SMOOTH_COEFF) * self.amount;

            let sample = w * self.smoothed_amount + d * (1.0 - self.smoothed_amount);
            finite &= sample.is_finite();
            *out = sample;
        }

        finite
    }
}

/// Route the dry signal straight through
#[inline]
pub fn bypass(input: &[f32], output: &mut [f32]) {
    let len = input.len().min(output.len());
    output[..len].copy_from_slice(&input[..len]);
}

/// Copy `input` replacing non-finite samples with silence
#[inline]
pub fn sanitized_copy(input: &[f32], output: &mut [f32]) {
    for (out, &s) in output.iter_mut().zip(input) {
        *out = if s.is_finite() { s } else { 0.0 };
    }
}

fn sanitize_amount(amount: f32) -> f32 {
    if amount.is_finite() {
        amount.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
