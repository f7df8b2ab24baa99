//! Correction ratio shaping
//!
//! The ratio between target and detected pitch is glided by a one-pole
//! smoother (the retune speed) and then perturbed by the humanizer
//! before it drives the shifter.

mod humanizer;
mod smoother;

pub use humanizer::Humanizer;
pub use smoother::{clamp_ratio, RatioSmoother, MAX_RATIO, MIN_RATIO};
