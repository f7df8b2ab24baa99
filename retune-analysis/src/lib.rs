//! Pitch analysis for Retune
//!
//! Provides the analysis half of the correction pipeline:
//! - YIN pitch detection over a rolling window
//! - Median stabilization of raw estimates
//! - Scale tables and scale quantization with flex-tune
//! - Note/frequency conversions

mod note;
mod scale;
mod stabilizer;
mod target;
mod yin;

pub use note::{
    cents_between, freq_to_midi, midi_to_freq, note_name, parse_root_key, ParseKeyError, A4_FREQ,
    NOTE_NAMES,
};
pub use scale::{ParseScaleError, Scale};
pub use stabilizer::{PitchStabilizer, HISTORY_SIZE, MAX_PITCH_HZ, MIN_PITCH_HZ};
pub use target::{flex_threshold_cents, map_to_scale, TargetPitch, FLEX_WINDOW_CENTS};
pub use yin::{
    DetectorConfig, DetectorError, DifferenceMethod, PitchDetector, PitchEstimate, DEFAULT_HOP,
    DEFAULT_THRESHOLD, REFERENCE_WINDOW,
};
