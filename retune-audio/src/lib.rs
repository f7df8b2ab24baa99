//! Real-time pitch correction engine for Retune
//!
//! This module provides the audio half of the correction pipeline:
//! - Correction: ratio smoothing and humanizing
//! - Shifter: pitch-synchronous overlap-add resynthesis
//! - Mixer: dry/wet blend and bypass routing
//! - Engine: per-block orchestration, fault fallback and the control handle

mod correction;
mod effect;
mod engine;
mod mixer;
mod params;
mod shifter;
mod status;

pub use correction::{clamp_ratio, Humanizer, RatioSmoother, MAX_RATIO, MIN_RATIO};
pub use effect::Effect;
pub use engine::{
    AutoTuneEngine, EngineConfig, EngineError, EngineEvent, EngineHandle, FaultKind,
    DEFAULT_STATUS_INTERVAL, MAX_CONSECUTIVE_FAULTS, SAMPLE_RATE_RANGE,
};
pub use mixer::Mixer;
pub use params::{CorrectionConfig, ParamStore};
pub use shifter::PitchShifter;
pub use status::{status_channel, StatusReceiver, StatusReport, StatusSender, STATUS_CAPACITY};
