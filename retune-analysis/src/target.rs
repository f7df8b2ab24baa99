//! Scale quantization with a flex-tune dead zone
//!
//! Maps a stable pitch to the nearest degree of the active key and scale.
//! Notes that are already close to their target pass through untouched
//! when the retune speed leans towards natural singing.

use crate::note::{freq_to_midi, midi_to_freq};
use crate::scale::Scale;

/// Width of the flex-tune dead zone at full retune speed (cents)
pub const FLEX_WINDOW_CENTS: f32 = 25.0;

/// Where a pitch should be moved to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPitch {
    /// Frequency to correct towards (Hz); the input itself when not corrected
    pub frequency: f32,
    /// MIDI note of the nearest scale tone
    pub midi_note: f32,
    /// Chosen scale degree, relative to the root (0-11)
    pub degree: u8,
    /// Deviation of the input from the scale tone (positive = sharp)
    pub cents: f32,
    /// False when the input fell inside the flex-tune dead zone
    pub corrected: bool,
}

/// Flex-tune dead zone (cents) for a retune speed
///
/// flex = 1 - speed; the zone is 25·(1 - flex), so a speed of 0 corrects
/// everything and a speed of 1 leaves notes within 25 cents alone.
#[inline]
pub fn flex_threshold_cents(retune_speed: f32) -> f32 {
    let flex_amount = 1.0 - retune_speed.clamp(0.0, 1.0);
    FLEX_WINDOW_CENTS * (1.0 - flex_amount)
}

/// Map a pitch onto the scale
///
/// Returns None for a non-positive or non-finite pitch. The candidate scan
/// runs over the ascending semitone set and keeps the first minimum, so a
/// note equidistant from two degrees resolves to the lower one. The target
/// stays within six semitones of the input even when the nearest degree
/// lies across the octave boundary.
pub fn map_to_scale(
    pitch: f32,
    root_key: u8,
    scale: Scale,
    retune_speed: f32,
) -> Option<TargetPitch> {
    if !(pitch.is_finite() && pitch > 0.0) {
        return None;
    }

    let midi = freq_to_midi(pitch);
    let rounded = midi.round();
    let note_in_octave = (rounded as i32).rem_euclid(12) as u8;
    let relative = (note_in_octave + 12 - root_key % 12) % 12;

    let (degree, _) = scale.nearest_degree(relative);

    // Signed step from the sung note to the chosen degree, -6..=6
    let mut step = degree as i32 - relative as i32;
    if step > 6 {
        step -= 12;
    } else if step < -6 {
        step += 12;
    }

    let target_midi = rounded + step as f32;
    let cents = (midi - target_midi) * 100.0;

    if cents.abs() < flex_threshold_cents(retune_speed) {
        return Some(TargetPitch {
            frequency: pitch,
            midi_note: target_midi,
            degree,
            cents,
            corrected: false,
        });
    }

    Some(TargetPitch {
        frequency: midi_to_freq(target_midi),
        midi_note: target_midi,
        degree,
        cents,
        corrected: true,
    })
}
