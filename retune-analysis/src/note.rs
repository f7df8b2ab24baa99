//! Note and frequency conversions

use thiserror::Error;

/// Reference frequency for A4 (440 Hz)
pub const A4_FREQ: f32 = 440.0;

/// MIDI note number of A4
pub const A4_MIDI: f32 = 69.0;

/// Pitch class names with sharp notation (index 0 = C)
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Error returned when a root key cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid root key: {0} (expected C..B with optional #/b, or 0-11)")]
pub struct ParseKeyError(pub String);

/// Convert frequency (Hz) to a fractional MIDI note number
#[inline]
pub fn freq_to_midi(freq: f32) -> f32 {
    A4_MIDI + 12.0 * (freq / A4_FREQ).log2()
}

/// Convert a fractional MIDI note number to frequency (Hz)
#[inline]
pub fn midi_to_freq(midi: f32) -> f32 {
    A4_FREQ * 2.0f32.powf((midi - A4_MIDI) / 12.0)
}

/// Interval from `from` to `to` in cents (positive = `to` is higher)
#[inline]
pub fn cents_between(from: f32, to: f32) -> f32 {
    1200.0 * (to / from).log2()
}

/// Note name with octave for a frequency (e.g. "A4"), None if not a pitch
pub fn note_name(freq: f32) -> Option<String> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    let midi = freq_to_midi(freq).round() as i32;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    Some(format!("{}{}", name, octave))
}

/// Parse a root key: note name ("C", "F#", "Bb", case-insensitive) or a
/// pitch class number ("0".."11")
pub fn parse_root_key(s: &str) -> Result<u8, ParseKeyError> {
    let trimmed = s.trim();
    if let Ok(n) = trimmed.parse::<u8>() {
        return if n < 12 {
            Ok(n)
        } else {
            Err(ParseKeyError(trimmed.to_string()))
        };
    }

    let mut chars = trimmed.chars();
    let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(ParseKeyError(trimmed.to_string())),
    };

    let accidental: i32 = match chars.as_str() {
        "" => 0,
        "#" | "s" | "sharp" => 1,
        "b" | "flat" => -1,
        _ => return Err(ParseKeyError(trimmed.to_string())),
    };

    Ok((base + accidental).rem_euclid(12) as u8)
}
