//! Scale table for pitch correction
//!
//! Each scale is a closed set of semitone offsets above the root key,
//! stored in ascending order. The order matters: when two scale degrees
//! are equally close to a sung note, the one found first wins.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a scale name is not recognized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown scale: {0}")]
pub struct ParseScaleError(pub String);

const CHROMATIC: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
const MAJOR: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
const MINOR: [u8; 7] = [0, 2, 3, 5, 7, 8, 10];
const MINOR_HARMONIC: [u8; 7] = [0, 2, 3, 5, 7, 8, 11];
const PENTATONIC: [u8; 5] = [0, 2, 4, 7, 9];
/// Phrygian: flat second and sixth give the dark trap colour
const TRAP_DARK: [u8; 7] = [0, 1, 3, 5, 7, 8, 10];

/// Target scale for correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scale {
    /// All twelve semitones (plain semitone snapping)
    Chromatic,
    /// Ionian major
    #[default]
    Major,
    /// Natural minor (Aeolian)
    Minor,
    /// Harmonic minor (raised seventh)
    MinorHarmonic,
    /// Major pentatonic
    Pentatonic,
    /// Phrygian
    TrapDark,
}

impl Scale {
    /// Every scale, in display order
    pub const ALL: [Scale; 6] = [
        Scale::Chromatic,
        Scale::Major,
        Scale::Minor,
        Scale::MinorHarmonic,
        Scale::Pentatonic,
        Scale::TrapDark,
    ];

    /// Semitone offsets above the root, ascending
    pub fn semitones(self) -> &'static [u8] {
        match self {
            Scale::Chromatic => &CHROMATIC,
            Scale::Major => &MAJOR,
            Scale::Minor => &MINOR,
            Scale::MinorHarmonic => &MINOR_HARMONIC,
            Scale::Pentatonic => &PENTATONIC,
            Scale::TrapDark => &TRAP_DARK,
        }
    }

    /// Check whether a note (relative to the root, 0-11) is a scale degree
    pub fn contains(self, relative: u8) -> bool {
        self.semitones().contains(&(relative % 12))
    }

    /// Find the closest scale degree to `relative` on the pitch-class circle
    ///
    /// Returns `(degree, distance)`. Ties go to the lower degree because the
    /// set is scanned in ascending order and only a strictly smaller distance
    /// replaces the current best.
    pub fn nearest_degree(self, relative: u8) -> (u8, u8) {
        let relative = relative % 12;
        let mut best = (relative, u8::MAX);

        for &degree in self.semitones() {
            let diff = relative.abs_diff(degree);
            let distance = diff.min(12 - diff);
            if distance < best.1 {
                best = (degree, distance);
            }
        }

        best
    }

    /// Canonical lowercase name (matches the config file format)
    pub fn name(self) -> &'static str {
        match self {
            Scale::Chromatic => "chromatic",
            Scale::Major => "major",
            Scale::Minor => "minor",
            Scale::MinorHarmonic => "minor_harmonic",
            Scale::Pentatonic => "pentatonic",
            Scale::TrapDark => "trap_dark",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Scale {
    type Err = ParseScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "chromatic" | "chrom" => Ok(Scale::Chromatic),
            "major" | "maj" | "ionian" => Ok(Scale::Major),
            "minor" | "min" | "aeolian" | "naturalminor" => Ok(Scale::Minor),
            "minorharmonic" | "harmonicminor" | "harmonic" => Ok(Scale::MinorHarmonic),
            "pentatonic" | "penta" => Ok(Scale::Pentatonic),
            "trapdark" | "trap" | "dark" | "phrygian" => Ok(Scale::TrapDark),
            _ => Err(ParseScaleError(s.trim().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_are_ascending_and_in_range() {
        for scale in Scale::ALL {
            let set = scale.semitones();
            assert_eq!(set[0], 0, "{} must contain the root", scale);
            assert!(set.windows(2).all(|w| w[0] < w[1]), "{} not ascending", scale);
            assert!(set.iter().all(|&s| s < 12));
        }
    }

    #[test]
    fn test_major_set() {
        assert_eq!(Scale::Major.semitones(), &[0, 2, 4, 5, 7, 9, 11]);
        assert!(Scale::Major.contains(9));
        assert!(!Scale::Major.contains(10));
    }

    #[test]
    fn test_nearest_degree_tie_picks_lower() {
        // 10 sits between 9 and 11
        assert_eq!(Scale::Major.nearest_degree(10), (9, 1));
        // 1 sits between 0 and 2
        assert_eq!(Scale::Major.nearest_degree(1), (0, 1));
    }

    #[test]
    fn test_nearest_degree_wraps_around_octave() {
        // 11 is one semitone below the root on the circle
        assert_eq!(Scale::Pentatonic.nearest_degree(11), (0, 1));
        assert_eq!(Scale::Chromatic.nearest_degree(7), (7, 0));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("MAJOR".parse::<Scale>(), Ok(Scale::Major));
        assert_eq!("minor_harmonic".parse::<Scale>(), Ok(Scale::MinorHarmonic));
        assert_eq!("harmonic-minor".parse::<Scale>(), Ok(Scale::MinorHarmonic));
        assert_eq!("Trap Dark".parse::<Scale>(), Ok(Scale::TrapDark));
        assert!("lydian".parse::<Scale>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for scale in Scale::ALL {
            assert_eq!(scale.to_string().parse::<Scale>(), Ok(scale));
        }
    }
}
