use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Chart difficulty. Selects the event recipe, density, scroll speed and
/// chord/hold placement for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
    Insane,
    Impossible,
    God,
    Beyond,
}

impl Difficulty {
    pub const ALL: [Difficulty; 7] = [
        Difficulty::Easy,
        Difficulty::Normal,
        Difficulty::Hard,
        Difficulty::Insane,
        Difficulty::Impossible,
        Difficulty::God,
        Difficulty::Beyond,
    ];

    /// Stable label used in cache file names and on the command line.
    pub fn label(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Normal => "Normal",
            Self::Hard => "Hard",
            Self::Insane => "Insane",
            Self::Impossible => "Impossible",
            Self::God => "God",
            Self::Beyond => "Beyond",
        }
    }

    /// Minimum spacing (seconds) between surviving events before the energy
    /// relaxation and the hard floor are applied.
    pub fn base_interval(self) -> f64 {
        match self {
            Self::Easy => 0.80,
            Self::Normal => 0.50,
            Self::Hard => 0.35,
            Self::Insane => 0.25,
            Self::Impossible => 0.15,
            Self::God => 0.12,
            Self::Beyond => 0.08,
        }
    }

    /// Fixed scroll velocity in playfield units per second.
    pub fn base_speed(self) -> f64 {
        match self {
            Self::Easy => 350.0,
            Self::Normal => 500.0,
            Self::Hard => 700.0,
            Self::Insane => 900.0,
            Self::Impossible => 1200.0,
            Self::God => 1600.0,
            Self::Beyond => 2100.0,
        }
    }

    /// Probability that a timestamp becomes a chord when no override is set.
    pub fn default_chord_chance(self) -> f64 {
        match self {
            Self::God | Self::Beyond => 0.35,
            Self::Impossible | Self::Insane => 0.25,
            Self::Hard => 0.15,
            Self::Easy | Self::Normal => 0.05,
        }
    }

    pub fn max_chord(self) -> usize {
        match self {
            Self::Impossible | Self::God | Self::Beyond => 3,
            _ => 2,
        }
    }

    /// Easy and Normal stick to beats + percussion so charts stay readable.
    pub fn includes_harmonic(self) -> bool {
        !matches!(self, Self::Easy | Self::Normal)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown difficulty \"{}\"", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels_case_insensitive() {
        assert_eq!("normal".parse::<Difficulty>(), Ok(Difficulty::Normal));
        assert_eq!("BEYOND".parse::<Difficulty>(), Ok(Difficulty::Beyond));
        assert_eq!(" God ".parse::<Difficulty>(), Ok(Difficulty::God));
        assert!("expert".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_label_roundtrip() {
        for d in Difficulty::ALL {
            assert_eq!(d.label().parse::<Difficulty>(), Ok(d));
            assert_eq!(d.to_string(), d.label());
        }
    }

    #[test]
    fn test_harmonic_layer_recipe() {
        assert!(!Difficulty::Easy.includes_harmonic());
        assert!(!Difficulty::Normal.includes_harmonic());
        assert!(Difficulty::Hard.includes_harmonic());
        assert!(Difficulty::Beyond.includes_harmonic());
    }

    #[test]
    fn test_chord_tables() {
        assert_eq!(Difficulty::Hard.max_chord(), 2);
        assert_eq!(Difficulty::Impossible.max_chord(), 3);
        assert!((Difficulty::Insane.default_chord_chance() - 0.25).abs() < 1e-12);
        assert!((Difficulty::Normal.default_chord_chance() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_intervals_decrease_with_difficulty() {
        for pair in Difficulty::ALL.windows(2) {
            assert!(pair[0].base_interval() > pair[1].base_interval());
            assert!(pair[0].base_speed() < pair[1].base_speed());
        }
    }
}
