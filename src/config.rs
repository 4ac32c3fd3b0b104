use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::difficulty::Difficulty;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom cache directory (overrides XDG default).
    pub cache_dir: Option<PathBuf>,
    /// Number of parallel analysis workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Signal-processing parameters for the analysis pipeline.
    pub analysis: AnalysisConfig,
    /// Playfield geometry shared by chart generation and judgment.
    pub playfield: PlayfieldConfig,
    /// Defaults for new play sessions.
    pub session: SessionConfig,
}

/// Analysis parameters. Changing these does not invalidate existing cache
/// records; run `clear-cache` after tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rate decoded audio is resampled to before analysis.
    pub sample_rate: u32,
    /// Hop between onset/RMS frames in samples (~5.8ms at 22050 Hz).
    pub hop_length: usize,
    /// FFT size for onset-strength spectrograms.
    pub fft_size: usize,
    /// FFT size and hop used for harmonic/percussive separation.
    pub hpss_fft_size: usize,
    pub hpss_hop: usize,
    /// Median filter width (frames and bins) for separation.
    pub hpss_kernel: usize,
    /// Mel bands aggregated by the onset-strength function.
    pub n_mels: usize,
    /// Peak-picking threshold for percussive onsets (lower = more onsets).
    pub percussive_delta: f32,
    /// Peak-picking threshold for harmonic onsets. Kept above the percussive
    /// threshold so sustained vibrato does not retrigger.
    pub harmonic_delta: f32,
    /// RMS frame length in samples.
    pub rms_frame: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            hop_length: 128,
            fft_size: 2048,
            hpss_fft_size: 2048,
            hpss_hop: 512,
            hpss_kernel: 31,
            n_mels: 128,
            percussive_delta: 0.05,
            harmonic_delta: 0.10,
            rms_frame: 2048,
        }
    }
}

/// Playfield geometry in screen units. Passed by value into every component
/// that needs it; never mutated after construction.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct PlayfieldConfig {
    pub screen_height: f64,
    /// Hit line sits this far above the bottom edge.
    pub hit_line_offset: f64,
    /// A note is missed once it passes this far above the bottom edge.
    pub miss_line_offset: f64,
    pub tile_height: f64,
    pub tile_padding: f64,
    /// Maximum distance from the hit line that a press can claim a note.
    pub hit_tolerance: f64,
    /// Distance below which a press is judged Perfect.
    pub perfect_window: f64,
}

impl Default for PlayfieldConfig {
    fn default() -> Self {
        Self {
            screen_height: 800.0,
            hit_line_offset: 150.0,
            miss_line_offset: 100.0,
            tile_height: 130.0,
            tile_padding: 10.0,
            hit_tolerance: 100.0,
            perfect_window: 25.0,
        }
    }
}

impl PlayfieldConfig {
    pub fn hit_line_y(&self) -> f64 {
        self.screen_height - self.hit_line_offset
    }

    pub fn miss_line_y(&self) -> f64 {
        self.screen_height - self.miss_line_offset
    }

    /// Rendered tile height plus padding: the spacing two notes in one lane
    /// need to never overlap on screen.
    pub fn note_visual_height(&self) -> f64 {
        self.tile_height + self.tile_padding
    }
}

/// Per-session options supplied by the menu layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub difficulty: Difficulty,
    /// Fixed scroll speed override; `None` uses the difficulty table.
    pub speed: Option<u32>,
    /// Chord probability override in [0, 1]; `None` uses the difficulty default.
    pub chord_chance: Option<f64>,
    /// Probability in [0, 1] that a note becomes a hold.
    pub hold_chance: f64,
    /// Modulate scroll speed with the track's energy envelope.
    pub smart_speed: bool,
    /// Read by the presentation layer only.
    pub show_combo: bool,
    /// Pins chord/hold placement; `None` derives a seed from the clock.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Normal,
            speed: None,
            chord_chance: None,
            hold_chance: 0.15,
            smart_speed: false,
            show_combo: true,
            seed: None,
        }
    }
}

impl SessionConfig {
    /// Scroll speed used for fixed mode and for chart spacing.
    pub fn scroll_speed(&self) -> f64 {
        self.speed
            .map(f64::from)
            .unwrap_or_else(|| self.difficulty.base_speed())
    }

    pub fn chord_chance(&self) -> f64 {
        self.chord_chance
            .unwrap_or_else(|| self.difficulty.default_chord_chance())
            .clamp(0.0, 1.0)
    }

    pub fn hold_chance(&self) -> f64 {
        self.hold_chance.clamp(0.0, 1.0)
    }
}

impl AppConfig {
    /// Load config from `~/.config/beatlane/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to parse {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!(
                        "Failed to read {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default analysis cache directory using XDG data directory.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        dirs.data_dir().join("cache")
    } else {
        // Fallback: current directory
        PathBuf::from("beatlane-cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.cache_dir.is_none());
        assert_eq!(config.workers, 0);
        assert_eq!(config.analysis.hop_length, 128);
        assert!((config.session.hold_chance - 0.15).abs() < 1e-12);
        assert!(config.session.show_combo);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = AppConfig::parse(
            r#"
            workers = 3

            [session]
            difficulty = "Insane"
            smart_speed = true

            [playfield]
            screen_height = 1080.0
            "#,
        )
        .unwrap();
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.session.difficulty, Difficulty::Insane);
        assert!(config.session.smart_speed);
        assert!((config.playfield.screen_height - 1080.0).abs() < 1e-9);
        assert!((config.playfield.hit_line_y() - 930.0).abs() < 1e-9);
        assert!((config.analysis.harmonic_delta - 0.10).abs() < 1e-6);
    }

    #[test]
    fn test_session_scroll_speed_override() {
        let mut session = SessionConfig::default();
        assert!((session.scroll_speed() - 500.0).abs() < 1e-9);
        session.speed = Some(800);
        assert!((session.scroll_speed() - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_chances_are_clamped() {
        let session = SessionConfig {
            chord_chance: Some(1.7),
            hold_chance: -0.3,
            ..SessionConfig::default()
        };
        assert!((session.chord_chance() - 1.0).abs() < 1e-12);
        assert_eq!(session.hold_chance(), 0.0);
    }

    #[test]
    fn test_playfield_geometry() {
        let pf = PlayfieldConfig::default();
        assert!((pf.hit_line_y() - 650.0).abs() < 1e-9);
        assert!((pf.miss_line_y() - 700.0).abs() < 1e-9);
        assert!((pf.note_visual_height() - 140.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_workers_auto() {
        let config = AppConfig::default();
        assert!(config.resolve_workers() >= 1);
    }
}
