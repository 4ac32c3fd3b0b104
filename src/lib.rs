pub mod analyzer;
pub mod cache;
pub mod chart;
pub mod config;
pub mod difficulty;
pub mod play;
pub mod worker;

/// Audio file extensions we can decode for analysis
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac", "ogg", "mp3"];

/// Application name for XDG paths
pub const APP_NAME: &str = "beatlane";

/// Number of parallel input lanes on the playfield
pub const LANE_COUNT: usize = 4;
