pub mod beat;
pub mod decode;
pub mod density;
pub mod energy;
pub mod features;
pub mod merge;
pub mod onset;
pub mod spectrum;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::difficulty::Difficulty;
use features::AudioFeatures;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Analysis cancelled")]
    Cancelled,
    #[error("Track too short to analyze ({0:.2}s)")]
    TooShort(f64),
}

/// Progress sink: `(percent, status message)`.
pub type Progress<'a> = &'a mut dyn FnMut(u8, &str);

/// Shared stop flag polled between analysis stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), AnalyzeError> {
        if self.is_cancelled() {
            Err(AnalyzeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Synthetic timeline used when a track cannot be analyzed: one event
/// every half second from 0.5s to 49.5s.
const FALLBACK_SPACING: f64 = 0.5;
const FALLBACK_EVENTS: usize = 99;

/// Chart-ready analysis of one (track, difficulty). Always carries all three
/// fields; the energy profile is empty when unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Strictly increasing event times in seconds.
    pub events: Vec<f64>,
    /// Start of the loudest stretch, for song previews.
    pub preview_start: f64,
    /// `(time, energy)` samples every 0.2s, energy in [0, 1].
    #[serde(default)]
    pub energy_profile: Vec<(f64, f64)>,
}

impl AnalysisResult {
    pub fn fallback() -> Self {
        Self {
            events: (1..=FALLBACK_EVENTS)
                .map(|i| i as f64 * FALLBACK_SPACING)
                .collect(),
            preview_start: 0.0,
            energy_profile: Vec::new(),
        }
    }

    pub fn last_event_time(&self) -> Option<f64> {
        self.events.last().copied()
    }
}

/// Merge and thin the feature layers for one difficulty.
pub fn build_result(features: &AudioFeatures, difficulty: Difficulty) -> AnalysisResult {
    let merged = merge::merge_events(features, difficulty);
    let events = density::filter_density(&merged, difficulty, |t| features.energy.energy_at(t));
    log::debug!(
        "{}: {} merged events, {} after density filter",
        difficulty,
        merged.len(),
        events.len()
    );
    AnalysisResult {
        events,
        preview_start: features.energy.climax_start(features.duration),
        energy_profile: features.energy.profile(features.duration),
    }
}

/// Full pipeline for a single difficulty: decode, extract, merge, filter.
pub fn analyze_file(
    path: &Path,
    difficulty: Difficulty,
    config: &AnalysisConfig,
    cancel: &CancelToken,
    progress: Progress<'_>,
) -> Result<AnalysisResult, AnalyzeError> {
    log::debug!(
        "Analyzing {} ({})",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?"),
        difficulty
    );
    let features = features::extract_file(path, config, cancel, &mut *progress)?;
    progress(80, "Finalizing...");
    let result = build_result(&features, difficulty);
    cancel.check()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy::EnergyEnvelope;

    #[test]
    fn test_fallback_timeline() {
        let fb = AnalysisResult::fallback();
        assert_eq!(fb.events.len(), 99);
        assert!((fb.events[0] - 0.5).abs() < 1e-12);
        assert!((fb.events[98] - 49.5).abs() < 1e-12);
        assert_eq!(fb.preview_start, 0.0);
        assert!(fb.energy_profile.is_empty());
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(AnalyzeError::Cancelled)));
    }

    #[test]
    fn test_build_result_per_difficulty() {
        let features = AudioFeatures {
            tempo: 120.0,
            beats: vec![1.0, 2.0, 3.0],
            percussive_onsets: vec![1.5, 2.05],
            harmonic_onsets: vec![2.5, 3.25],
            energy: EnergyEnvelope::from_values(vec![0.2; 400], 100, 1),
            duration: 4.0,
        };
        let normal = build_result(&features, Difficulty::Normal);
        assert_eq!(normal.events, vec![1.0, 1.5, 2.0, 3.0]);
        let hard = build_result(&features, Difficulty::Hard);
        assert_eq!(hard.events, vec![1.0, 1.5, 2.0, 2.5, 3.0]);
        assert_eq!(hard.energy_profile.len(), 20);
        assert_eq!(hard.preview_start, 0.0);
    }

    #[test]
    fn test_result_json_defaults_missing_profile() {
        let r: AnalysisResult =
            serde_json::from_str(r#"{"events":[1.0,2.0],"preview_start":0.0}"#).unwrap();
        assert!(r.energy_profile.is_empty());
        assert_eq!(r.last_event_time(), Some(2.0));
    }
}
