//! On-disk analysis cache: one JSON record per (track, difficulty).
//!
//! Records are keyed by the MD5 of the track's absolute path plus the
//! difficulty label, so renaming or moving a file triggers re-analysis.
//! Writes go through a temp file and a rename; concurrent writers of the
//! same key produce identical bytes, so last-writer-wins is fine.

use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;

use crate::analyzer::{self, AnalysisResult, AnalyzeError, CancelToken, Progress};
use crate::config::AnalysisConfig;
use crate::difficulty::Difficulty;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid cache record: {0}")]
    Invalid(String),
}

/// Whether a result came from disk or was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
pub struct AnalysisCache {
    dir: PathBuf,
}

impl AnalysisCache {
    /// Cache rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{md5(abspath)}_{Difficulty}.json`
    pub fn key(track: &Path, difficulty: Difficulty) -> String {
        let abs = std::path::absolute(track).unwrap_or_else(|_| track.to_path_buf());
        let digest = Md5::digest(abs.to_string_lossy().as_bytes());
        format!("{:x}_{}.json", digest, difficulty.label())
    }

    pub fn record_path(&self, track: &Path, difficulty: Difficulty) -> PathBuf {
        self.dir.join(Self::key(track, difficulty))
    }

    pub fn contains(&self, track: &Path, difficulty: Difficulty) -> bool {
        self.record_path(track, difficulty).is_file()
    }

    /// Read and validate a record. `Ok(None)` when absent.
    pub fn read(
        &self,
        track: &Path,
        difficulty: Difficulty,
    ) -> Result<Option<AnalysisResult>, CacheError> {
        let path = self.record_path(track, difficulty);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: AnalysisResult = serde_json::from_slice(&bytes)?;
        validate(&record)?;
        Ok(Some(record))
    }

    /// Cached result, treating unreadable or malformed records as misses.
    pub fn load(&self, track: &Path, difficulty: Difficulty) -> Option<AnalysisResult> {
        match self.read(track, difficulty) {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!(
                    "Ignoring cache record {}: {}",
                    self.record_path(track, difficulty).display(),
                    e
                );
                None
            }
        }
    }

    pub fn store(
        &self,
        track: &Path,
        difficulty: Difficulty,
        result: &AnalysisResult,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.record_path(track, difficulty);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(result)?)?;
        fs::rename(&tmp, &path)?;
        log::debug!("Cached {}", path.display());
        Ok(())
    }

    /// Return the cached record or compute, persist and return a new one.
    /// A failed write is logged and the computed result is still returned.
    pub fn get_or_insert_with<F>(
        &self,
        track: &Path,
        difficulty: Difficulty,
        compute: F,
    ) -> Result<(AnalysisResult, CacheStatus), AnalyzeError>
    where
        F: FnOnce() -> Result<AnalysisResult, AnalyzeError>,
    {
        if let Some(hit) = self.load(track, difficulty) {
            return Ok((hit, CacheStatus::Hit));
        }
        let result = compute()?;
        if let Err(e) = self.store(track, difficulty, &result) {
            log::warn!("Failed to cache {} ({}): {}", track.display(), difficulty, e);
        }
        Ok((result, CacheStatus::Miss))
    }

    /// Cached analysis for one difficulty, running the pipeline on a miss.
    ///
    /// Decode and analysis failures are logged and replaced by
    /// [`AnalysisResult::fallback`], which is never persisted. Cancellation
    /// propagates.
    pub fn get_or_analyze(
        &self,
        track: &Path,
        difficulty: Difficulty,
        config: &AnalysisConfig,
        cancel: &CancelToken,
        progress: Progress<'_>,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let outcome = self.get_or_insert_with(track, difficulty, || {
            let result = analyzer::analyze_file(track, difficulty, config, cancel, &mut *progress)?;
            progress(90, "Saving...");
            Ok(result)
        });
        match outcome {
            Ok((hit, CacheStatus::Hit)) => {
                progress(50, "Loading from cache...");
                progress(100, "Ready!");
                Ok(hit)
            }
            Ok((result, CacheStatus::Miss)) => {
                progress(100, "Ready!");
                Ok(result)
            }
            Err(AnalyzeError::Cancelled) => Err(AnalyzeError::Cancelled),
            Err(e) => {
                log::error!("Analysis failed for {}: {}", track.display(), e);
                progress(100, "Ready!");
                Ok(AnalysisResult::fallback())
            }
        }
    }

    /// Delete every cached record. Returns the number removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json") || n.ends_with(".json.tmp"));
            if is_record && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Structural checks applied before a record is trusted.
pub fn validate(record: &AnalysisResult) -> Result<(), CacheError> {
    if !record.preview_start.is_finite() || record.preview_start < 0.0 {
        return Err(CacheError::Invalid(format!(
            "preview_start {}",
            record.preview_start
        )));
    }
    if record.events.iter().any(|t| !t.is_finite()) {
        return Err(CacheError::Invalid("non-finite event time".into()));
    }
    if record.events.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CacheError::Invalid("events not strictly increasing".into()));
    }
    for &(t, e) in &record.energy_profile {
        if !t.is_finite() || !(0.0..=1.0).contains(&e) {
            return Err(CacheError::Invalid(format!("energy sample ({}, {})", t, e)));
        }
    }
    if record
        .energy_profile
        .windows(2)
        .any(|w| w[1].0 < w[0].0)
    {
        return Err(CacheError::Invalid("energy profile times decrease".into()));
    }
    Ok(())
}
