use std::path::Path;

use crate::config::AnalysisConfig;

use super::beat::{self, BeatTrack};
use super::decode::{self, MonoAudio};
use super::energy::EnergyEnvelope;
use super::onset::{self, Aggregate};
use super::spectrum;
use super::{AnalyzeError, CancelToken, Progress};

/// Everything the per-difficulty stages need from one pass over a track.
/// Computed once and shared by all difficulties.
#[derive(Debug, Clone, Default)]
pub struct AudioFeatures {
    pub tempo: f64,
    /// Pulse tracked on the percussive layer, seconds.
    pub beats: Vec<f64>,
    /// Onsets of the percussive layer, seconds.
    pub percussive_onsets: Vec<f64>,
    /// Onsets of the harmonic layer, seconds.
    pub harmonic_onsets: Vec<f64>,
    pub energy: EnergyEnvelope,
    pub duration: f64,
}

/// Decode `path` and extract its features.
pub fn extract_file(
    path: &Path,
    config: &AnalysisConfig,
    cancel: &CancelToken,
    progress: Progress<'_>,
) -> Result<AudioFeatures, AnalyzeError> {
    progress(10, "Loading audio...");
    let audio = decode::load_audio(path, config.sample_rate)?;
    cancel.check()?;
    extract(&audio, config, cancel, progress)
}

/// Pulse, separated onset layers and energy envelope of a decoded track.
/// Checks `cancel` between stages.
pub fn extract(
    audio: &MonoAudio,
    config: &AnalysisConfig,
    cancel: &CancelToken,
    progress: Progress<'_>,
) -> Result<AudioFeatures, AnalyzeError> {
    let sr = audio.sample_rate;
    let hop = config.hop_length;
    if audio.samples.len() < config.fft_size {
        return Err(AnalyzeError::TooShort(audio.duration()));
    }

    progress(30, "Analyzing rhythm...");
    let mix_env = onset::onset_strength(
        &audio.samples,
        sr,
        config.fft_size,
        hop,
        config.n_mels,
        Aggregate::Median,
    );
    let mix_track = beat::beat_track(&mix_env, sr, hop);
    log::debug!(
        "Mix tempo {:.1} BPM, {} beats",
        mix_track.tempo,
        mix_track.frames.len()
    );
    cancel.check()?;

    progress(40, "Separating instruments...");
    let (harmonic, percussive) = spectrum::hpss(
        &audio.samples,
        config.hpss_fft_size,
        config.hpss_hop,
        config.hpss_kernel,
    );
    cancel.check()?;

    progress(50, "Detecting percussion...");
    let percussive_env = onset::onset_strength(
        &percussive,
        sr,
        config.fft_size,
        hop,
        config.n_mels,
        Aggregate::Median,
    );
    let percussive_onsets =
        onset::onsets_from_envelope(&percussive_env, sr, hop, config.percussive_delta);
    log::debug!("{} percussive onsets", percussive_onsets.len());
    cancel.check()?;

    progress(60, "Detecting melody...");
    let harmonic_onsets = onset::detect_onsets(
        &harmonic,
        sr,
        config.fft_size,
        hop,
        config.n_mels,
        Aggregate::Mean,
        config.harmonic_delta,
    );
    log::debug!("{} harmonic onsets", harmonic_onsets.len());
    cancel.check()?;

    progress(70, "Synchronizing layers...");
    let track = pulse_track(&percussive_env, mix_track, sr, hop);
    let beats: Vec<f64> = track
        .frames
        .iter()
        .map(|&f| onset::frames_to_time(f, sr, hop))
        .collect();
    log::debug!("Tempo {:.1} BPM, {} beats", track.tempo, beats.len());
    let energy = EnergyEnvelope::compute(&audio.samples, sr, config.rms_frame, hop);
    cancel.check()?;

    Ok(AudioFeatures {
        tempo: track.tempo,
        beats,
        percussive_onsets,
        harmonic_onsets,
        energy,
        duration: audio.duration(),
    })
}

/// Beats tracked on the percussive layer so the pulse lines up with the
/// percussive onsets it is merged with. Falls back to the full-mix pulse
/// when the percussive layer has no trackable beat.
fn pulse_track(percussive_env: &[f32], mix: BeatTrack, sr: u32, hop: usize) -> BeatTrack {
    let track = beat::beat_track(percussive_env, sr, hop);
    if track.frames.is_empty() {
        log::debug!("No percussive pulse, using the full mix");
        mix
    } else {
        track
    }
}
