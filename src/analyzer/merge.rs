use crate::difficulty::Difficulty;

use super::features::AudioFeatures;

/// Combine the beat pulse with the onset layers the difficulty calls for.
/// Output is sorted ascending with exact duplicates removed.
pub fn merge_events(features: &AudioFeatures, difficulty: Difficulty) -> Vec<f64> {
    let harmonic: &[f64] = if difficulty.includes_harmonic() {
        &features.harmonic_onsets
    } else {
        &[]
    };
    merge_layers(&[&features.beats, &features.percussive_onsets, harmonic])
}

/// Concatenate, drop non-finite or negative times, sort and dedup.
pub fn merge_layers(layers: &[&[f64]]) -> Vec<f64> {
    let mut events: Vec<f64> = layers
        .iter()
        .flat_map(|layer| layer.iter().copied())
        .filter(|t| t.is_finite() && *t >= 0.0)
        .collect();
    events.sort_by(|a, b| a.total_cmp(b));
    events.dedup();
    events
}
