//! Onset-strength envelopes and onset picking.
//!
//! The envelope is the positive first difference of a log-power mel
//! spectrogram, aggregated across mel bands. Peak picking follows the
//! usual pre/post max + mean threshold recipe with a refractory wait, then
//! each onset is moved back to the preceding energy minimum so the note
//! lands on the attack rather than its peak.

use super::spectrum::{MelBank, magnitude_stft};

/// Dynamic range kept by the dB conversion.
const TOP_DB: f32 = 80.0;

/// How per-band flux values are combined into one strength per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Robust to a single loud band: good for transients.
    Median,
    /// Picks up melodic changes confined to a few bands.
    Mean,
}

/// Onset strength per hop frame.
pub fn onset_strength(
    signal: &[f32],
    sample_rate: u32,
    fft_size: usize,
    hop: usize,
    n_mels: usize,
    aggregate: Aggregate,
) -> Vec<f32> {
    let mags = magnitude_stft(signal, fft_size, hop);
    if mags.is_empty() {
        return vec![];
    }
    let bank = MelBank::new(sample_rate, fft_size, n_mels);
    let mut mel_db: Vec<Vec<f32>> = mags.iter().map(|frame| bank.apply(frame)).collect();
    power_to_db(&mut mel_db);

    let mut envelope = Vec::with_capacity(mel_db.len());
    envelope.push(0.0);
    let mut flux = Vec::with_capacity(n_mels);
    for pair in mel_db.windows(2) {
        flux.clear();
        flux.extend(
            pair[1]
                .iter()
                .zip(pair[0].iter())
                .map(|(cur, prev)| (cur - prev).max(0.0)),
        );
        envelope.push(combine(&mut flux, aggregate));
    }
    envelope
}

/// In-place `10 * log10(power / max)` clipped to `TOP_DB` below the peak.
fn power_to_db(frames: &mut [Vec<f32>]) {
    let peak = frames
        .iter()
        .flat_map(|f| f.iter())
        .fold(0.0f32, |m, &v| m.max(v))
        .max(1e-10);
    let ref_db = 10.0 * peak.log10();
    for frame in frames.iter_mut() {
        for v in frame.iter_mut() {
            *v = (10.0 * v.max(1e-10).log10() - ref_db).max(-TOP_DB);
        }
    }
}

fn combine(values: &mut [f32], aggregate: Aggregate) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    match aggregate {
        Aggregate::Mean => values.iter().sum::<f32>() / values.len() as f32,
        Aggregate::Median => {
            values.sort_unstable_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) * 0.5
            } else {
                values[mid]
            }
        }
    }
}

/// Peak-picking windows, in frames.
#[derive(Debug, Clone, Copy)]
pub struct PeakParams {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    pub wait: usize,
    pub delta: f32,
}

impl PeakParams {
    /// 30ms max window, 100ms averaging windows and a 30ms refractory wait.
    pub fn for_rate(sample_rate: u32, hop: usize, delta: f32) -> Self {
        let frames = |secs: f64| (secs * sample_rate as f64 / hop.max(1) as f64) as usize;
        Self {
            pre_max: frames(0.03),
            post_max: 1,
            pre_avg: frames(0.10),
            post_avg: frames(0.10) + 1,
            wait: frames(0.03),
            delta,
        }
    }
}

/// Indices of peaks in `envelope`. The envelope is min-max normalised first
/// so `delta` is relative to the track's own dynamic range.
pub fn pick_peaks(envelope: &[f32], params: &PeakParams) -> Vec<usize> {
    let n = envelope.len();
    if n == 0 {
        return vec![];
    }
    let (lo, hi) = envelope
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if range <= f32::EPSILON {
        return vec![];
    }
    let norm: Vec<f32> = envelope.iter().map(|v| (v - lo) / range).collect();

    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;
    for i in 0..n {
        let max_start = i.saturating_sub(params.pre_max);
        let max_end = (i + params.post_max.max(1)).min(n);
        let local_max = norm[max_start..max_end]
            .iter()
            .fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        if norm[i] < local_max {
            continue;
        }

        let avg_start = i.saturating_sub(params.pre_avg);
        let avg_end = (i + params.post_avg.max(1)).min(n);
        let window = &norm[avg_start..avg_end];
        let mean = window.iter().sum::<f32>() / window.len() as f32;
        if norm[i] < mean + params.delta {
            continue;
        }

        if last.is_some_and(|prev| i - prev <= params.wait) {
            continue;
        }
        peaks.push(i);
        last = Some(i);
    }
    peaks
}

/// Move each onset back to the nearest local minimum of `energy` at or
/// before it.
pub fn backtrack(onsets: &[usize], energy: &[f32]) -> Vec<usize> {
    let minima: Vec<usize> = (1..energy.len().saturating_sub(1))
        .filter(|&i| energy[i] <= energy[i - 1] && energy[i] < energy[i + 1])
        .collect();

    onsets
        .iter()
        .map(|&onset| {
            let pos = minima.partition_point(|&m| m <= onset);
            if pos == 0 { 0 } else { minima[pos - 1] }
        })
        .collect()
}

/// Onset times in seconds: strength envelope, peaks, backtrack.
pub fn detect_onsets(
    signal: &[f32],
    sample_rate: u32,
    fft_size: usize,
    hop: usize,
    n_mels: usize,
    aggregate: Aggregate,
    delta: f32,
) -> Vec<f64> {
    let envelope = onset_strength(signal, sample_rate, fft_size, hop, n_mels, aggregate);
    onsets_from_envelope(&envelope, sample_rate, hop, delta)
}

/// Peak-pick and backtrack an already computed onset envelope.
pub fn onsets_from_envelope(envelope: &[f32], sample_rate: u32, hop: usize, delta: f32) -> Vec<f64> {
    let params = PeakParams::for_rate(sample_rate, hop, delta);
    let peaks = pick_peaks(envelope, &params);
    let mut frames = backtrack(&peaks, envelope);
    frames.dedup();
    frames
        .into_iter()
        .map(|f| frames_to_time(f, sample_rate, hop))
        .collect()
}

pub fn frames_to_time(frame: usize, sample_rate: u32, hop: usize) -> f64 {
    frame as f64 * hop as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(sample_rate: u32, secs: f32, period: f32) -> Vec<f32> {
        let len = (sample_rate as f32 * secs) as usize;
        let step = (sample_rate as f32 * period) as usize;
        let mut out = vec![0.0f32; len];
        for start in (step / 2..len).step_by(step) {
            // 10ms decaying noise burst
            for (k, sample) in out[start..(start + 220).min(len)].iter_mut().enumerate() {
                let noise = ((k * 7919) % 97) as f32 / 48.5 - 1.0;
                *sample = noise * (1.0 - k as f32 / 220.0);
            }
        }
        out
    }

    #[test]
    fn test_combine_median_and_mean() {
        let mut v = vec![4.0, 1.0, 3.0, 2.0];
        assert!((combine(&mut v.clone(), Aggregate::Mean) - 2.5).abs() < 1e-6);
        assert!((combine(&mut v, Aggregate::Median) - 2.5).abs() < 1e-6);
        let mut odd = vec![9.0, 1.0, 2.0];
        assert!((combine(&mut odd, Aggregate::Median) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_peak_params_scale_with_rate() {
        let p = PeakParams::for_rate(22050, 128, 0.05);
        assert_eq!(p.pre_max, 5);
        assert_eq!(p.pre_avg, 17);
        assert_eq!(p.post_avg, 18);
        assert_eq!(p.wait, 5);
    }

    #[test]
    fn test_pick_peaks_isolated_spikes() {
        let mut env = vec![0.0f32; 200];
        env[50] = 1.0;
        env[120] = 0.8;
        let params = PeakParams {
            pre_max: 3,
            post_max: 1,
            pre_avg: 10,
            post_avg: 11,
            wait: 3,
            delta: 0.05,
        };
        assert_eq!(pick_peaks(&env, &params), vec![50, 120]);
    }

    #[test]
    fn test_pick_peaks_flat_is_empty() {
        let params = PeakParams::for_rate(22050, 128, 0.05);
        assert!(pick_peaks(&[0.3; 64], &params).is_empty());
        assert!(pick_peaks(&[], &params).is_empty());
    }

    #[test]
    fn test_pick_peaks_respects_wait() {
        let mut env = vec![0.0f32; 100];
        env[40] = 1.0;
        env[42] = 1.0;
        let params = PeakParams {
            pre_max: 1,
            post_max: 1,
            pre_avg: 5,
            post_avg: 6,
            wait: 5,
            delta: 0.01,
        };
        assert_eq!(pick_peaks(&env, &params), vec![40]);
    }

    #[test]
    fn test_backtrack_to_preceding_minimum() {
        let energy = [0.5, 0.2, 0.4, 0.9, 0.3, 0.1, 0.6, 1.0];
        assert_eq!(backtrack(&[3, 7], &energy), vec![1, 5]);
        assert_eq!(backtrack(&[0], &energy), vec![0]);
    }

    #[test]
    fn test_detect_onsets_on_clicks() {
        let sr = 22050;
        let signal = click_track(sr, 4.0, 0.5);
        let onsets = detect_onsets(&signal, sr, 1024, 128, 64, Aggregate::Median, 0.05);
        assert!(onsets.len() >= 6, "expected ~8 onsets, got {:?}", onsets);
        // Every click starts at 0.25 + k*0.5s.
        for t in &onsets {
            let phase = (t - 0.25).rem_euclid(0.5);
            let off = phase.min(0.5 - phase);
            assert!(off < 0.06, "onset {} is {}s off the grid", t, off);
        }
    }

    #[test]
    fn test_onset_strength_silence_is_zero() {
        let env = onset_strength(&vec![0.0; 4096], 22050, 1024, 128, 32, Aggregate::Mean);
        assert_eq!(env.len(), 4096 / 128 + 1);
        assert!(env.iter().all(|&v| v.abs() < 1e-6));
    }
}
