//! Tempo estimation and dynamic-programming beat tracking over an onset
//! strength envelope.

/// Tempo search range in BPM.
const MIN_BPM: f64 = 30.0;
const MAX_BPM: f64 = 300.0;
/// Centre of the log-normal tempo prior.
const PRIOR_BPM: f64 = 120.0;
/// Prior width in octaves.
const PRIOR_STD_OCTAVES: f64 = 1.0;
/// How strongly the tracker penalises deviation from the estimated period.
pub const TIGHTNESS: f64 = 100.0;

/// Beat tracker output.
#[derive(Debug, Clone, Default)]
pub struct BeatTrack {
    pub tempo: f64,
    /// Beat positions in frames, ascending.
    pub frames: Vec<usize>,
}

/// Global tempo estimate in BPM: autocorrelation of the envelope, weighted
/// by a log-normal prior centred on 120 BPM. Returns 0 when the envelope is
/// too short or silent.
pub fn estimate_tempo(envelope: &[f32], sample_rate: u32, hop: usize) -> f64 {
    let frame_rate = sample_rate as f64 / hop.max(1) as f64;
    let min_lag = (60.0 * frame_rate / MAX_BPM).floor().max(1.0) as usize;
    let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if envelope.len() <= min_lag + 1 {
        return 0.0;
    }
    let max_lag = max_lag.min(envelope.len() - 1);

    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / envelope.len() as f64;
    let centred: Vec<f64> = envelope.iter().map(|&v| v as f64 - mean).collect();

    let mut best_lag = 0;
    let mut best_score = 0.0;
    for lag in min_lag..=max_lag {
        let ac: f64 = centred[lag..]
            .iter()
            .zip(centred.iter())
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / (centred.len() - lag) as f64;
        if ac <= 0.0 {
            continue;
        }
        let bpm = 60.0 * frame_rate / lag as f64;
        let octaves = (bpm / PRIOR_BPM).log2() / PRIOR_STD_OCTAVES;
        let score = ac * (-0.5 * octaves * octaves).exp();
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    if best_lag == 0 {
        0.0
    } else {
        60.0 * frame_rate / best_lag as f64
    }
}

/// Track beats through `envelope` at the given tempo.
pub fn track_beats(envelope: &[f32], tempo: f64, sample_rate: u32, hop: usize) -> Vec<usize> {
    let n = envelope.len();
    if n == 0 || tempo <= 0.0 {
        return vec![];
    }
    let frame_rate = sample_rate as f64 / hop.max(1) as f64;
    let period = 60.0 * frame_rate / tempo;
    if period < 1.0 || period as usize >= n {
        return vec![];
    }

    let local = local_score(envelope, period);
    let (cumscore, backlink) = dynamic_program(&local, period);

    let Some(mut beat) = last_beat(&cumscore) else {
        return vec![];
    };
    let mut beats = vec![beat];
    while let Some(prev) = backlink[beat] {
        beats.push(prev);
        beat = prev;
    }
    beats.reverse();
    trim_beats(&local, beats)
}

/// Convenience wrapper: tempo then beats.
pub fn beat_track(envelope: &[f32], sample_rate: u32, hop: usize) -> BeatTrack {
    let tempo = estimate_tempo(envelope, sample_rate, hop);
    let frames = track_beats(envelope, tempo, sample_rate, hop);
    BeatTrack { tempo, frames }
}

/// Envelope normalised by its standard deviation and smoothed with a
/// Gaussian about one period wide.
fn local_score(envelope: &[f32], period: f64) -> Vec<f64> {
    let n = envelope.len();
    let mean = envelope.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = envelope
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let std = var.sqrt();
    let norm: Vec<f64> = envelope
        .iter()
        .map(|&v| if std > 0.0 { v as f64 / std } else { 0.0 })
        .collect();

    let radius = period.round() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 * 32.0 / period).powi(2)).exp())
        .collect();

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(j, w)| {
                    let idx = i + j as isize - radius;
                    (idx >= 0 && (idx as usize) < n).then(|| w * norm[idx as usize])
                })
                .sum()
        })
        .collect()
}

/// Cumulative beat score and best-predecessor links. The predecessor of
/// frame `i` is searched in `[i - 2P, i - P/2]` with a log-squared penalty
/// on deviation from the period `P`.
fn dynamic_program(local: &[f64], period: f64) -> (Vec<f64>, Vec<Option<usize>>) {
    let n = local.len();
    let max_back = (2.0 * period).round() as usize;
    let min_back = ((period / 2.0).round() as usize).max(1);
    let penalties: Vec<f64> = (min_back..=max_back)
        .map(|back| -TIGHTNESS * (back as f64 / period).ln().powi(2))
        .collect();

    let mut cumscore = vec![0.0; n];
    let mut backlink = vec![None; n];
    let threshold = 0.01 * local.iter().cloned().fold(0.0, f64::max);
    let mut first_beat_found = false;

    for i in 0..n {
        let mut best: Option<(usize, f64)> = None;
        for (back, penalty) in (min_back..=max_back).zip(penalties.iter()) {
            if back > i {
                break;
            }
            let j = i - back;
            let candidate = cumscore[j] + penalty;
            if best.is_none_or(|(_, s)| candidate > s) {
                best = Some((j, candidate));
            }
        }
        match best {
            Some((j, score)) if first_beat_found => {
                cumscore[i] = local[i] + score;
                backlink[i] = Some(j);
            }
            _ => {
                cumscore[i] = local[i];
            }
        }
        if !first_beat_found && local[i] > threshold {
            first_beat_found = true;
        }
    }
    (cumscore, backlink)
}

/// Last local maximum of the cumulative score that reaches half the median
/// of all local maxima.
fn last_beat(cumscore: &[f64]) -> Option<usize> {
    let n = cumscore.len();
    let maxima: Vec<usize> = (0..n)
        .filter(|&i| {
            let left = i == 0 || cumscore[i] > cumscore[i - 1];
            let right = i + 1 == n || cumscore[i] >= cumscore[i + 1];
            left && right
        })
        .collect();
    if maxima.is_empty() {
        return None;
    }
    let mut values: Vec<f64> = maxima.iter().map(|&i| cumscore[i]).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let median = values[values.len() / 2];
    maxima.into_iter().rev().find(|&i| cumscore[i] >= 0.5 * median)
}

/// Drop weak beats at the edges where the tracker extrapolated through
/// silence.
fn trim_beats(local: &[f64], beats: Vec<usize>) -> Vec<usize> {
    if beats.len() < 3 {
        return beats;
    }
    const WINDOW: [f64; 5] = [0.0, 0.5, 1.0, 0.5, 0.0];
    let strengths: Vec<f64> = beats.iter().map(|&b| local[b]).collect();
    let smoothed: Vec<f64> = (0..strengths.len() as isize)
        .map(|i| {
            WINDOW
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let idx = i + k as isize - 2;
                    (idx >= 0 && (idx as usize) < strengths.len()).then(|| w * strengths[idx as usize])
                })
                .sum()
        })
        .collect();
    let rms = (smoothed.iter().map(|v| v * v).sum::<f64>() / smoothed.len() as f64).sqrt();
    let threshold = 0.5 * rms;

    let Some(first) = smoothed.iter().position(|&v| v > threshold) else {
        return vec![];
    };
    let last = smoothed.iter().rposition(|&v| v > threshold).unwrap_or(first);
    beats[first..=last].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;
    const HOP: usize = 128;

    /// Impulse envelope at the given BPM.
    fn pulse_envelope(bpm: f64, secs: f64) -> Vec<f32> {
        let frame_rate = SR as f64 / HOP as f64;
        let n = (secs * frame_rate) as usize;
        let period = 60.0 * frame_rate / bpm;
        let mut env = vec![0.0f32; n];
        let mut t = period / 2.0;
        while (t as usize) < n {
            env[t as usize] = 1.0;
            if (t as usize) + 1 < n {
                env[t as usize + 1] = 0.5;
            }
            t += period;
        }
        env
    }

    #[test]
    fn test_estimate_tempo_120() {
        let env = pulse_envelope(120.0, 20.0);
        let tempo = estimate_tempo(&env, SR, HOP);
        assert!((tempo - 120.0).abs() < 3.0, "tempo {}", tempo);
    }

    #[test]
    fn test_estimate_tempo_prefers_prior_octave() {
        // 100 BPM should not be reported as 50 or 200.
        let env = pulse_envelope(100.0, 20.0);
        let tempo = estimate_tempo(&env, SR, HOP);
        assert!((tempo - 100.0).abs() < 3.0, "tempo {}", tempo);
    }

    #[test]
    fn test_estimate_tempo_silence() {
        assert_eq!(estimate_tempo(&vec![0.0; 2000], SR, HOP), 0.0);
        assert_eq!(estimate_tempo(&[], SR, HOP), 0.0);
    }

    #[test]
    fn test_track_beats_follows_pulse() {
        let env = pulse_envelope(120.0, 12.0);
        let track = beat_track(&env, SR, HOP);
        assert!(track.frames.len() >= 18, "beats: {:?}", track.frames);
        let frame_rate = SR as f64 / HOP as f64;
        for pair in track.frames.windows(2) {
            let interval = (pair[1] - pair[0]) as f64 / frame_rate;
            assert!((interval - 0.5).abs() < 0.03, "interval {}", interval);
        }
        assert!(track.frames.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_track_beats_degenerate_inputs() {
        assert!(track_beats(&[], 120.0, SR, HOP).is_empty());
        assert!(track_beats(&[1.0; 50], 0.0, SR, HOP).is_empty());
    }

    #[test]
    fn test_trim_beats_drops_silent_edges() {
        let mut local = vec![0.0; 100];
        for b in [30, 40, 50, 60] {
            local[b] = 1.0;
        }
        let beats = vec![10, 20, 30, 40, 50, 60, 70, 80];
        let trimmed = trim_beats(&local, beats);
        assert_eq!(trimmed.first(), Some(&30));
        assert_eq!(trimmed.last(), Some(&60));
    }
}
