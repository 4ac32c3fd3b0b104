//! Short-time spectral analysis: Hann windowing, magnitude STFT, a mel
//! filterbank for onset strength, and median-filter harmonic/percussive
//! separation.

use std::f64::consts::PI;

use rustfft::{FftPlanner, num_complex::Complex};

const COMPLEX_ZERO: Complex<f32> = Complex::new(0.0, 0.0);

/// Periodic Hann window (the STFT convention).
pub fn hann_window(size: usize) -> Vec<f32> {
    match size {
        0 => vec![],
        1 => vec![1.0],
        _ => (0..size)
            .map(|i| (0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos())) as f32)
            .collect(),
    }
}

/// Number of centered STFT frames for a signal of `len` samples.
pub fn frame_count(len: usize, hop: usize) -> usize {
    if hop == 0 { 0 } else { len / hop + 1 }
}

/// Reads `signal[idx]` with zero padding outside the signal.
#[inline]
fn padded(signal: &[f32], idx: isize) -> f32 {
    if idx < 0 {
        0.0
    } else {
        signal.get(idx as usize).copied().unwrap_or(0.0)
    }
}

/// Centered complex STFT: frame `t` covers samples around `t * hop`.
/// Returns `num_frames` rows of `fft_size / 2 + 1` bins.
pub fn stft(signal: &[f32], fft_size: usize, hop: usize) -> Vec<Vec<Complex<f32>>> {
    let num_frames = frame_count(signal.len(), hop);
    if fft_size == 0 || num_frames == 0 {
        return vec![];
    }
    let num_bins = fft_size / 2 + 1;
    let half = (fft_size / 2) as isize;
    let window = hann_window(fft_size);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
    let mut buf = vec![COMPLEX_ZERO; fft_size];

    let mut frames = Vec::with_capacity(num_frames);
    for t in 0..num_frames {
        let start = (t * hop) as isize - half;
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = Complex::new(padded(signal, start + i as isize) * window[i], 0.0);
        }
        fft.process(&mut buf);
        frames.push(buf[..num_bins].to_vec());
    }
    frames
}

/// Magnitude STFT.
pub fn magnitude_stft(signal: &[f32], fft_size: usize, hop: usize) -> Vec<Vec<f32>> {
    stft(signal, fft_size, hop)
        .into_iter()
        .map(|frame| frame.iter().map(|c| c.norm()).collect())
        .collect()
}

/// Inverse of [`stft`] by weighted overlap-add, trimmed to `len` samples.
pub fn istft(frames: &[Vec<Complex<f32>>], fft_size: usize, hop: usize, len: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; len];
    if frames.is_empty() || fft_size == 0 {
        return out;
    }
    let num_bins = fft_size / 2 + 1;
    let half = (fft_size / 2) as isize;
    let window = hann_window(fft_size);
    let ifft = FftPlanner::<f32>::new().plan_fft_inverse(fft_size);
    let norm = 1.0 / fft_size as f32;
    let mut window_sum = vec![0.0f32; len];
    let mut buf = vec![COMPLEX_ZERO; fft_size];

    for (t, frame) in frames.iter().enumerate() {
        buf.fill(COMPLEX_ZERO);
        buf[..num_bins].copy_from_slice(&frame[..num_bins]);
        // Hermitian mirror so the inverse transform is real.
        for bin in 1..num_bins - 1 {
            buf[fft_size - bin] = frame[bin].conj();
        }
        ifft.process(&mut buf);

        let start = (t * hop) as isize - half;
        for (i, &w) in window.iter().enumerate() {
            let idx = start + i as isize;
            if idx < 0 || idx as usize >= len {
                continue;
            }
            let idx = idx as usize;
            out[idx] += buf[i].re * norm * w;
            window_sum[idx] += w * w;
        }
    }

    for (sample, &ws) in out.iter_mut().zip(window_sum.iter()) {
        if ws > 1e-8 {
            *sample /= ws;
        }
    }
    out
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank mapping `fft_size / 2 + 1` bins to `n_mels` bands.
#[derive(Debug, Clone)]
pub struct MelBank {
    /// Per band: first bin and the weights starting at that bin.
    filters: Vec<(usize, Vec<f32>)>,
}

impl MelBank {
    pub fn new(sample_rate: u32, fft_size: usize, n_mels: usize) -> Self {
        let num_bins = fft_size / 2 + 1;
        let nyquist = sample_rate as f64 / 2.0;
        let bin_hz = sample_rate as f64 / fft_size as f64;
        let mel_max = hz_to_mel(nyquist);
        let edges: Vec<f64> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
            .collect();

        let filters = (0..n_mels)
            .map(|m| {
                let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
                let first = ((lo / bin_hz).floor() as usize).min(num_bins - 1);
                let last = ((hi / bin_hz).ceil() as usize).min(num_bins - 1);
                let weights = (first..=last)
                    .map(|bin| {
                        let f = bin as f64 * bin_hz;
                        let w = if f <= center {
                            (f - lo) / (center - lo).max(1e-9)
                        } else {
                            (hi - f) / (hi - center).max(1e-9)
                        };
                        w.max(0.0) as f32
                    })
                    .collect();
                (first, weights)
            })
            .collect();

        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Mel power spectrum of one magnitude frame.
    pub fn apply(&self, magnitudes: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|(first, weights)| {
                weights
                    .iter()
                    .zip(magnitudes.iter().skip(*first))
                    .map(|(w, m)| w * m * m)
                    .sum()
            })
            .collect()
    }
}

/// Median of `values`, reordering the slice in place.
fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Median across time for every bin: enhances sustained (harmonic) energy.
fn median_filter_time(mags: &[Vec<f32>], width: usize) -> Vec<Vec<f32>> {
    let num_frames = mags.len();
    let num_bins = mags.first().map_or(0, Vec::len);
    let half = width / 2;
    let mut out = vec![vec![0.0f32; num_bins]; num_frames];
    let mut scratch = Vec::with_capacity(width);
    for bin in 0..num_bins {
        for t in 0..num_frames {
            let start = t.saturating_sub(half);
            let end = (t + half + 1).min(num_frames);
            scratch.clear();
            scratch.extend(mags[start..end].iter().map(|frame| frame[bin]));
            out[t][bin] = median_in_place(&mut scratch);
        }
    }
    out
}

/// Median across frequency for every frame: enhances broadband (percussive) energy.
fn median_filter_freq(mags: &[Vec<f32>], width: usize) -> Vec<Vec<f32>> {
    let half = width / 2;
    let mut scratch = Vec::with_capacity(width);
    mags.iter()
        .map(|frame| {
            (0..frame.len())
                .map(|bin| {
                    let start = bin.saturating_sub(half);
                    let end = (bin + half + 1).min(frame.len());
                    scratch.clear();
                    scratch.extend_from_slice(&frame[start..end]);
                    median_in_place(&mut scratch)
                })
                .collect()
        })
        .collect()
}

/// Harmonic/percussive separation by median filtering with soft masks.
///
/// Returns `(harmonic, percussive)` waveforms with the input's length.
pub fn hpss(signal: &[f32], fft_size: usize, hop: usize, kernel: usize) -> (Vec<f32>, Vec<f32>) {
    let spec = stft(signal, fft_size, hop);
    if spec.is_empty() {
        return (signal.to_vec(), vec![0.0; signal.len()]);
    }
    let mags: Vec<Vec<f32>> = spec
        .iter()
        .map(|frame| frame.iter().map(|c| c.norm()).collect())
        .collect();
    let harmonic_mags = median_filter_time(&mags, kernel.max(1));
    let percussive_mags = median_filter_freq(&mags, kernel.max(1));

    let mut harmonic_spec = Vec::with_capacity(spec.len());
    let mut percussive_spec = Vec::with_capacity(spec.len());
    for (t, frame) in spec.iter().enumerate() {
        let mut h_frame = Vec::with_capacity(frame.len());
        let mut p_frame = Vec::with_capacity(frame.len());
        for (bin, &c) in frame.iter().enumerate() {
            let h2 = harmonic_mags[t][bin].powi(2);
            let p2 = percussive_mags[t][bin].powi(2);
            let total = h2 + p2;
            let (h_mask, p_mask) = if total > 1e-12 {
                (h2 / total, p2 / total)
            } else {
                (0.5, 0.5)
            };
            h_frame.push(c * h_mask);
            p_frame.push(c * p_mask);
        }
        harmonic_spec.push(h_frame);
        percussive_spec.push(p_frame);
    }

    (
        istft(&harmonic_spec, fft_size, hop, signal.len()),
        istft(&percussive_spec, fft_size, hop, signal.len()),
    )
}
