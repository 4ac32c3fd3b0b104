//! Loudness envelope: per-hop RMS normalised to the track peak, the 0.2s
//! energy profile built from it, and the climax (preview) search.

/// Spacing of energy profile samples in seconds.
pub const PROFILE_STEP: f64 = 0.2;
/// Width of the climax search window in seconds.
pub const CLIMAX_WINDOW: f64 = 5.0;
/// A climax inside this many seconds of the end is discarded.
pub const CLIMAX_TAIL_GUARD: f64 = 10.0;

/// Per-hop RMS envelope normalised to [0, 1].
#[derive(Debug, Clone, Default)]
pub struct EnergyEnvelope {
    values: Vec<f32>,
    sample_rate: u32,
    hop: usize,
}

impl EnergyEnvelope {
    /// Centered RMS frames of `frame_len` samples every `hop` samples.
    pub fn compute(signal: &[f32], sample_rate: u32, frame_len: usize, hop: usize) -> Self {
        let hop = hop.max(1);
        let half = (frame_len / 2) as isize;
        let num_frames = signal.len() / hop + 1;

        let mut values: Vec<f32> = (0..num_frames)
            .map(|t| {
                let start = (t * hop) as isize - half;
                let lo = start.max(0) as usize;
                let hi = ((start + frame_len as isize).max(0) as usize).min(signal.len());
                let sum_sq: f64 = signal
                    .get(lo..hi)
                    .unwrap_or(&[])
                    .iter()
                    .map(|&s| (s as f64) * (s as f64))
                    .sum();
                (sum_sq / frame_len.max(1) as f64).sqrt() as f32
            })
            .collect();

        let peak = values.iter().cloned().fold(0.0f32, f32::max);
        if peak > 0.0 {
            for v in values.iter_mut() {
                *v /= peak;
            }
        }

        Self {
            values,
            sample_rate,
            hop,
        }
    }

    pub fn from_values(values: Vec<f32>, sample_rate: u32, hop: usize) -> Self {
        Self {
            values,
            sample_rate,
            hop: hop.max(1),
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn frame_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.hop as f64 / self.sample_rate as f64
        }
    }

    /// Energy at `time`: the value at hop index `floor(t * sr / hop)`, or 0
    /// outside the envelope.
    pub fn energy_at(&self, time: f64) -> f64 {
        if time < 0.0 || self.sample_rate == 0 {
            return 0.0;
        }
        let idx = (time * self.sample_rate as f64 / self.hop as f64) as usize;
        self.values.get(idx).map_or(0.0, |&v| v as f64)
    }

    /// `(time, energy)` pairs every [`PROFILE_STEP`] from 0 up to (not
    /// including) `duration`.
    pub fn profile(&self, duration: f64) -> Vec<(f64, f64)> {
        let steps = (duration / PROFILE_STEP).ceil().max(0.0) as usize;
        (0..steps)
            .map(|i| {
                let t = i as f64 * PROFILE_STEP;
                (t, self.energy_at(t))
            })
            .filter(|(t, _)| *t < duration)
            .collect()
    }

    /// Start time of the loudest [`CLIMAX_WINDOW`]-second stretch, or 0 if
    /// that stretch starts within the last [`CLIMAX_TAIL_GUARD`] seconds.
    pub fn climax_start(&self, duration: f64) -> f64 {
        let frame_secs = self.frame_seconds();
        if frame_secs <= 0.0 || self.values.is_empty() {
            return 0.0;
        }
        let window = ((CLIMAX_WINDOW / frame_secs) as usize).max(1);
        let step = (window / 5).max(1);

        let mut best_start = 0usize;
        let mut best_sum = f64::NEG_INFINITY;
        let mut start = 0usize;
        while start < self.values.len().saturating_sub(window).max(1) {
            let end = (start + window).min(self.values.len());
            let sum: f64 = self.values[start..end].iter().map(|&v| v as f64).sum();
            if sum > best_sum {
                best_sum = sum;
                best_start = start;
            }
            start += step;
        }

        let t = best_start as f64 * frame_secs;
        if t > duration - CLIMAX_TAIL_GUARD { 0.0 } else { t }
    }
}

/// Linear interpolation into a sorted energy profile with a cursor that only
/// moves forward. Lookups at non-decreasing times are O(1) amortised.
#[derive(Debug, Clone, Default)]
pub struct ProfileCursor {
    index: usize,
}

impl ProfileCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn position(&self) -> usize {
        self.index
    }

    /// Interpolated energy at `time`, clamped to the end samples. Returns 0
    /// for an empty profile.
    pub fn sample(&mut self, profile: &[(f64, f64)], time: f64) -> f64 {
        let Some(&(first_t, first_e)) = profile.first() else {
            return 0.0;
        };
        if time <= first_t {
            return first_e;
        }
        while self.index + 1 < profile.len() && profile[self.index + 1].0 <= time {
            self.index += 1;
        }
        let (t0, e0) = profile[self.index];
        match profile.get(self.index + 1) {
            Some(&(t1, e1)) if t1 > t0 => e0 + (e1 - e0) * ((time - t0) / (t1 - t0)),
            _ => e0,
        }
    }
}
