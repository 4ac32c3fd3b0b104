use crate::difficulty::Difficulty;

/// Energy above which the minimum spacing is relaxed.
pub const BURST_ENERGY: f64 = 0.6;
/// Spacing multiplier applied in loud passages.
pub const BURST_FACTOR: f64 = 0.75;
/// No two kept events are ever closer than this.
pub const MIN_INTERVAL_FLOOR: f64 = 0.12;

/// Minimum spacing before the next event at energy `energy`.
pub fn effective_interval(difficulty: Difficulty, energy: f64) -> f64 {
    let mut limit = difficulty.base_interval();
    if energy > BURST_ENERGY {
        limit *= BURST_FACTOR;
    }
    limit.max(MIN_INTERVAL_FLOOR)
}

/// Thin a sorted event list so each kept event is at least the effective
/// interval after the previously kept one. Spacing is global across lanes.
pub fn filter_density<F>(events: &[f64], difficulty: Difficulty, energy_at: F) -> Vec<f64>
where
    F: Fn(f64) -> f64,
{
    let mut kept = Vec::with_capacity(events.len());
    let mut last_kept = f64::NEG_INFINITY;
    for &t in events {
        let limit = effective_interval(difficulty, energy_at(t));
        if t - last_kept >= limit {
            kept.push(t);
            last_kept = t;
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_flat_energy_drops_close_events() {
        let kept = filter_density(&[0.0, 0.05, 0.2, 0.9], Difficulty::Normal, |_| 0.0);
        assert_eq!(kept, vec![0.0, 0.9]);
    }

    #[test]
    fn test_loud_passages_relax_spacing() {
        // Normal: 0.5 quiet, 0.375 loud.
        let events = [0.0, 0.4, 0.8];
        assert_eq!(filter_density(&events, Difficulty::Normal, |_| 0.0), vec![0.0, 0.8]);
        assert_eq!(
            filter_density(&events, Difficulty::Normal, |_| 0.9),
            vec![0.0, 0.4, 0.8]
        );
    }

    #[test]
    fn test_floor_applies_to_fastest_difficulty() {
        assert!((effective_interval(Difficulty::Beyond, 0.0) - 0.12).abs() < 1e-12);
        assert!((effective_interval(Difficulty::God, 1.0) - 0.12).abs() < 1e-12);
        let kept = filter_density(&[0.0, 0.1, 0.2, 0.3], Difficulty::Beyond, |_| 1.0);
        assert_eq!(kept, vec![0.0, 0.2]);
    }

    #[test]
    fn test_energy_threshold_is_strict() {
        assert!((effective_interval(Difficulty::Easy, 0.6) - 0.8).abs() < 1e-12);
        assert!((effective_interval(Difficulty::Easy, 0.61) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(filter_density(&[], Difficulty::Hard, |_| 0.0).is_empty());
    }
}
