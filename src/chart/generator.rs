//! Lane assignment: turns an event timeline into a chart with chords and
//! holds while keeping every lane collision-free.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{Chart, Note};
use crate::LANE_COUNT;
use crate::config::{PlayfieldConfig, SessionConfig};

/// Lower bound of the per-lane gap in seconds.
pub const MIN_GAP_FLOOR: f64 = 0.05;
/// Speeds below this are treated as this when sizing the gap.
pub const MIN_GAP_SPEED: f64 = 100.0;
/// Range of the ideal hold length before capping.
pub const HOLD_IDEAL_MIN: f64 = 0.6;
pub const HOLD_IDEAL_MAX: f64 = 2.0;
/// Clearance kept between a hold's end and the next note in its lane.
pub const HOLD_SAFETY_MARGIN: f64 = 0.2;
/// Holds that would come out this short stay taps.
pub const HOLD_MIN_DURATION: f64 = 0.4;

/// Per-lane gap that keeps two tiles in a lane from overlapping on screen
/// at `scroll_speed`.
pub fn min_gap(playfield: &PlayfieldConfig, scroll_speed: f64) -> f64 {
    (playfield.note_visual_height() / scroll_speed.max(MIN_GAP_SPEED)).max(MIN_GAP_FLOOR)
}

/// Seed from the wall clock, for sessions that do not pin one.
pub fn time_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Build a chart from ascending event times.
///
/// Each timestamp becomes a chord with the session's chord chance, then
/// takes that many lanes at random from the lanes that are free of notes
/// within the minimum gap. A timestamp with no free lane is skipped. Holds
/// are assigned afterwards so their length can be capped by the next note in
/// the same lane. The same `seed` always yields the same chart.
pub fn generate(
    events: &[f64],
    session: &SessionConfig,
    playfield: &PlayfieldConfig,
    seed: u64,
) -> Chart {
    let mut rng = StdRng::seed_from_u64(seed);
    let difficulty = session.difficulty;
    let gap = min_gap(playfield, session.scroll_speed());
    let chord_chance = session.chord_chance();
    let max_chord = difficulty.max_chord().clamp(1, LANE_COUNT);

    let mut last_in_lane = [f64::NEG_INFINITY; LANE_COUNT];
    let mut placed: Vec<(f64, usize)> = Vec::with_capacity(events.len());
    let mut skipped = 0usize;

    for &t in events {
        let mut count = 1;
        if rng.r#gen::<f64>() < chord_chance && max_chord >= 2 {
            count = rng.gen_range(2..=max_chord);
        }

        let candidates: Vec<usize> = (0..LANE_COUNT)
            .filter(|&lane| t - last_in_lane[lane] >= gap)
            .collect();
        if candidates.is_empty() {
            skipped += 1;
            continue;
        }
        count = count.min(candidates.len());

        for &lane in candidates.choose_multiple(&mut rng, count) {
            last_in_lane[lane] = t;
            placed.push((t, lane));
        }
    }

    let notes = assign_holds(&placed, session.hold_chance(), &mut rng);
    log::debug!(
        "Generated {} notes from {} events ({} skipped, gap {:.3}s, seed {})",
        notes.len(),
        events.len(),
        skipped,
        gap,
        seed
    );
    Chart::new(notes, difficulty, gap, seed)
}

/// Convert placed `(time, lane)` pairs into notes, turning some into holds.
fn assign_holds(placed: &[(f64, usize)], hold_chance: f64, rng: &mut StdRng) -> Vec<Note> {
    let mut lane_times: [Vec<f64>; LANE_COUNT] = Default::default();
    for &(t, lane) in placed {
        lane_times[lane].push(t);
    }

    let mut cursor = [0usize; LANE_COUNT];
    placed
        .iter()
        .map(|&(t, lane)| {
            cursor[lane] += 1;
            let next = lane_times[lane]
                .get(cursor[lane])
                .copied()
                .unwrap_or(f64::INFINITY);

            if rng.r#gen::<f64>() < hold_chance {
                let ideal = rng.gen_range(HOLD_IDEAL_MIN..=HOLD_IDEAL_MAX);
                let max_safe = next - t - HOLD_SAFETY_MARGIN;
                if max_safe > HOLD_MIN_DURATION {
                    return Note::hold(lane, t, t + ideal.min(max_safe));
                }
            }
            Note::tap(lane, t)
        })
        .collect()
}
