pub mod generator;

use crate::LANE_COUNT;
use crate::difficulty::Difficulty;

/// Timing quality of a successful press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Perfect,
    Good,
}

/// Runtime state of a note. Transitions only move forward:
/// `Pending -> Hit | Missed` for taps and
/// `Pending -> Holding -> Completed | Dropped` (or `Pending -> Missed`) for holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoteState {
    Pending,
    Hit(Grade),
    Missed,
    Holding { started_at: f64 },
    Completed,
    Dropped,
}

impl NoteState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Hit(_) | Self::Missed | Self::Completed | Self::Dropped
        )
    }

    /// Still scrolling and able to produce a judgment.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Holding { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Note {
    pub lane: usize,
    /// Time the note reaches the hit line, seconds.
    pub time: f64,
    /// End of the hold; `None` for a tap.
    pub hold_end: Option<f64>,
    /// Current screen position, advanced by the judgment engine.
    pub y: f64,
    state: NoteState,
}

impl Note {
    pub fn tap(lane: usize, time: f64) -> Self {
        Self {
            lane,
            time,
            hold_end: None,
            y: 0.0,
            state: NoteState::Pending,
        }
    }

    pub fn hold(lane: usize, time: f64, end: f64) -> Self {
        Self {
            hold_end: Some(end),
            ..Self::tap(lane, time)
        }
    }

    pub fn is_hold(&self) -> bool {
        self.hold_end.is_some()
    }

    pub fn hold_duration(&self) -> f64 {
        self.hold_end.map_or(0.0, |end| end - self.time)
    }

    /// Latest time this note is relevant to judgment.
    pub fn end_time(&self) -> f64 {
        self.hold_end.unwrap_or(self.time)
    }

    pub fn state(&self) -> NoteState {
        self.state
    }

    /// Apply a state change if it is a legal forward transition for this
    /// note kind. Returns whether the state changed.
    pub fn transition(&mut self, next: NoteState) -> bool {
        use NoteState::*;
        let legal = match (self.state, next) {
            (Pending, Missed) => true,
            (Pending, Hit(_)) => !self.is_hold(),
            (Pending, Holding { .. }) => self.is_hold(),
            (Holding { .. }, Completed | Dropped) => true,
            _ => false,
        };
        if legal {
            self.state = next;
        }
        legal
    }
}

/// Lane-assigned notes for one session, sorted by `(time, lane)`.
#[derive(Debug, Clone)]
pub struct Chart {
    notes: Vec<Note>,
    difficulty: Difficulty,
    /// Per-lane spacing enforced at generation.
    min_gap: f64,
    seed: u64,
}

impl Chart {
    pub fn new(mut notes: Vec<Note>, difficulty: Difficulty, min_gap: f64, seed: u64) -> Self {
        notes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.lane.cmp(&b.lane)));
        Self {
            notes,
            difficulty,
            min_gap,
            seed,
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub(crate) fn notes_mut(&mut self) -> &mut [Note] {
        &mut self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn min_gap(&self) -> f64 {
        self.min_gap
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Latest spawn or hold end, `None` for an empty chart.
    pub fn last_event_time(&self) -> Option<f64> {
        self.notes
            .iter()
            .map(Note::end_time)
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn lane_notes(&self, lane: usize) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.lane == lane)
    }

    pub fn lane_counts(&self) -> [usize; LANE_COUNT] {
        let mut counts = [0; LANE_COUNT];
        for note in &self.notes {
            if let Some(c) = counts.get_mut(note.lane) {
                *c += 1;
            }
        }
        counts
    }

    pub fn hold_count(&self) -> usize {
        self.notes.iter().filter(|n| n.is_hold()).count()
    }

    /// Seconds spent holding across every hold in the chart.
    pub fn hold_time(&self) -> f64 {
        self.notes.iter().map(Note::hold_duration).sum()
    }

    /// Number of timestamps carrying more than one note.
    pub fn chord_count(&self) -> usize {
        self.notes
            .chunk_by(|a, b| a.time == b.time)
            .filter(|group| group.len() > 1)
            .count()
    }

    /// Notes still able to produce a judgment.
    pub fn active_count(&self) -> usize {
        self.notes.iter().filter(|n| n.state().is_active()).count()
    }
}
