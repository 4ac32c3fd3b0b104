//! Per-frame judgment: note movement, miss detection, press/release
//! matching and score bookkeeping.
//!
//! Notes move along `y = hit_line + (time - spawn) * speed`, so a note sits
//! on the hit line exactly at its spawn time and a press's distance is its
//! timing error scaled by the current scroll speed.

use serde::{Deserialize, Serialize};

use crate::chart::{Chart, Grade, NoteState};
use crate::config::PlayfieldConfig;

pub const TAP_PERFECT_POINTS: u32 = 300;
pub const TAP_GOOD_POINTS: u32 = 150;
/// Awarded when a hold is grabbed, at either grade.
pub const HOLD_START_POINTS: u32 = 50;
/// Awarded when a hold is carried to its end.
pub const HOLD_COMPLETE_POINTS: u32 = 150;
/// Score per second of holding, not multiplied.
pub const HOLD_TRICKLE_PER_SEC: f64 = 100.0;
/// Releasing this close to the end still completes the hold.
pub const RELEASE_GRACE: f64 = 0.2;
pub const MAX_HEALTH: f64 = 100.0;
pub const HIT_HEALTH: f64 = 2.0;
pub const MISS_HEALTH_PENALTY: f64 = 5.0;
/// Combo at which the multiplier stops growing.
pub const MULTIPLIER_COMBO_CAP: u32 = 100;
/// Combo per +1.0x of multiplier.
pub const MULTIPLIER_STEP: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgmentKind {
    Perfect,
    Good,
    Miss,
    /// Hold released early.
    Drop,
}

impl From<Grade> for JudgmentKind {
    fn from(grade: Grade) -> Self {
        match grade {
            Grade::Perfect => Self::Perfect,
            Grade::Good => Self::Good,
        }
    }
}

/// Emitted for every judgment, for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgmentEvent {
    pub kind: JudgmentKind,
    pub lane: usize,
    pub score_delta: u64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentStats {
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
    pub perfects: u32,
    pub goods: u32,
    pub misses: u32,
    pub health: f64,
    pub multiplier: f64,
}

impl Default for JudgmentStats {
    fn default() -> Self {
        Self {
            score: 0,
            combo: 0,
            max_combo: 0,
            perfects: 0,
            goods: 0,
            misses: 0,
            health: MAX_HEALTH,
            multiplier: 1.0,
        }
    }
}

impl JudgmentStats {
    /// Score `points` at the current multiplier, then extend the combo.
    /// Returns the score added.
    pub fn register_hit(&mut self, points: u32, grade: Grade) -> u64 {
        let delta = (points as f64 * self.multiplier) as u64;
        self.score += delta;
        self.increment_combo();
        match grade {
            Grade::Perfect => self.perfects += 1,
            Grade::Good => self.goods += 1,
        }
        self.health = (self.health + HIT_HEALTH).min(MAX_HEALTH);
        delta
    }

    pub fn register_miss(&mut self) {
        self.combo = 0;
        self.multiplier = 1.0;
        self.misses += 1;
        self.health = (self.health - MISS_HEALTH_PENALTY).max(0.0);
    }

    fn increment_combo(&mut self) {
        self.combo += 1;
        self.max_combo = self.max_combo.max(self.combo);
        self.multiplier = 1.0 + self.combo.min(MULTIPLIER_COMBO_CAP) as f64 / MULTIPLIER_STEP;
    }
}

#[derive(Debug, Clone)]
pub struct JudgmentEngine {
    playfield: PlayfieldConfig,
    stats: JudgmentStats,
    events: Vec<JudgmentEvent>,
    /// Every note before this index is in a terminal state.
    head: usize,
    /// Speed used for the last frame; press distances use it too.
    speed: f64,
    /// Fractional trickle score not yet credited.
    trickle_carry: f64,
}

impl JudgmentEngine {
    pub fn new(playfield: PlayfieldConfig, initial_speed: f64) -> Self {
        Self {
            playfield,
            stats: JudgmentStats::default(),
            events: Vec::new(),
            head: 0,
            speed: initial_speed,
            trickle_carry: 0.0,
        }
    }

    pub fn stats(&self) -> &JudgmentStats {
        &self.stats
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn reset(&mut self, initial_speed: f64) {
        *self = Self::new(self.playfield, initial_speed);
    }

    /// Judgment events since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<JudgmentEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, kind: JudgmentKind, lane: usize, score_delta: u64, time: f64) {
        self.events.push(JudgmentEvent {
            kind,
            lane,
            score_delta,
            time,
        });
    }

    /// Advance every visible note to `time`, complete holds that reached
    /// their end, accrue the hold trickle and mark passed notes missed.
    pub fn update(&mut self, chart: &mut Chart, time: f64, dt: f64, speed: f64) {
        self.speed = speed;
        let hit_line = self.playfield.hit_line_y();
        let miss_line = self.playfield.miss_line_y();
        let top = -self.playfield.tile_height;

        let notes = chart.notes_mut();
        while self.head < notes.len() && notes[self.head].state().is_terminal() {
            self.head += 1;
        }

        let mut holding = 0usize;
        let mut judged = Vec::new();
        for note in notes[self.head..].iter_mut() {
            match note.state() {
                NoteState::Holding { .. } => {
                    note.y = hit_line;
                    if time >= note.end_time() {
                        note.transition(NoteState::Completed);
                        judged.push((note.lane, None));
                    } else {
                        holding += 1;
                    }
                }
                NoteState::Pending => {
                    note.y = hit_line + (time - note.time) * speed;
                    if note.y > miss_line {
                        note.transition(NoteState::Missed);
                        judged.push((note.lane, Some(JudgmentKind::Miss)));
                    } else if note.y < top {
                        // Sorted by time: everything after is further up.
                        break;
                    }
                }
                _ => {}
            }
        }

        if holding > 0 {
            self.trickle_carry += HOLD_TRICKLE_PER_SEC * dt.max(0.0) * holding as f64;
            let whole = self.trickle_carry.floor();
            self.trickle_carry -= whole;
            self.stats.score += whole as u64;
        }

        for (lane, kind) in judged {
            match kind {
                None => {
                    let delta = self.stats.register_hit(HOLD_COMPLETE_POINTS, Grade::Perfect);
                    self.emit(JudgmentKind::Perfect, lane, delta, time);
                }
                Some(kind) => {
                    self.stats.register_miss();
                    log::trace!("Miss lane {} at {:.3}", lane, time);
                    self.emit(kind, lane, 0, time);
                }
            }
        }
    }

    /// Judge a press in `lane` at `time` against the closest pending note
    /// within the hit tolerance. With no candidate it is a ghost tap and
    /// counts as a miss without marking any note.
    pub fn press(&mut self, chart: &mut Chart, lane: usize, time: f64) -> JudgmentKind {
        let tolerance = self.playfield.hit_tolerance;
        let horizon = time + tolerance / self.speed.max(f64::EPSILON);

        let notes = chart.notes_mut();
        let mut best: Option<(usize, f64)> = None;
        for (idx, note) in notes.iter().enumerate().skip(self.head) {
            if note.time > horizon {
                break;
            }
            if note.lane != lane || note.state() != NoteState::Pending {
                continue;
            }
            let distance = (time - note.time).abs() * self.speed;
            if distance < tolerance && best.is_none_or(|(_, d)| distance < d) {
                best = Some((idx, distance));
            }
        }

        let Some((idx, distance)) = best else {
            self.stats.register_miss();
            self.emit(JudgmentKind::Miss, lane, 0, time);
            return JudgmentKind::Miss;
        };

        let grade = if distance < self.playfield.perfect_window {
            Grade::Perfect
        } else {
            Grade::Good
        };
        let note = &mut notes[idx];
        let points = if note.is_hold() {
            note.transition(NoteState::Holding { started_at: time });
            HOLD_START_POINTS
        } else {
            note.transition(NoteState::Hit(grade));
            match grade {
                Grade::Perfect => TAP_PERFECT_POINTS,
                Grade::Good => TAP_GOOD_POINTS,
            }
        };
        let delta = self.stats.register_hit(points, grade);
        self.emit(grade.into(), lane, delta, time);
        grade.into()
    }

    /// Release in `lane`. Completes the held note if within the release
    /// grace of its end, drops it otherwise. `None` when nothing is held.
    pub fn release(&mut self, chart: &mut Chart, lane: usize, time: f64) -> Option<JudgmentKind> {
        let note = chart.notes_mut()[self.head..]
            .iter_mut()
            .find(|n| n.lane == lane && matches!(n.state(), NoteState::Holding { .. }))?;

        if time >= note.end_time() - RELEASE_GRACE {
            note.transition(NoteState::Completed);
            let delta = self.stats.register_hit(HOLD_COMPLETE_POINTS, Grade::Perfect);
            self.emit(JudgmentKind::Perfect, lane, delta, time);
            Some(JudgmentKind::Perfect)
        } else {
            note.transition(NoteState::Dropped);
            self.stats.register_miss();
            self.emit(JudgmentKind::Drop, lane, 0, time);
            Some(JudgmentKind::Drop)
        }
    }

    /// No note can still be judged.
    pub fn all_judged(&self, chart: &Chart) -> bool {
        chart.notes()[self.head.min(chart.len())..]
            .iter()
            .all(|n| n.state().is_terminal())
    }
}
