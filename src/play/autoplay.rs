use super::judge::JudgmentEvent;
use super::results::SessionResults;
use super::session::{END_GRACE, GameSession, InputEvent};
use super::transport::{AudioTransport, SimulatedTransport};
use crate::chart::NoteState;

/// Frames past the expected end before a run is abandoned.
const OVERRUN_FRAMES: usize = 600;

/// Headless input driver: presses every note at its spawn time and lets go
/// of holds at their end, advancing a [`SimulatedTransport`] in step with
/// the frame clock.
#[derive(Debug, Clone, Copy)]
pub struct Autoplay {
    dt: f64,
}

impl Autoplay {
    pub fn new(fps: u32) -> Self {
        Self {
            dt: 1.0 / f64::from(fps.max(1)),
        }
    }

    /// Run one frame: tick audio, advance the session, then feed the inputs
    /// due before the next frame. Returns the judgments produced.
    pub fn step(&self, session: &mut GameSession<SimulatedTransport>) -> Vec<JudgmentEvent> {
        session.transport_mut().tick(self.dt);
        session.update(self.dt);
        if !session.is_complete() {
            for input in self.due_inputs(session) {
                session.handle_input(input);
            }
        }
        session.drain_events()
    }

    fn due_inputs<T: AudioTransport>(&self, session: &GameSession<T>) -> Vec<InputEvent> {
        if session.clock().is_frozen() {
            return Vec::new();
        }
        let horizon = session.clock().time() + self.dt;
        let mut inputs = Vec::new();
        for note in session.chart().notes() {
            if note.time > horizon {
                break;
            }
            match note.state() {
                NoteState::Pending => inputs.push(InputEvent::LanePress {
                    lane: note.lane,
                    time: note.time,
                }),
                NoteState::Holding { .. } if note.end_time() <= horizon => {
                    inputs.push(InputEvent::LaneRelease {
                        lane: note.lane,
                        time: note.end_time(),
                    })
                }
                _ => {}
            }
        }
        inputs
    }

    /// Play `session` to completion and return its results. `None` if it
    /// never completes, which only happens when something holds it paused.
    pub fn run(&self, session: &mut GameSession<SimulatedTransport>) -> Option<SessionResults> {
        let span = session.chart().last_event_time().unwrap_or(0.0) + END_GRACE
            - session.clock().time().min(0.0);
        let max_frames = (span / self.dt).ceil() as usize + OVERRUN_FRAMES;
        for _ in 0..max_frames {
            self.step(session);
            if session.is_complete() {
                return session.results();
            }
        }
        log::warn!("Autoplay gave up after {} frames", max_frames);
        None
    }
}

impl Default for Autoplay {
    fn default() -> Self {
        Self::new(60)
    }
}
