//! A single play-through of one chart: owns the chart, judgment engine,
//! clock, speed controller and audio transport, and is driven one frame at
//! a time by its owner.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::clock::PlaybackClock;
use super::judge::{JudgmentEngine, JudgmentEvent, JudgmentKind, JudgmentStats};
use super::results::SessionResults;
use super::speed::SpeedController;
use super::transport::AudioTransport;
use crate::LANE_COUNT;
use crate::analyzer::AnalysisResult;
use crate::chart::{Chart, generator};
use crate::config::{PlayfieldConfig, SessionConfig};

/// Time after the last chart event before the session can end, seconds.
pub const END_GRACE: f64 = 2.0;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Track load error: {0}")]
    TrackLoad(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    LanePress { lane: usize, time: f64 },
    LaneRelease { lane: usize, time: f64 },
    PauseToggle,
}

pub struct GameSession<T: AudioTransport> {
    track: PathBuf,
    analysis: AnalysisResult,
    config: SessionConfig,
    playfield: PlayfieldConfig,
    transport: T,
    chart: Chart,
    engine: JudgmentEngine,
    clock: PlaybackClock,
    speed: SpeedController,
    /// Seeds restarts so they stay reproducible when the first seed is pinned.
    rng: StdRng,
    /// Clock time from which the session may complete.
    end_time: f64,
    complete: bool,
}

impl<T: AudioTransport> GameSession<T> {
    /// Load `track` into the transport and build the first chart. Fails
    /// without starting when the transport cannot load the track.
    pub fn start(
        track: &Path,
        analysis: AnalysisResult,
        config: &SessionConfig,
        playfield: PlayfieldConfig,
        mut transport: T,
    ) -> Result<Self, SessionError> {
        if !transport.load(track) {
            log::warn!("Could not load {}", track.display());
            return Err(SessionError::TrackLoad(track.to_path_buf()));
        }

        let seed = config.seed.unwrap_or_else(generator::time_seed);
        let chart = generator::generate(&analysis.events, config, &playfield, seed);
        let mut speed = SpeedController::for_session(config, &analysis.energy_profile);
        let engine = JudgmentEngine::new(playfield, speed.speed_at(0.0));
        speed.reset();

        log::info!(
            "Session start: {} ({}, {} notes, seed {}{})",
            track.display(),
            config.difficulty,
            chart.len(),
            seed,
            if speed.is_smart() { ", smart speed" } else { "" }
        );

        let end_time = end_time(&chart);
        Ok(Self {
            track: track.to_path_buf(),
            analysis,
            config: config.clone(),
            playfield,
            transport,
            chart,
            engine,
            clock: PlaybackClock::new(),
            speed,
            rng: StdRng::seed_from_u64(seed),
            end_time,
            complete: false,
        })
    }

    /// Apply one input. Presses are ignored while paused or counting down to
    /// resume; lane inputs are ignored after completion and for lanes outside
    /// the field.
    /// Returns the judgment the input produced, if any.
    pub fn handle_input(&mut self, input: InputEvent) -> Option<JudgmentKind> {
        match input {
            InputEvent::PauseToggle => {
                if !self.complete {
                    self.clock.toggle_pause(&mut self.transport);
                }
                None
            }
            InputEvent::LanePress { lane, time } => {
                if !self.accepts_lane_input(lane) {
                    return None;
                }
                Some(self.engine.press(&mut self.chart, lane, time))
            }
            InputEvent::LaneRelease { lane, time } => {
                // Releases count even while frozen so a hold let go during a
                // pause is dropped rather than completed after resuming.
                if lane >= LANE_COUNT || self.complete {
                    return None;
                }
                self.engine.release(&mut self.chart, lane, time)
            }
        }
    }

    fn accepts_lane_input(&self, lane: usize) -> bool {
        lane < LANE_COUNT && !self.clock.is_frozen() && !self.complete
    }

    /// Advance one frame of `dt` seconds.
    pub fn update(&mut self, dt: f64) {
        if self.complete {
            return;
        }
        self.clock.update(dt, &mut self.transport);
        if self.clock.is_frozen() {
            return;
        }

        let time = self.clock.time();
        let speed = self.speed.speed_at(time);
        self.engine.update(&mut self.chart, time, dt, speed);

        if time >= self.end_time && self.engine.all_judged(&self.chart) {
            self.complete = true;
            self.transport.stop();
            let stats = self.engine.stats();
            log::info!(
                "Session complete: score {}, max combo {}, {}/{}/{} perfect/good/miss",
                stats.score,
                stats.max_combo,
                stats.perfects,
                stats.goods,
                stats.misses
            );
        }
    }

    pub fn drain_events(&mut self) -> Vec<JudgmentEvent> {
        self.engine.drain_events()
    }

    /// Start over with a freshly laid-out chart from the same analysis.
    pub fn restart(&mut self) {
        self.transport.stop();
        let seed = self.rng.r#gen::<u64>();
        self.chart = generator::generate(&self.analysis.events, &self.config, &self.playfield, seed);
        self.end_time = end_time(&self.chart);
        self.speed.reset();
        let initial = self.speed.speed_at(0.0);
        self.speed.reset();
        self.engine.reset(initial);
        self.clock.reset();
        self.complete = false;
        log::info!("Session restart: {} notes, seed {}", self.chart.len(), seed);
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Final record, once the session is complete.
    pub fn results(&self) -> Option<SessionResults> {
        self.complete
            .then(|| SessionResults::from_stats(self.engine.stats()))
    }

    pub fn track(&self) -> &Path {
        &self.track
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn stats(&self) -> &JudgmentStats {
        self.engine.stats()
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Scroll speed used for the latest frame.
    pub fn current_speed(&self) -> f64 {
        self.engine.speed()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn end_time(chart: &Chart) -> f64 {
    chart.last_event_time().unwrap_or(0.0) + END_GRACE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::NoteState;
    use crate::difficulty::Difficulty;
    use crate::play::transport::SimulatedTransport;

    const DT: f64 = 1.0 / 60.0;

    fn analysis(events: Vec<f64>) -> AnalysisResult {
        AnalysisResult {
            events,
            preview_start: 0.0,
            energy_profile: Vec::new(),
        }
    }

    fn taps_only() -> SessionConfig {
        SessionConfig {
            difficulty: Difficulty::Normal,
            chord_chance: Some(0.0),
            hold_chance: 0.0,
            seed: Some(11),
            ..SessionConfig::default()
        }
    }

    fn session(events: Vec<f64>) -> GameSession<SimulatedTransport> {
        GameSession::start(
            Path::new("song.wav"),
            analysis(events),
            &taps_only(),
            PlayfieldConfig::default(),
            SimulatedTransport::new(),
        )
        .unwrap()
    }

    fn run_until(s: &mut GameSession<SimulatedTransport>, t: f64) {
        while s.clock().time() < t && !s.is_complete() {
            s.transport_mut().tick(DT);
            s.update(DT);
        }
    }

    #[test]
    fn test_track_load_failure() {
        let err = GameSession::start(
            Path::new("missing.wav"),
            analysis(vec![1.0]),
            &taps_only(),
            PlayfieldConfig::default(),
            SimulatedTransport::failing(),
        );
        assert!(matches!(err, Err(SessionError::TrackLoad(_))));
    }

    #[test]
    fn test_unplayed_session_misses_everything() {
        let mut s = session(vec![0.5, 1.0, 1.5, 2.0]);
        run_until(&mut s, 10.0);
        assert!(s.is_complete());
        let r = s.results().unwrap();
        assert_eq!(r.misses, 4);
        assert_eq!(r.score, 0);
        assert_eq!(r.rank.to_string(), "F");
        assert!(s.clock().time() >= 4.0);
        assert!(!s.transport().is_playing());
    }

    #[test]
    fn test_empty_chart_completes_after_grace() {
        let mut s = session(vec![]);
        run_until(&mut s, 1.9);
        assert!(!s.is_complete());
        run_until(&mut s, 3.0);
        assert!(s.is_complete());
        assert_eq!(s.results().unwrap().total_notes(), 0);
    }

    #[test]
    fn test_input_ignored_while_paused() {
        let mut s = session(vec![1.0]);
        run_until(&mut s, 0.95);
        s.handle_input(InputEvent::PauseToggle);
        assert!(s.clock().is_frozen());
        let time = s.clock().time();
        assert_eq!(
            s.handle_input(InputEvent::LanePress { lane: 0, time }),
            None
        );
        assert_eq!(s.stats().misses, 0);
    }

    #[test]
    fn test_release_while_paused_drops_hold() {
        let config = SessionConfig {
            hold_chance: 1.0,
            ..taps_only()
        };
        let mut s = GameSession::start(
            Path::new("song.wav"),
            analysis(vec![1.0]),
            &config,
            PlayfieldConfig::default(),
            SimulatedTransport::new(),
        )
        .unwrap();
        let note = s.chart().notes()[0].clone();
        assert!(note.is_hold());

        run_until(&mut s, 0.99);
        let press = s.handle_input(InputEvent::LanePress {
            lane: note.lane,
            time: s.clock().time(),
        });
        assert_eq!(press, Some(JudgmentKind::Perfect));
        run_until(&mut s, 1.1);

        s.handle_input(InputEvent::PauseToggle);
        assert!(s.clock().is_frozen());
        let release = s.handle_input(InputEvent::LaneRelease {
            lane: note.lane,
            time: s.clock().time(),
        });
        assert_eq!(release, Some(JudgmentKind::Drop));
        assert_eq!(s.chart().notes()[0].state(), NoteState::Dropped);
        assert_eq!(s.stats().misses, 1);

        s.handle_input(InputEvent::PauseToggle);
        run_until(&mut s, 10.0);
        assert!(s.is_complete());
        assert_eq!(s.chart().notes()[0].state(), NoteState::Dropped);
        let r = s.results().unwrap();
        assert_eq!(r.perfects, 1);
        assert_eq!(r.misses, 1);
    }

    #[test]
    fn test_release_ignored_after_completion() {
        let mut s = session(vec![1.0]);
        run_until(&mut s, 10.0);
        assert!(s.is_complete());
        assert_eq!(
            s.handle_input(InputEvent::LaneRelease { lane: 0, time: 5.0 }),
            None
        );
    }

    #[test]
    fn test_restart_tracks_new_chart_end() {
        let config = SessionConfig {
            hold_chance: 0.5,
            seed: Some(5),
            ..taps_only()
        };
        let mut s = GameSession::start(
            Path::new("song.wav"),
            analysis(vec![1.0, 4.0]),
            &config,
            PlayfieldConfig::default(),
            SimulatedTransport::new(),
        )
        .unwrap();
        for _ in 0..8 {
            s.restart();
            let expected = s.chart().last_event_time().unwrap() + END_GRACE;
            assert_eq!(s.end_time, expected);
            run_until(&mut s, expected - 0.1);
            assert!(!s.is_complete());
            run_until(&mut s, expected + 1.0);
            assert!(s.is_complete());
        }
    }

    #[test]
    fn test_out_of_range_lane_ignored() {
        let mut s = session(vec![1.0]);
        assert_eq!(
            s.handle_input(InputEvent::LanePress { lane: 4, time: 0.0 }),
            None
        );
        assert_eq!(s.stats().misses, 0);
    }

    #[test]
    fn test_press_on_time_is_perfect() {
        let mut s = session(vec![1.0]);
        run_until(&mut s, 0.99);
        let lane = s.chart().notes()[0].lane;
        let kind = s.handle_input(InputEvent::LanePress {
            lane,
            time: s.clock().time(),
        });
        assert_eq!(kind, Some(JudgmentKind::Perfect));
        assert_eq!(s.chart().notes()[0].state(), NoteState::Hit(crate::chart::Grade::Perfect));
        let events = s.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].score_delta, 300);
    }

    #[test]
    fn test_restart_resets_state() {
        let mut s = session(vec![0.5, 1.0, 1.5, 2.0]);
        run_until(&mut s, 10.0);
        assert!(s.is_complete());
        s.restart();
        assert!(!s.is_complete());
        assert_eq!(s.stats(), &JudgmentStats::default());
        assert_eq!(s.clock().time(), -3.0);
        assert_eq!(s.chart().len(), 4);
        assert!(s.chart().notes().iter().all(|n| n.state() == NoteState::Pending));
        assert!(s.results().is_none());
    }

    #[test]
    fn test_pinned_seed_restarts_reproducibly() {
        let mut a = session(vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
        let mut b = session(vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
        a.restart();
        b.restart();
        let lanes = |s: &GameSession<SimulatedTransport>| -> Vec<usize> {
            s.chart().notes().iter().map(|n| n.lane).collect()
        };
        assert_eq!(lanes(&a), lanes(&b));
        assert_eq!(a.chart().seed(), b.chart().seed());
    }

    #[test]
    fn test_smart_speed_session_follows_energy() {
        let config = SessionConfig {
            smart_speed: true,
            ..taps_only()
        };
        let result = AnalysisResult {
            events: vec![5.0],
            preview_start: 0.0,
            energy_profile: vec![(0.0, 0.0), (2.0, 1.0), (4.0, 1.0)],
        };
        let mut s = GameSession::start(
            Path::new("song.wav"),
            result,
            &config,
            PlayfieldConfig::default(),
            SimulatedTransport::new(),
        )
        .unwrap();
        run_until(&mut s, 3.0);
        assert!((s.current_speed() - 850.0).abs() < 1e-6);
    }
}
