use std::path::{Path, PathBuf};

/// What the session needs from audio playback.
/// Implementations: a real output backend (outside this crate) and
/// [`SimulatedTransport`] for headless play and tests.
pub trait AudioTransport {
    /// Prepare `track` for playback. `false` if it cannot be played.
    fn load(&mut self, track: &Path) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    /// Playback position in seconds; 0 before playback starts.
    fn current_position(&self) -> f64;
    fn is_playing(&self) -> bool;
}

/// Transport whose position only moves when [`tick`](Self::tick) is called.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    track: Option<PathBuf>,
    position: f64,
    playing: bool,
    paused: bool,
    /// Playback stops once the position reaches this.
    duration: Option<f64>,
    /// Makes `load` fail, for exercising the error path.
    reject_loads: bool,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    /// A transport that refuses every track.
    pub fn failing() -> Self {
        Self {
            reject_loads: true,
            ..Self::default()
        }
    }

    /// Advance playback by `dt` seconds if playing.
    pub fn tick(&mut self, dt: f64) {
        if !self.playing || self.paused {
            return;
        }
        self.position += dt;
        if let Some(duration) = self.duration {
            if self.position >= duration {
                self.position = duration;
                self.playing = false;
            }
        }
    }

    /// Jump to `position`, e.g. to simulate device drift.
    pub fn seek(&mut self, position: f64) {
        self.position = position.max(0.0);
    }

    pub fn track(&self) -> Option<&Path> {
        self.track.as_deref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl AudioTransport for SimulatedTransport {
    fn load(&mut self, track: &Path) -> bool {
        if self.reject_loads {
            return false;
        }
        self.track = Some(track.to_path_buf());
        self.position = 0.0;
        self.playing = false;
        self.paused = false;
        true
    }

    fn play(&mut self) {
        if self.track.is_some() {
            self.playing = true;
            self.paused = false;
        }
    }

    fn pause(&mut self) {
        if self.playing {
            self.paused = true;
        }
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.paused = false;
        self.position = 0.0;
    }

    fn current_position(&self) -> f64 {
        self.position
    }

    fn is_playing(&self) -> bool {
        self.playing && !self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_requires_load() {
        let mut t = SimulatedTransport::new();
        t.play();
        assert!(!t.is_playing());
        assert!(t.load(Path::new("song.ogg")));
        t.play();
        assert!(t.is_playing());
        assert_eq!(t.track(), Some(Path::new("song.ogg")));
    }

    #[test]
    fn test_tick_pause_resume() {
        let mut t = SimulatedTransport::new();
        t.load(Path::new("a.wav"));
        t.tick(1.0);
        assert_eq!(t.current_position(), 0.0);
        t.play();
        t.tick(0.5);
        t.pause();
        t.tick(0.5);
        assert!((t.current_position() - 0.5).abs() < 1e-12);
        assert!(!t.is_playing());
        t.resume();
        t.tick(0.25);
        assert!((t.current_position() - 0.75).abs() < 1e-12);
        t.stop();
        assert_eq!(t.current_position(), 0.0);
    }

    #[test]
    fn test_playback_ends_at_duration() {
        let mut t = SimulatedTransport::with_duration(1.0);
        t.load(Path::new("a.wav"));
        t.play();
        t.tick(0.8);
        t.tick(0.8);
        assert!(!t.is_playing());
        assert_eq!(t.current_position(), 1.0);
    }

    #[test]
    fn test_failing_transport() {
        let mut t = SimulatedTransport::failing();
        assert!(!t.load(Path::new("a.wav")));
    }
}
