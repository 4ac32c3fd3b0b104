use super::transport::AudioTransport;

/// Session time at the start of the countdown, seconds.
pub const PRE_ROLL: f64 = -3.0;
/// Countdown between unpausing and play continuing, seconds.
pub const RESUME_COUNTDOWN: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockPhase {
    Running,
    Paused,
    Resuming { remaining: f64 },
}

/// Authoritative session time.
///
/// Integrates frame deltas from the pre-roll, starts the transport when time
/// reaches zero, then follows the transport's reported position so visuals
/// cannot drift from what is heard.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    time: f64,
    audio_started: bool,
    phase: ClockPhase,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            time: PRE_ROLL,
            audio_started: false,
            phase: ClockPhase::Running,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn phase(&self) -> ClockPhase {
        self.phase
    }

    /// Paused or counting down to resume: time is frozen.
    pub fn is_frozen(&self) -> bool {
        self.phase != ClockPhase::Running
    }

    pub fn audio_started(&self) -> bool {
        self.audio_started
    }

    /// Seconds left on whichever countdown is showing, if any.
    pub fn countdown(&self) -> Option<f64> {
        match self.phase {
            ClockPhase::Resuming { remaining } => Some(remaining),
            ClockPhase::Running if self.time < 0.0 => Some(-self.time),
            _ => None,
        }
    }

    pub fn pause<T: AudioTransport>(&mut self, transport: &mut T) {
        if self.phase == ClockPhase::Running {
            self.phase = ClockPhase::Paused;
            if self.audio_started {
                transport.pause();
            }
        }
    }

    /// Arm the resume countdown. Time stays frozen until it elapses.
    pub fn resume(&mut self) {
        if self.phase == ClockPhase::Paused {
            self.phase = ClockPhase::Resuming {
                remaining: RESUME_COUNTDOWN,
            };
        }
    }

    pub fn toggle_pause<T: AudioTransport>(&mut self, transport: &mut T) {
        match self.phase {
            ClockPhase::Running => self.pause(transport),
            ClockPhase::Paused => self.resume(),
            // Ignored mid-countdown.
            ClockPhase::Resuming { .. } => {}
        }
    }

    /// Advance by one frame.
    pub fn update<T: AudioTransport>(&mut self, dt: f64, transport: &mut T) {
        match self.phase {
            ClockPhase::Paused => {}
            ClockPhase::Resuming { remaining } => {
                let remaining = remaining - dt;
                if remaining <= 0.0 {
                    self.phase = ClockPhase::Running;
                    if self.audio_started {
                        transport.resume();
                    }
                } else {
                    self.phase = ClockPhase::Resuming { remaining };
                }
            }
            ClockPhase::Running => {
                self.time += dt;
                if self.time >= 0.0 && !self.audio_started {
                    transport.play();
                    self.audio_started = true;
                    log::debug!("Audio started at t={:.3}", self.time);
                }
                if self.audio_started && transport.is_playing() {
                    let pos = transport.current_position();
                    if pos > 0.0 {
                        self.time = pos;
                    }
                }
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
