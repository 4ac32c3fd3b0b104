use crate::analyzer::energy::ProfileCursor;
use crate::config::SessionConfig;
use crate::difficulty::Difficulty;

/// Extra speed at full energy in smart mode (1.0x to 1.7x).
pub const SMART_SPEED_RANGE: f64 = 0.7;

/// Scroll velocity per frame.
#[derive(Debug, Clone)]
pub enum SpeedController {
    Fixed(f64),
    /// Base speed scaled by the interpolated energy at the current time.
    Smart {
        base: f64,
        profile: Vec<(f64, f64)>,
        cursor: ProfileCursor,
    },
}

impl SpeedController {
    pub fn fixed(speed: f64) -> Self {
        Self::Fixed(speed)
    }

    pub fn smart(difficulty: Difficulty, profile: Vec<(f64, f64)>) -> Self {
        Self::Smart {
            base: difficulty.base_speed(),
            profile,
            cursor: ProfileCursor::new(),
        }
    }

    /// Smart mode when enabled and a profile exists, otherwise the session's
    /// fixed speed. Smart mode scales the difficulty's table speed.
    pub fn for_session(session: &SessionConfig, profile: &[(f64, f64)]) -> Self {
        if session.smart_speed && !profile.is_empty() {
            Self::smart(session.difficulty, profile.to_vec())
        } else {
            Self::fixed(session.scroll_speed())
        }
    }

    /// Speed at `time`. Call with non-decreasing times; the cursor never
    /// moves back until [`reset`](Self::reset).
    pub fn speed_at(&mut self, time: f64) -> f64 {
        match self {
            Self::Fixed(speed) => *speed,
            Self::Smart {
                base,
                profile,
                cursor,
            } => {
                let energy = cursor.sample(profile, time).clamp(0.0, 1.0);
                *base * (1.0 + SMART_SPEED_RANGE * energy)
            }
        }
    }

    pub fn reset(&mut self) {
        if let Self::Smart { cursor, .. } = self {
            cursor.reset();
        }
    }

    pub fn is_smart(&self) -> bool {
        matches!(self, Self::Smart { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_speed_from_table_or_override() {
        let mut session = SessionConfig {
            difficulty: Difficulty::Insane,
            ..SessionConfig::default()
        };
        let mut s = SpeedController::for_session(&session, &[]);
        assert_eq!(s.speed_at(10.0), 900.0);
        session.speed = Some(640);
        let mut s = SpeedController::for_session(&session, &[(0.0, 1.0)]);
        assert_eq!(s.speed_at(0.0), 640.0);
    }

    #[test]
    fn test_smart_speed_range() {
        let profile = vec![(0.0, 0.0), (1.0, 1.0), (2.0, 0.5)];
        let mut s = SpeedController::smart(Difficulty::Normal, profile);
        assert!((s.speed_at(0.0) - 500.0).abs() < 1e-9);
        assert!((s.speed_at(0.5) - 500.0 * 1.35).abs() < 1e-9);
        assert!((s.speed_at(1.0) - 850.0).abs() < 1e-9);
        assert!((s.speed_at(5.0) - 500.0 * 1.35).abs() < 1e-9);
    }

    #[test]
    fn test_smart_requires_profile() {
        let session = SessionConfig {
            smart_speed: true,
            ..SessionConfig::default()
        };
        assert!(!SpeedController::for_session(&session, &[]).is_smart());
        assert!(SpeedController::for_session(&session, &[(0.0, 0.2)]).is_smart());
    }

    #[test]
    fn test_reset_rewinds_cursor() {
        let profile = vec![(0.0, 0.0), (1.0, 1.0)];
        let mut s = SpeedController::smart(Difficulty::Easy, profile);
        s.speed_at(1.0);
        s.reset();
        assert!((s.speed_at(0.5) - 350.0 * 1.35).abs() < 1e-9);
    }
}
