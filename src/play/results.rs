use std::fmt;

use serde::{Deserialize, Serialize};

use super::judge::JudgmentStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rank {
    S,
    A,
    B,
    C,
    F,
}

impl Rank {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 0.95 {
            Self::S
        } else if accuracy >= 0.90 {
            Self::A
        } else if accuracy >= 0.80 {
            Self::B
        } else if accuracy >= 0.70 {
            Self::C
        } else {
            Self::F
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::S => "S",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::F => "F",
        };
        f.write_str(s)
    }
}

/// End-of-session record handed to the results screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResults {
    pub score: u64,
    pub max_combo: u32,
    pub perfects: u32,
    pub goods: u32,
    pub misses: u32,
    pub accuracy: f64,
    pub rank: Rank,
}

impl SessionResults {
    pub fn from_stats(stats: &JudgmentStats) -> Self {
        let accuracy = accuracy(stats.perfects, stats.goods, stats.misses);
        Self {
            score: stats.score,
            max_combo: stats.max_combo,
            perfects: stats.perfects,
            goods: stats.goods,
            misses: stats.misses,
            accuracy,
            rank: Rank::from_accuracy(accuracy),
        }
    }

    pub fn total_notes(&self) -> u32 {
        self.perfects + self.goods + self.misses
    }
}

/// `(perfects + goods / 2) / total`, 0 when nothing was judged.
pub fn accuracy(perfects: u32, goods: u32, misses: u32) -> f64 {
    let total = perfects + goods + misses;
    if total == 0 {
        return 0.0;
    }
    (perfects as f64 + 0.5 * goods as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eighteen_perfects_two_goods_is_s() {
        let stats = JudgmentStats {
            perfects: 18,
            goods: 2,
            misses: 0,
            ..JudgmentStats::default()
        };
        let r = SessionResults::from_stats(&stats);
        assert_eq!(r.total_notes(), 20);
        assert!((r.accuracy - 0.95).abs() < 1e-12);
        assert_eq!(r.rank, Rank::S);
    }

    #[test]
    fn test_rank_thresholds() {
        assert_eq!(Rank::from_accuracy(1.0), Rank::S);
        assert_eq!(Rank::from_accuracy(0.949), Rank::A);
        assert_eq!(Rank::from_accuracy(0.90), Rank::A);
        assert_eq!(Rank::from_accuracy(0.85), Rank::B);
        assert_eq!(Rank::from_accuracy(0.70), Rank::C);
        assert_eq!(Rank::from_accuracy(0.69), Rank::F);
    }

    #[test]
    fn test_empty_session_accuracy() {
        assert_eq!(accuracy(0, 0, 0), 0.0);
        let r = SessionResults::from_stats(&JudgmentStats::default());
        assert_eq!(r.rank, Rank::F);
    }

    #[test]
    fn test_results_serialize() {
        let stats = JudgmentStats {
            score: 1234,
            max_combo: 9,
            perfects: 7,
            goods: 1,
            misses: 2,
            ..JudgmentStats::default()
        };
        let json = serde_json::to_string(&SessionResults::from_stats(&stats)).unwrap();
        assert!(json.contains("\"rank\":\"C\""));
        assert!(json.contains("\"score\":1234"));
    }
}
