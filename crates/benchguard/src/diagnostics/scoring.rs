//! Weighted health score.
//!
//! | component     | points                                              |
//! |---------------|-----------------------------------------------------|
//! | connection    | 30 if connected, +10 below 100 ms, +5 below 500 ms  |
//! | communication | 30 x success rate                                   |
//! | performance   | 20 x benchmark score / 100                          |
//! | functionality | 20 x probe pass rate                                |
//!
//! The connection bonus sits on top of its 30 points, so the raw sum can
//! exceed 100; only the final total is clamped.

use serde::{Deserialize, Serialize};

pub const CONNECTION_POINTS: f64 = 30.0;
pub const FAST_LINK_BONUS: f64 = 10.0;
pub const FAIR_LINK_BONUS: f64 = 5.0;
pub const COMMUNICATION_POINTS: f64 = 30.0;
pub const PERFORMANCE_POINTS: f64 = 20.0;
pub const FUNCTIONALITY_POINTS: f64 = 20.0;

/// Latency above which the benchmark score starts to drop.
pub const LATENCY_PENALTY_THRESHOLD_MS: f64 = 100.0;
pub const MAX_LATENCY_PENALTY: f64 = 50.0;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub connection: f64,
    pub communication: f64,
    pub performance: f64,
    pub functionality: f64,
}

impl ScoreBreakdown {
    /// Sum of all components clamped to `[0, 100]`.
    pub fn total(&self) -> f64 {
        let sum = self.connection + self.communication + self.performance + self.functionality;
        if sum.is_nan() {
            return 0.0;
        }
        sum.clamp(0.0, 100.0)
    }
}

pub fn connection_points(connected: bool, round_trip_ms: Option<f64>) -> f64 {
    if !connected {
        return 0.0;
    }
    let bonus = match round_trip_ms {
        Some(rtt) if rtt < 100.0 => FAST_LINK_BONUS,
        Some(rtt) if rtt < 500.0 => FAIR_LINK_BONUS,
        _ => 0.0,
    };
    CONNECTION_POINTS + bonus
}

pub fn communication_points(successful: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    COMMUNICATION_POINTS * (successful as f64 / total as f64)
}

pub fn performance_points(performance_score: Option<f64>) -> f64 {
    performance_score
        .map(|score| PERFORMANCE_POINTS * (score / 100.0))
        .unwrap_or(0.0)
}

pub fn functionality_points(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    FUNCTIONALITY_POINTS * (passed as f64 / total as f64)
}

/// Benchmark score from the mean latency of the successful queries.
///
/// 100 up to [`LATENCY_PENALTY_THRESHOLD_MS`], then one point lost per 10 ms,
/// at most [`MAX_LATENCY_PENALTY`]. No successful query scores 0.
pub fn performance_score(avg_latency_ms: Option<f64>) -> f64 {
    let Some(avg) = avg_latency_ms else {
        return 0.0;
    };
    let penalty = if avg > LATENCY_PENALTY_THRESHOLD_MS {
        ((avg - LATENCY_PENALTY_THRESHOLD_MS) / 10.0).min(MAX_LATENCY_PENALTY)
    } else {
        0.0
    };
    (100.0 - penalty).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_bonus() {
        assert_eq!(connection_points(false, Some(10.0)), 0.0);
        assert_eq!(connection_points(true, Some(40.0)), 40.0);
        assert_eq!(connection_points(true, Some(100.0)), 35.0);
        assert_eq!(connection_points(true, Some(499.0)), 35.0);
        assert_eq!(connection_points(true, Some(500.0)), 30.0);
        assert_eq!(connection_points(true, None), 30.0);
    }

    #[test]
    fn test_ratios() {
        assert_eq!(communication_points(0, 0), 0.0);
        assert_eq!(communication_points(50, 100), 15.0);
        assert_eq!(functionality_points(0, 0), 0.0);
        assert_eq!(functionality_points(3, 3), 20.0);
        assert_eq!(performance_points(None), 0.0);
        assert!((performance_points(Some(95.0)) - 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_penalty() {
        assert_eq!(performance_score(Some(40.0)), 100.0);
        assert_eq!(performance_score(Some(100.0)), 100.0);
        assert_eq!(performance_score(Some(250.0)), 85.0);
        assert_eq!(performance_score(Some(10_000.0)), 50.0);
        assert_eq!(performance_score(None), 0.0);
    }

    #[test]
    fn test_total_is_clamped() {
        let full = ScoreBreakdown {
            connection: 40.0,
            communication: 30.0,
            performance: 20.0,
            functionality: 20.0,
        };
        assert_eq!(full.total(), 100.0);
        assert_eq!(ScoreBreakdown::default().total(), 0.0);
    }

    #[test]
    fn test_total_stays_in_range() {
        for connected in [false, true] {
            for rtt in [None, Some(1.0), Some(300.0), Some(5000.0)] {
                for (ok, total) in [(0, 0), (0, 10), (7, 10), (10, 10)] {
                    for perf in [None, Some(0.0), Some(50.0), Some(100.0)] {
                        for (passed, probes) in [(0, 0), (0, 3), (2, 3), (3, 3)] {
                            let score = ScoreBreakdown {
                                connection: connection_points(connected, rtt),
                                communication: communication_points(ok, total),
                                performance: performance_points(perf),
                                functionality: functionality_points(passed, probes),
                            }
                            .total();
                            assert!((0.0..=100.0).contains(&score));
                        }
                    }
                }
            }
        }
    }
}
