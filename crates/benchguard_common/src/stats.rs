//! Per-equipment statistics accumulated by the connection and command paths.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response-time samples kept per equipment.
pub const MAX_RESPONSE_SAMPLES: usize = 1000;
/// Command errors kept per equipment.
pub const MAX_ERROR_HISTORY: usize = 10;
/// Connection errors kept per equipment.
pub const MAX_CONNECTION_ERRORS: usize = 100;
/// Benchmarks kept per equipment.
pub const MAX_BENCHMARK_HISTORY: usize = 100;
/// Safety events kept per equipment.
pub const MAX_SAFETY_EVENTS: usize = 100;

/// Appends to a fixed-capacity ring, evicting the oldest entry first.
pub fn push_bounded<T>(ring: &mut VecDeque<T>, value: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(value);
}

/// A timestamped error message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    /// When the error was recorded
    pub timestamp: DateTime<Utc>,
    /// Error text
    pub message: String,
}

impl ErrorRecord {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Connect/disconnect history for one equipment.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConnectionStats {
    pub connection_count: u64,
    pub disconnection_count: u64,
    pub last_connected: Option<DateTime<Utc>>,
    /// Most recent last, capped at [`MAX_CONNECTION_ERRORS`]
    pub errors: VecDeque<ErrorRecord>,
}

impl ConnectionStats {
    pub fn record_connection(&mut self) {
        self.connection_count += 1;
        self.last_connected = Some(Utc::now());
    }

    pub fn record_disconnection(&mut self, error: Option<&str>) {
        self.disconnection_count += 1;
        if let Some(error) = error {
            push_bounded(
                &mut self.errors,
                ErrorRecord::now(error),
                MAX_CONNECTION_ERRORS,
            );
        }
    }
}

/// Command-path counters for one equipment.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CommunicationStats {
    pub total_commands: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retries: u64,
    /// Latency samples in milliseconds, oldest evicted first
    pub response_times: VecDeque<f64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_error: Option<String>,
    /// Last [`MAX_ERROR_HISTORY`] command errors
    pub error_history: VecDeque<ErrorRecord>,
}

impl CommunicationStats {
    /// Folds one command outcome into the counters.
    pub fn record_command(
        &mut self,
        success: bool,
        latency_ms: f64,
        bytes_sent: u64,
        bytes_received: u64,
        error: Option<&str>,
    ) {
        self.total_commands += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }

        if latency_ms.is_finite() && latency_ms >= 0.0 {
            push_bounded(&mut self.response_times, latency_ms, MAX_RESPONSE_SAMPLES);
        }

        self.bytes_sent = self.bytes_sent.saturating_add(bytes_sent);
        self.bytes_received = self.bytes_received.saturating_add(bytes_received);

        if let Some(error) = error {
            self.last_error = Some(error.to_string());
            push_bounded(
                &mut self.error_history,
                ErrorRecord::now(error),
                MAX_ERROR_HISTORY,
            );
        }
    }

    /// Fraction of commands that succeeded, `None` before the first command.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_commands == 0 {
            return None;
        }
        Some(self.successful as f64 / self.total_commands as f64)
    }

    pub fn average_response_time(&self) -> Option<f64> {
        if self.response_times.is_empty() {
            return None;
        }
        Some(self.response_times.iter().sum::<f64>() / self.response_times.len() as f64)
    }

    pub fn min_response_time(&self) -> Option<f64> {
        self.response_times.iter().copied().reduce(f64::min)
    }

    pub fn max_response_time(&self) -> Option<f64> {
        self.response_times.iter().copied().reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_bounded_evicts_oldest() {
        let mut ring = VecDeque::new();
        for i in 0..5 {
            push_bounded(&mut ring, i, 3);
        }
        assert_eq!(ring, VecDeque::from(vec![2, 3, 4]));
    }

    #[test]
    fn test_response_time_cap() {
        let mut stats = CommunicationStats::default();
        for i in 0..1500 {
            stats.record_command(true, i as f64, 4, 10, None);
        }

        assert_eq!(stats.response_times.len(), MAX_RESPONSE_SAMPLES);
        // samples 0..500 were evicted
        assert_eq!(stats.response_times.front().copied(), Some(500.0));
        assert_eq!(stats.response_times.back().copied(), Some(1499.0));
        assert_eq!(stats.total_commands, 1500);
        assert_eq!(stats.bytes_sent, 6000);
    }

    #[test]
    fn test_error_history_keeps_last_ten() {
        let mut stats = CommunicationStats::default();
        for i in 0..15 {
            stats.record_command(false, 1.0, 0, 0, Some(&format!("err {i}")));
        }

        assert_eq!(stats.error_history.len(), MAX_ERROR_HISTORY);
        assert_eq!(stats.error_history[0].message, "err 5");
        assert_eq!(stats.last_error.as_deref(), Some("err 14"));
        assert_eq!(stats.failed, 15);
        assert_eq!(stats.success_rate(), Some(0.0));
    }

    #[test]
    fn test_success_rate_unknown_without_commands() {
        let stats = CommunicationStats::default();
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.average_response_time(), None);
    }

    #[test]
    fn test_disconnection_logs_error() {
        let mut stats = ConnectionStats::default();
        stats.record_connection();
        stats.record_disconnection(Some("bus reset"));
        stats.record_disconnection(None);

        assert_eq!(stats.connection_count, 1);
        assert_eq!(stats.disconnection_count, 2);
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.last_connected.is_some());
    }
}
