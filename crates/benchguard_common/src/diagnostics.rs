//! Diagnostics snapshots and health classifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EquipmentId;

/// Outcome of one diagnostic component.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Pass,
    Warning,
    Fail,
    #[default]
    Unknown,
}

impl DiagnosticStatus {
    /// Communication bands: pass at 95% success, warning at 80%.
    pub fn from_success_rate(rate: Option<f64>) -> Self {
        match rate {
            None => DiagnosticStatus::Unknown,
            Some(rate) if rate >= 0.95 => DiagnosticStatus::Pass,
            Some(rate) if rate >= 0.80 => DiagnosticStatus::Warning,
            Some(_) => DiagnosticStatus::Fail,
        }
    }

    /// Performance bands: pass at score 80, warning at 60.
    pub fn from_performance_score(score: Option<f64>) -> Self {
        match score {
            None => DiagnosticStatus::Unknown,
            Some(score) if score >= 80.0 => DiagnosticStatus::Pass,
            Some(score) if score >= 60.0 => DiagnosticStatus::Warning,
            Some(_) => DiagnosticStatus::Fail,
        }
    }

    /// Functionality bands: pass at 90% of probes, warning at 70%.
    pub fn from_pass_rate(rate: Option<f64>) -> Self {
        match rate {
            None => DiagnosticStatus::Unknown,
            Some(rate) if rate >= 0.90 => DiagnosticStatus::Pass,
            Some(rate) if rate >= 0.70 => DiagnosticStatus::Warning,
            Some(_) => DiagnosticStatus::Fail,
        }
    }
}

/// Overall health band derived from a health score.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Warning,
    Critical,
    Offline,
    /// Only produced for fleet summaries that match no other band.
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Maps a 0-100 score onto its band.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Healthy
        } else if score >= 70.0 {
            HealthStatus::Degraded
        } else if score >= 50.0 {
            HealthStatus::Warning
        } else if score > 0.0 {
            HealthStatus::Critical
        } else {
            HealthStatus::Offline
        }
    }

    /// Fleet rollup: healthy only if every member is healthy, otherwise the
    /// first of critical, warning, degraded present in the set.
    pub fn overall<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> Self {
        let statuses: Vec<HealthStatus> = statuses.into_iter().copied().collect();
        if statuses.is_empty() {
            return HealthStatus::Unknown;
        }
        if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if statuses.contains(&HealthStatus::Critical) {
            HealthStatus::Critical
        } else if statuses.contains(&HealthStatus::Warning) {
            HealthStatus::Warning
        } else if statuses.contains(&HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unknown
        }
    }
}

/// Component selector for diagnostic reports.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    Connection,
    Communication,
    Performance,
    Functionality,
}

impl DiagnosticCategory {
    pub const ALL: [DiagnosticCategory; 4] = [
        DiagnosticCategory::Connection,
        DiagnosticCategory::Communication,
        DiagnosticCategory::Performance,
        DiagnosticCategory::Functionality,
    ];
}

/// Point-in-time view of an equipment's link.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConnectionDiagnostics {
    pub equipment_id: EquipmentId,
    pub timestamp: DateTime<Utc>,
    pub connected: bool,
    /// Round trip of an identification query, `None` when it was not
    /// attempted or failed
    pub round_trip_ms: Option<f64>,
    pub connection_count: u64,
    pub disconnection_count: u64,
    pub last_connected: Option<DateTime<Utc>>,
    /// Seconds since the last recorded connection, while connected
    pub uptime_secs: Option<f64>,
    pub recent_errors: Vec<String>,
    pub status: DiagnosticStatus,
}

/// Snapshot of the command-path counters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CommunicationDiagnostics {
    pub equipment_id: EquipmentId,
    pub timestamp: DateTime<Utc>,
    pub total_commands: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub success_rate: Option<f64>,
    pub avg_response_ms: Option<f64>,
    pub min_response_ms: Option<f64>,
    pub max_response_ms: Option<f64>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_error: Option<String>,
    pub recent_errors: Vec<String>,
    pub status: DiagnosticStatus,
}

/// Host resource usage sampled at measurement time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct HostSnapshot {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub uptime_secs: u64,
}

impl HostSnapshot {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_total_bytes as f64 * 100.0
    }
}

/// Result of a short latency benchmark against one equipment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PerformanceBenchmark {
    pub equipment_id: EquipmentId,
    pub timestamp: DateTime<Utc>,
    /// Per-query latency; `-1.0` marks a failed query
    pub query_latencies_ms: Vec<f64>,
    pub avg_latency_ms: Option<f64>,
    pub throughput_per_sec: f64,
    pub host: HostSnapshot,
    pub performance_score: f64,
}

/// One functionality probe.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionalityTestResult {
    pub name: String,
    pub command: String,
    pub passed: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    pub duration_ms: f64,
}

/// Composite health of one equipment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EquipmentHealth {
    pub equipment_id: EquipmentId,
    pub timestamp: DateTime<Utc>,
    pub health_status: HealthStatus,
    /// Always within `[0, 100]`
    pub health_score: f64,
    pub connection_status: DiagnosticStatus,
    pub communication_status: DiagnosticStatus,
    pub performance_status: DiagnosticStatus,
    pub functionality_status: DiagnosticStatus,
    pub connection: Option<ConnectionDiagnostics>,
    pub communication: Option<CommunicationDiagnostics>,
    pub performance: Option<PerformanceBenchmark>,
    pub functionality_tests: Vec<FunctionalityTestResult>,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub active_issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl EquipmentHealth {
    /// Result returned for an id with no registered equipment.
    pub fn not_found(equipment_id: EquipmentId) -> Self {
        Self {
            equipment_id,
            timestamp: Utc::now(),
            health_status: HealthStatus::Offline,
            health_score: 0.0,
            connection_status: DiagnosticStatus::Unknown,
            communication_status: DiagnosticStatus::Unknown,
            performance_status: DiagnosticStatus::Unknown,
            functionality_status: DiagnosticStatus::Unknown,
            connection: None,
            communication: None,
            performance: None,
            functionality_tests: Vec::new(),
            tests_passed: 0,
            tests_failed: 0,
            active_issues: vec!["Equipment not found".to_string()],
            warnings: Vec::new(),
            recommendations: vec!["Verify the equipment id and registration".to_string()],
        }
    }

    /// Component status for a report category.
    pub fn status_for(&self, category: DiagnosticCategory) -> DiagnosticStatus {
        match category {
            DiagnosticCategory::Connection => self.connection_status,
            DiagnosticCategory::Communication => self.communication_status,
            DiagnosticCategory::Performance => self.performance_status,
            DiagnosticCategory::Functionality => self.functionality_status,
        }
    }
}

/// Equipment counts per health band.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HealthCounts {
    pub healthy: usize,
    pub degraded: usize,
    pub warning: usize,
    pub critical: usize,
    pub offline: usize,
    pub unknown: usize,
}

impl HealthCounts {
    pub fn add(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Degraded => self.degraded += 1,
            HealthStatus::Warning => self.warning += 1,
            HealthStatus::Critical => self.critical += 1,
            HealthStatus::Offline => self.offline += 1,
            HealthStatus::Unknown => self.unknown += 1,
        }
    }
}

/// Fleet-wide totals.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SystemDiagnostics {
    pub timestamp: DateTime<Utc>,
    pub total_equipment: usize,
    pub connected: usize,
    pub disconnected: usize,
    /// Counts over the cached health of each equipment; equipment never
    /// checked is counted as unknown
    pub health: HealthCounts,
    pub host: HostSnapshot,
    pub service_uptime_secs: f64,
}

/// Aggregated report over several equipment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DiagnosticReport {
    pub report_id: String,
    pub timestamp: DateTime<Utc>,
    pub categories: Vec<DiagnosticCategory>,
    pub equipment: Vec<EquipmentHealth>,
    pub overall_health: HealthStatus,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_warning: usize,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub system: SystemDiagnostics,
}
