//! Equipment health checks, benchmarks and fleet reports.
//!
//! The [`DiagnosticsEngine`] owns the per-equipment statistics fed by the
//! command path and turns them, together with live probes, into an
//! [`EquipmentHealth`] with a weighted 0-100 score (see [`scoring`]).
//!
//! None of the public entry points fail because a probe failed. A dead
//! instrument lowers its own score and shows up as issues in the result.

pub mod probes;
pub mod scoring;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info};

use benchguard_common::{
    CommunicationDiagnostics, CommunicationStats, ConnectionDiagnostics, ConnectionStats,
    DiagnosticCategory, DiagnosticReport, DiagnosticStatus, EquipmentHealth, EquipmentId,
    FunctionalityTestResult, HealthCounts, HealthStatus, MAX_BENCHMARK_HISTORY,
    PerformanceBenchmark, SystemDiagnostics, push_bounded,
};

use crate::equipment::{Equipment, EquipmentRegistry};
use crate::host::HostMetrics;
use probes::{BENCHMARK_QUERIES, FAILED_LATENCY, IDENTIFY};
use scoring::ScoreBreakdown;

/// Round trips at or above this are reported as a connection warning.
pub const SLOW_ROUND_TRIP_MS: f64 = 1000.0;

/// Health checks, benchmarks and the statistics behind them.
pub struct DiagnosticsEngine {
    registry: Arc<EquipmentRegistry>,
    host: Arc<dyn HostMetrics>,
    probe_timeout: Duration,
    connection_stats: DashMap<EquipmentId, ConnectionStats>,
    communication_stats: DashMap<EquipmentId, CommunicationStats>,
    benchmarks: DashMap<EquipmentId, VecDeque<PerformanceBenchmark>>,
    health_cache: DashMap<EquipmentId, EquipmentHealth>,
    started: Instant,
}

impl DiagnosticsEngine {
    pub fn new(
        registry: Arc<EquipmentRegistry>,
        host: Arc<dyn HostMetrics>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            host,
            probe_timeout,
            connection_stats: DashMap::new(),
            communication_stats: DashMap::new(),
            benchmarks: DashMap::new(),
            health_cache: DashMap::new(),
            started: Instant::now(),
        }
    }

    // ------------------------------------------------------------------
    // Statistics entry points (command path)
    // ------------------------------------------------------------------

    pub fn record_connection(&self, equipment_id: &EquipmentId) {
        self.connection_stats
            .entry(equipment_id.clone())
            .or_default()
            .record_connection();
    }

    pub fn record_disconnection(&self, equipment_id: &EquipmentId, error: Option<&str>) {
        self.connection_stats
            .entry(equipment_id.clone())
            .or_default()
            .record_disconnection(error);
    }

    /// Folds one command outcome into the statistics for `equipment_id`.
    pub fn record_command(
        &self,
        equipment_id: &EquipmentId,
        success: bool,
        latency_ms: f64,
        bytes_sent: u64,
        bytes_received: u64,
        error: Option<&str>,
    ) {
        self.communication_stats
            .entry(equipment_id.clone())
            .or_default()
            .record_command(success, latency_ms, bytes_sent, bytes_received, error);
    }

    pub fn record_timeout(&self, equipment_id: &EquipmentId) {
        self.communication_stats.entry(equipment_id.clone()).or_default().timeouts += 1;
    }

    pub fn record_retry(&self, equipment_id: &EquipmentId) {
        self.communication_stats.entry(equipment_id.clone()).or_default().retries += 1;
    }

    pub fn connection_stats(&self, equipment_id: &EquipmentId) -> ConnectionStats {
        self.connection_stats
            .get(equipment_id)
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    pub fn communication_stats(&self, equipment_id: &EquipmentId) -> CommunicationStats {
        self.communication_stats
            .get(equipment_id)
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn communication_snapshot(&self, equipment_id: &EquipmentId) -> CommunicationDiagnostics {
        let stats = self.communication_stats(equipment_id);
        let success_rate = stats.success_rate();
        CommunicationDiagnostics {
            equipment_id: equipment_id.clone(),
            timestamp: Utc::now(),
            total_commands: stats.total_commands,
            successful: stats.successful,
            failed: stats.failed,
            timeouts: stats.timeouts,
            retries: stats.retries,
            success_rate,
            avg_response_ms: stats.average_response_time(),
            min_response_ms: stats.min_response_time(),
            max_response_ms: stats.max_response_time(),
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
            last_error: stats.last_error.clone(),
            recent_errors: stats.error_history.iter().map(|e| e.message.clone()).collect(),
            status: DiagnosticStatus::from_success_rate(success_rate),
        }
    }

    async fn connection_probe(
        &self,
        equipment_id: &EquipmentId,
        equipment: &dyn Equipment,
    ) -> ConnectionDiagnostics {
        let connected = match tokio::time::timeout(self.probe_timeout, equipment.status()).await {
            Ok(Ok(status)) => status.connected,
            Ok(Err(err)) => {
                debug!("Status probe for {} failed: {}", equipment_id, err);
                false
            }
            Err(_) => {
                debug!("Status probe for {} timed out", equipment_id);
                false
            }
        };

        let round_trip_ms = if connected {
            match probes::timed_query(equipment, IDENTIFY, self.probe_timeout).await {
                (Ok(_), elapsed) => Some(elapsed),
                (Err(err), _) => {
                    debug!("Round-trip probe for {} failed: {}", equipment_id, err);
                    None
                }
            }
        } else {
            None
        };

        let stats = self.connection_stats(equipment_id);
        let uptime_secs = match (connected, stats.last_connected) {
            (true, Some(since)) => Some((Utc::now() - since).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };
        let status = match (connected, round_trip_ms) {
            (false, _) => DiagnosticStatus::Fail,
            (true, Some(rtt)) if rtt < SLOW_ROUND_TRIP_MS => DiagnosticStatus::Pass,
            (true, _) => DiagnosticStatus::Warning,
        };

        ConnectionDiagnostics {
            equipment_id: equipment_id.clone(),
            timestamp: Utc::now(),
            connected,
            round_trip_ms,
            connection_count: stats.connection_count,
            disconnection_count: stats.disconnection_count,
            last_connected: stats.last_connected,
            uptime_secs,
            recent_errors: stats.errors.iter().map(|e| e.message.clone()).collect(),
            status,
        }
    }

    // ------------------------------------------------------------------
    // Benchmarks
    // ------------------------------------------------------------------

    /// Benchmarks a registered instrument, `None` if the id is unknown.
    pub async fn run_benchmark(&self, equipment_id: &EquipmentId) -> Option<PerformanceBenchmark> {
        let equipment = self.registry.get(equipment_id)?;
        Some(self.benchmark(equipment_id, equipment.as_ref()).await)
    }

    async fn benchmark(&self, equipment_id: &EquipmentId, equipment: &dyn Equipment) -> PerformanceBenchmark {
        let mut latencies = Vec::with_capacity(BENCHMARK_QUERIES.len());
        for command in BENCHMARK_QUERIES {
            let (result, elapsed) = probes::timed_query(equipment, command, self.probe_timeout).await;
            latencies.push(if result.is_ok() { elapsed } else { FAILED_LATENCY });
        }

        let ok: Vec<f64> = latencies.iter().copied().filter(|l| *l >= 0.0).collect();
        let avg_latency_ms = if ok.is_empty() {
            None
        } else {
            Some(ok.iter().sum::<f64>() / ok.len() as f64)
        };
        let throughput_per_sec = match avg_latency_ms {
            Some(avg) if avg > 0.0 => 1000.0 / avg,
            _ => 0.0,
        };

        let benchmark = PerformanceBenchmark {
            equipment_id: equipment_id.clone(),
            timestamp: Utc::now(),
            query_latencies_ms: latencies,
            avg_latency_ms,
            throughput_per_sec,
            host: self.host.sample(),
            performance_score: scoring::performance_score(avg_latency_ms),
        };

        push_bounded(
            &mut self.benchmarks.entry(equipment_id.clone()).or_default(),
            benchmark.clone(),
            MAX_BENCHMARK_HISTORY,
        );
        benchmark
    }

    /// Stored benchmarks for an instrument, oldest first.
    pub fn benchmark_history(&self, equipment_id: &EquipmentId) -> Vec<PerformanceBenchmark> {
        self.benchmarks
            .get(equipment_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Runs every probe against one instrument and caches the result.
    ///
    /// Unknown ids produce an `Offline` result with score 0 rather than an
    /// error.
    pub async fn check_equipment_health(&self, equipment_id: &EquipmentId) -> EquipmentHealth {
        let Some(equipment) = self.registry.get(equipment_id) else {
            return EquipmentHealth::not_found(equipment_id.clone());
        };

        let connection = self.connection_probe(equipment_id, equipment.as_ref()).await;
        let communication = self.communication_snapshot(equipment_id);
        let (performance, functionality) = if connection.connected {
            let benchmark = self.benchmark(equipment_id, equipment.as_ref()).await;
            let tests = probes::run_functionality_probes(equipment.as_ref(), self.probe_timeout).await;
            (Some(benchmark), tests)
        } else {
            (None, Vec::new())
        };

        let health = assess(connection, communication, performance, functionality);
        debug!(
            "Health of {}: {:?} ({:.1})",
            equipment_id, health.health_status, health.health_score
        );
        self.health_cache.insert(equipment_id.clone(), health.clone());
        health
    }

    /// Last computed health, if any.
    pub fn cached_health(&self, equipment_id: &EquipmentId) -> Option<EquipmentHealth> {
        self.health_cache.get(equipment_id).map(|health| health.clone())
    }

    /// Fleet totals from live status calls and the health cache.
    pub async fn system_diagnostics(&self) -> SystemDiagnostics {
        let fleet = self.registry.snapshot();
        let statuses = join_all(fleet.iter().map(|(_, equipment)| async move {
            matches!(
                tokio::time::timeout(self.probe_timeout, equipment.status()).await,
                Ok(Ok(status)) if status.connected
            )
        }))
        .await;

        let connected = statuses.iter().filter(|connected| **connected).count();
        let mut health = HealthCounts::default();
        for (id, _) in &fleet {
            health.add(
                self.health_cache
                    .get(id)
                    .map(|cached| cached.health_status)
                    .unwrap_or(HealthStatus::Unknown),
            );
        }

        SystemDiagnostics {
            timestamp: Utc::now(),
            total_equipment: fleet.len(),
            connected,
            disconnected: fleet.len() - connected,
            health,
            host: self.host.sample(),
            service_uptime_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    /// Checks the requested instruments (all registered ones when `ids` is
    /// `None`) and rolls the results up.
    ///
    /// `categories` restricts which component results are tallied as passed,
    /// failed or warning; `None` tallies all four.
    pub async fn generate_diagnostic_report(
        &self,
        ids: Option<&[EquipmentId]>,
        categories: Option<&[DiagnosticCategory]>,
    ) -> DiagnosticReport {
        let ids: Vec<EquipmentId> = match ids {
            Some(ids) => ids.to_vec(),
            None => self.registry.ids(),
        };
        let categories: Vec<DiagnosticCategory> = match categories {
            Some(categories) if !categories.is_empty() => categories.to_vec(),
            _ => DiagnosticCategory::ALL.to_vec(),
        };

        let equipment = join_all(ids.iter().map(|id| self.check_equipment_health(id))).await;

        let (mut tests_passed, mut tests_failed, mut tests_warning) = (0, 0, 0);
        let mut issues = Deduplicated::default();
        let mut warnings = Deduplicated::default();
        let mut recommendations = Deduplicated::default();
        for health in &equipment {
            for category in &categories {
                match health.status_for(*category) {
                    DiagnosticStatus::Pass => tests_passed += 1,
                    DiagnosticStatus::Fail => tests_failed += 1,
                    DiagnosticStatus::Warning => tests_warning += 1,
                    DiagnosticStatus::Unknown => {}
                }
            }
            issues.extend(&health.active_issues);
            warnings.extend(&health.warnings);
            recommendations.extend(&health.recommendations);
        }

        let overall_health = HealthStatus::overall(equipment.iter().map(|h| &h.health_status));
        let timestamp = Utc::now();
        info!(
            "Diagnostic report over {} instruments: {:?} ({} passed, {} failed, {} warnings)",
            equipment.len(),
            overall_health,
            tests_passed,
            tests_failed,
            tests_warning
        );

        DiagnosticReport {
            report_id: format!("diag-{}", timestamp.timestamp_millis()),
            timestamp,
            categories,
            equipment,
            overall_health,
            tests_passed,
            tests_failed,
            tests_warning,
            issues: issues.into_inner(),
            warnings: warnings.into_inner(),
            recommendations: recommendations.into_inner(),
            system: self.system_diagnostics().await,
        }
    }
}

/// Order-preserving set of strings.
#[derive(Default)]
struct Deduplicated {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl Deduplicated {
    fn extend<'a>(&mut self, items: impl IntoIterator<Item = &'a String>) {
        for item in items {
            if self.seen.insert(item.clone()) {
                self.items.push(item.clone());
            }
        }
    }

    fn into_inner(self) -> Vec<String> {
        self.items
    }
}

/// Scores the collected diagnostics and derives issues and advice.
fn assess(
    connection: ConnectionDiagnostics,
    communication: CommunicationDiagnostics,
    performance: Option<PerformanceBenchmark>,
    functionality: Vec<FunctionalityTestResult>,
) -> EquipmentHealth {
    let tests_passed = functionality.iter().filter(|t| t.passed).count();
    let tests_failed = functionality.len() - tests_passed;
    let pass_rate = if functionality.is_empty() {
        None
    } else {
        Some(tests_passed as f64 / functionality.len() as f64)
    };
    let performance_score = performance.as_ref().map(|b| b.performance_score);

    let breakdown = ScoreBreakdown {
        connection: scoring::connection_points(connection.connected, connection.round_trip_ms),
        communication: scoring::communication_points(communication.successful, communication.total_commands),
        performance: scoring::performance_points(performance_score),
        functionality: scoring::functionality_points(tests_passed, functionality.len()),
    };
    let health_score = breakdown.total();

    let communication_status = communication.status;
    let performance_status = DiagnosticStatus::from_performance_score(performance_score);
    let functionality_status = DiagnosticStatus::from_pass_rate(pass_rate);

    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    if !connection.connected {
        issues.push("Equipment disconnected".to_string());
        recommendations.push("Check power, cabling and bus address, then reconnect".to_string());
    } else {
        match connection.round_trip_ms {
            None => warnings.push("Identification query failed during connection probe".to_string()),
            Some(rtt) if rtt >= 500.0 => warnings.push(format!("Slow round trip: {rtt:.0} ms")),
            Some(_) => {}
        }
    }

    if let Some(rate) = communication.success_rate {
        let failure_pct = (1.0 - rate) * 100.0;
        match communication_status {
            DiagnosticStatus::Fail => {
                issues.push(format!("High command failure rate: {failure_pct:.1}%"));
                recommendations.push("Inspect bus wiring and command timing".to_string());
            }
            DiagnosticStatus::Warning => {
                warnings.push(format!("Elevated command failure rate: {failure_pct:.1}%"));
            }
            _ => {}
        }
    }
    if communication.timeouts > 0 {
        warnings.push(format!("{} command timeouts recorded", communication.timeouts));
    }
    if let Some(avg) = communication.avg_response_ms.filter(|avg| *avg >= SLOW_ROUND_TRIP_MS) {
        warnings.push(format!("High average response time: {avg:.0} ms"));
        recommendations.push("Reduce polling load on the instrument bus".to_string());
    }

    match (performance_status, performance_score) {
        (DiagnosticStatus::Fail, Some(score)) => {
            issues.push(format!("Poor performance score: {score:.0}"));
            recommendations.push("Check bus latency and instrument load".to_string());
        }
        (DiagnosticStatus::Warning, Some(score)) => {
            warnings.push(format!("Reduced performance score: {score:.0}"));
        }
        _ => {}
    }

    for test in functionality.iter().filter(|t| !t.passed) {
        issues.push(format!("Functionality test failed: {}", test.name));
    }
    if tests_failed > 0 {
        recommendations.push("Run the instrument self-test and clear its error queue".to_string());
    }

    EquipmentHealth {
        equipment_id: connection.equipment_id.clone(),
        timestamp: Utc::now(),
        health_status: HealthStatus::from_score(health_score),
        health_score,
        connection_status: connection.status,
        communication_status,
        performance_status,
        functionality_status,
        connection: Some(connection),
        communication: Some(communication),
        performance,
        functionality_tests: functionality,
        tests_passed,
        tests_failed,
        active_issues: issues,
        warnings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FixedHost;
    use crate::sim::SimulatedInstrument;
    use benchguard_common::{EquipmentType, MAX_RESPONSE_SAMPLES};

    fn engine_with(instruments: Vec<(&str, SimulatedInstrument)>) -> DiagnosticsEngine {
        let registry = Arc::new(EquipmentRegistry::new());
        for (id, instrument) in instruments {
            registry.insert(EquipmentId::new(id), Arc::new(instrument));
        }
        DiagnosticsEngine::new(registry, Arc::new(FixedHost::default()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_unknown_equipment_is_offline() {
        let engine = engine_with(vec![]);
        let health = engine.check_equipment_health(&EquipmentId::new("ghost")).await;

        assert_eq!(health.health_status, HealthStatus::Offline);
        assert_eq!(health.health_score, 0.0);
        assert!(health.active_issues.iter().any(|i| i == "Equipment not found"));
        assert!(engine.run_benchmark(&EquipmentId::new("ghost")).await.is_none());
    }

    #[tokio::test]
    async fn test_disconnected_without_history() {
        let engine = engine_with(vec![("psu-1", SimulatedInstrument::new(EquipmentType::PowerSupply))]);
        let id = EquipmentId::new("psu-1");
        let health = engine.check_equipment_health(&id).await;

        assert_eq!(health.health_score, 0.0);
        assert_eq!(health.health_status, HealthStatus::Offline);
        assert_eq!(health.connection_status, DiagnosticStatus::Fail);
        assert_eq!(health.communication_status, DiagnosticStatus::Unknown);
        assert_eq!(health.performance_status, DiagnosticStatus::Unknown);
        assert_eq!(health.functionality_status, DiagnosticStatus::Unknown);
        assert!(health.performance.is_none());
        assert!(health.active_issues.iter().any(|i| i.contains("disconnected")));
        assert!(engine.benchmark_history(&id).is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_degrades_score() {
        let instrument = SimulatedInstrument::new(EquipmentType::PowerSupply)
            .connected(true)
            .with_error_queue("-113,\"Undefined header\"");
        let engine = engine_with(vec![("psu-1", instrument)]);
        let health = engine.check_equipment_health(&EquipmentId::new("psu-1")).await;

        assert_eq!(health.tests_passed, 2);
        assert_eq!(health.tests_failed, 1);
        assert_eq!(health.functionality_status, DiagnosticStatus::Fail);
        assert!(health
            .active_issues
            .iter()
            .any(|i| i == "Functionality test failed: error_queue"));
        // 40 connection + 0 communication + 20 performance + 13.3 functionality
        assert!((health.health_score - (40.0 + 20.0 + 20.0 * 2.0 / 3.0)).abs() < 1e-6);
        assert_eq!(health.health_status, HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_benchmark_penalty() {
        let instrument = SimulatedInstrument::new(EquipmentType::Oscilloscope)
            .connected(true)
            .latency(Duration::from_millis(300));
        let engine = engine_with(vec![("scope-1", instrument)]);
        let benchmark = engine.run_benchmark(&EquipmentId::new("scope-1")).await.unwrap();

        let avg = benchmark.avg_latency_ms.unwrap();
        assert!((avg - 300.0).abs() < 5.0);
        assert!((benchmark.performance_score - (100.0 - (avg - 100.0) / 10.0)).abs() < 1e-9);
        assert!((benchmark.throughput_per_sec - 1000.0 / avg).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_benchmark_queries_use_sentinel() {
        let instrument = SimulatedInstrument::new(EquipmentType::Oscilloscope)
            .connected(true)
            .fail_queries(2);
        let engine = engine_with(vec![("scope-1", instrument)]);
        let benchmark = engine.run_benchmark(&EquipmentId::new("scope-1")).await.unwrap();

        assert_eq!(benchmark.query_latencies_ms[0], FAILED_LATENCY);
        assert_eq!(benchmark.query_latencies_ms[1], FAILED_LATENCY);
        assert!(benchmark.query_latencies_ms[2] >= 0.0);
        assert_eq!(benchmark.avg_latency_ms, Some(benchmark.query_latencies_ms[2]));
    }

    #[tokio::test]
    async fn test_benchmark_history_is_capped() {
        let instrument = SimulatedInstrument::new(EquipmentType::Oscilloscope).connected(true);
        let engine = engine_with(vec![("scope-1", instrument)]);
        let id = EquipmentId::new("scope-1");
        for _ in 0..(MAX_BENCHMARK_HISTORY + 5) {
            engine.run_benchmark(&id).await;
        }
        assert_eq!(engine.benchmark_history(&id).len(), MAX_BENCHMARK_HISTORY);
    }

    #[test]
    fn test_response_ring_is_capped() {
        let engine = engine_with(vec![]);
        let id = EquipmentId::new("psu-1");
        for _ in 0..1500 {
            engine.record_command(&id, true, 12.0, 8, 16, None);
        }
        let stats = engine.communication_stats(&id);
        assert_eq!(stats.response_times.len(), MAX_RESPONSE_SAMPLES);
        assert_eq!(stats.total_commands, 1500);
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        let engine = Arc::new(engine_with(vec![]));
        let id = EquipmentId::new("psu-1");

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let engine = engine.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        engine.record_command(&id, worker % 2 == 0, 5.0, 1, 1, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = engine.communication_stats(&id);
        assert_eq!(stats.total_commands, 2000);
        assert_eq!(stats.successful, 1000);
        assert_eq!(stats.failed, 1000);
        assert_eq!(stats.response_times.len(), MAX_RESPONSE_SAMPLES);
    }

    #[tokio::test]
    async fn test_communication_bands_drive_issues() {
        let instrument = SimulatedInstrument::new(EquipmentType::PowerSupply).connected(true);
        let engine = engine_with(vec![("psu-1", instrument)]);
        let id = EquipmentId::new("psu-1");
        for i in 0..10 {
            engine.record_command(&id, i < 5, 20.0, 4, 4, (i >= 5).then_some("bus error"));
        }

        let health = engine.check_equipment_health(&id).await;
        assert_eq!(health.communication_status, DiagnosticStatus::Fail);
        assert!(health
            .active_issues
            .iter()
            .any(|i| i.starts_with("High command failure rate")));
        assert_eq!(engine.cached_health(&id), Some(health));
    }

    #[test]
    fn test_deduplicated_keeps_first_order() {
        let mut set = Deduplicated::default();
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string(), "z".to_string()];
        set.extend(&a);
        set.extend(&b);
        assert_eq!(set.into_inner(), vec!["x", "y", "z"]);
    }
}
