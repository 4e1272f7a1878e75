//! Live probes issued against an instrument during a health check.

use std::time::Duration;

use tokio::time::{Instant, timeout};

use benchguard_common::{EquipmentError, FunctionalityTestResult};

use crate::equipment::Equipment;

/// Identification query, also used for round-trip timing.
pub const IDENTIFY: &str = "*IDN?";
pub const OPERATION_COMPLETE: &str = "*OPC?";
pub const ERROR_QUEUE: &str = "SYST:ERR?";
pub const STATUS_BYTE: &str = "*STB?";

/// Lightweight queries timed by the performance benchmark.
pub const BENCHMARK_QUERIES: [&str; 3] = [IDENTIFY, OPERATION_COMPLETE, STATUS_BYTE];

/// Latency recorded for a benchmark query that failed.
pub const FAILED_LATENCY: f64 = -1.0;

/// A fixed functionality check: one query and a predicate on its reply.
pub struct FunctionalityProbe {
    pub name: &'static str,
    pub command: &'static str,
    accepts: fn(&str) -> bool,
}

impl FunctionalityProbe {
    pub fn accepts(&self, reply: &str) -> bool {
        (self.accepts)(reply)
    }
}

fn identifies(reply: &str) -> bool {
    !reply.trim().is_empty()
}

fn operation_complete(reply: &str) -> bool {
    reply.trim() == "1"
}

/// `SYST:ERR?` answers `0,"No error"` (or `+0,...`) when the queue is empty.
fn error_queue_empty(reply: &str) -> bool {
    let code = reply.trim().split(',').next().unwrap_or_default().trim();
    code.trim_start_matches('+').parse::<i32>() == Ok(0)
}

pub const FUNCTIONALITY_PROBES: [FunctionalityProbe; 3] = [
    FunctionalityProbe {
        name: "identification",
        command: IDENTIFY,
        accepts: identifies,
    },
    FunctionalityProbe {
        name: "operation_complete",
        command: OPERATION_COMPLETE,
        accepts: operation_complete,
    },
    FunctionalityProbe {
        name: "error_queue",
        command: ERROR_QUEUE,
        accepts: error_queue_empty,
    },
];

/// Runs one query under `limit`, returning the reply and its latency in ms.
pub async fn timed_query(
    equipment: &dyn Equipment,
    command: &str,
    limit: Duration,
) -> (Result<String, EquipmentError>, f64) {
    let started = Instant::now();
    let result = match timeout(limit, equipment.query(command)).await {
        Ok(result) => result,
        Err(_) => Err(EquipmentError::Timeout(limit.as_millis() as u64)),
    };
    (result, started.elapsed().as_secs_f64() * 1000.0)
}

/// Runs every functionality probe in order.
pub async fn run_functionality_probes(
    equipment: &dyn Equipment,
    limit: Duration,
) -> Vec<FunctionalityTestResult> {
    let mut results = Vec::with_capacity(FUNCTIONALITY_PROBES.len());
    for probe in &FUNCTIONALITY_PROBES {
        let (reply, duration_ms) = timed_query(equipment, probe.command, limit).await;
        let result = match reply {
            Ok(reply) => FunctionalityTestResult {
                name: probe.name.to_string(),
                command: probe.command.to_string(),
                passed: probe.accepts(&reply),
                response: Some(reply),
                error: None,
                duration_ms,
            },
            Err(err) => FunctionalityTestResult {
                name: probe.name.to_string(),
                command: probe.command.to_string(),
                passed: false,
                response: None,
                error: Some(err.to_string()),
                duration_ms,
            },
        };
        results.push(result);
    }
    results
}
