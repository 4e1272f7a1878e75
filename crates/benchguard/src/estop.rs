//! Fleet-wide emergency stop.
//!
//! The coordinator is a two-state machine (`Inactive -> Active -> Inactive`)
//! that remembers which instruments had their outputs forced off. Both
//! transitions are idempotent and never fail. Clearing the stop does not
//! re-enable any output; that is a separate operator action.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use benchguard_common::{
    ActivateOutcome, DeactivateOutcome, EmergencyStopStatus, EquipmentError, EquipmentId,
    FleetStopReport,
};

use crate::equipment::{Equipment, EquipmentRegistry};

/// Bound on each driver call made by the fleet sweep when none is configured.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct StopState {
    active: bool,
    stop_time: Option<DateTime<Utc>>,
    activated_at: Option<Instant>,
    stopped: BTreeSet<EquipmentId>,
}

/// Process-scoped emergency-stop state.
#[derive(Debug)]
pub struct EmergencyStopCoordinator {
    state: RwLock<StopState>,
    call_timeout: Duration,
}

impl Default for EmergencyStopCoordinator {
    fn default() -> Self {
        Self::with_call_timeout(DEFAULT_CALL_TIMEOUT)
    }
}

impl EmergencyStopCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `call_timeout` bounds every `status` and `disable_output` call made
    /// by [`EmergencyStopCoordinator::stop_fleet`].
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(StopState::default()),
            call_timeout,
        }
    }

    /// Engages the stop. A second call while active keeps the original stop
    /// time and reports `AlreadyActive`.
    pub fn activate(&self) -> ActivateOutcome {
        let mut state = self.state.write();
        if state.active {
            return ActivateOutcome::AlreadyActive {
                stop_time: state.stop_time,
            };
        }

        let stop_time = Utc::now();
        state.active = true;
        state.stop_time = Some(stop_time);
        state.activated_at = Some(Instant::now());
        state.stopped.clear();
        warn!("EMERGENCY STOP ACTIVATED at {}", stop_time);

        ActivateOutcome::Activated { stop_time }
    }

    /// Clears the stop and the stopped-equipment set.
    pub fn deactivate(&self) -> DeactivateOutcome {
        let mut state = self.state.write();
        if !state.active {
            return DeactivateOutcome::AlreadyInactive;
        }

        let duration_secs = state
            .activated_at
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or_default();
        let equipment_count = state.stopped.len();

        state.active = false;
        state.stop_time = None;
        state.activated_at = None;
        state.stopped.clear();
        warn!(
            "Emergency stop cleared after {:.1}s ({} instruments were stopped); outputs stay disabled",
            duration_secs, equipment_count
        );

        DeactivateOutcome::Deactivated {
            duration_secs,
            equipment_count,
        }
    }

    /// Records an instrument whose outputs were disabled for the current stop.
    ///
    /// Returns `false` for duplicates and when no stop is active.
    pub fn register_stopped_equipment(&self, equipment_id: &EquipmentId) -> bool {
        let mut state = self.state.write();
        if !state.active {
            debug!("Ignoring stopped equipment {}: no emergency stop active", equipment_id);
            return false;
        }
        state.stopped.insert(equipment_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    pub fn status(&self) -> EmergencyStopStatus {
        let state = self.state.read();
        EmergencyStopStatus {
            active: state.active,
            stop_time: state.stop_time,
            stopped_equipment: state.stopped.iter().cloned().collect(),
            duration_secs: state.activated_at.map(|at| at.elapsed().as_secs_f64()),
        }
    }

    /// Engages the stop and disables the outputs of every connected
    /// instrument in `registry`.
    ///
    /// Offline instruments and instruments without outputs are skipped. The
    /// sweep runs even if the stop was already active so late registrations
    /// are still caught.
    pub async fn stop_fleet(&self, registry: &EquipmentRegistry) -> FleetStopReport {
        let activation = self.activate();

        let sweeps = registry.snapshot().into_iter().map(|(id, equipment)| async move {
            let result = self.disable(equipment.as_ref()).await;
            // registered as soon as it lands so a stalled peer cannot hide it
            if result.is_ok() {
                self.register_stopped_equipment(&id);
            }
            (id, result)
        });

        let mut report = FleetStopReport {
            activation,
            stopped: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        };

        for (id, result) in join_all(sweeps).await {
            match result {
                Ok(()) => report.stopped.push(id),
                Err(EquipmentError::NotConnected | EquipmentError::Unsupported(_)) => {
                    report.skipped.push(id);
                }
                Err(err) => {
                    error!("Failed to disable outputs on {} during emergency stop: {}", id, err);
                    report.failed.push((id, err.to_string()));
                }
            }
        }

        report
    }

    /// Status check then output disable, each bounded by the call timeout.
    async fn disable(&self, equipment: &dyn Equipment) -> Result<(), EquipmentError> {
        let timed_out = || EquipmentError::Timeout(self.call_timeout.as_millis() as u64);
        let status = tokio::time::timeout(self.call_timeout, equipment.status())
            .await
            .map_err(|_| timed_out())?;
        if !matches!(status, Ok(status) if status.connected) {
            return Err(EquipmentError::NotConnected);
        }
        tokio::time::timeout(self.call_timeout, equipment.disable_output())
            .await
            .map_err(|_| timed_out())?
    }
}
