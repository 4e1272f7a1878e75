//! Emergency-stop request outcomes and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::EquipmentId;

/// Response to an activation request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActivateOutcome {
    /// The stop was engaged by this request.
    Activated {
        stop_time: DateTime<Utc>,
    },
    /// The stop was already engaged; the original stop time is kept.
    AlreadyActive {
        stop_time: Option<DateTime<Utc>>,
    },
}

impl ActivateOutcome {
    pub fn activated(&self) -> bool {
        matches!(self, ActivateOutcome::Activated { .. })
    }

    pub fn already_active(&self) -> bool {
        matches!(self, ActivateOutcome::AlreadyActive { .. })
    }
}

/// Response to a deactivation request.
///
/// Deactivating never re-enables outputs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DeactivateOutcome {
    /// The stop was cleared by this request.
    Deactivated {
        duration_secs: f64,
        equipment_count: usize,
    },
    /// There was no active stop to clear.
    AlreadyInactive,
}

impl DeactivateOutcome {
    pub fn already_inactive(&self) -> bool {
        matches!(self, DeactivateOutcome::AlreadyInactive)
    }
}

/// Read-only view of the emergency stop.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EmergencyStopStatus {
    pub active: bool,
    pub stop_time: Option<DateTime<Utc>>,
    /// Sorted ids of equipment whose outputs were disabled by the stop
    pub stopped_equipment: Vec<EquipmentId>,
    /// Seconds since activation while active
    pub duration_secs: Option<f64>,
}

/// Outcome of sweeping the fleet after activation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FleetStopReport {
    pub activation: ActivateOutcome,
    pub stopped: Vec<EquipmentId>,
    /// Equipment whose outputs could not be disabled, with the reason
    pub failed: Vec<(EquipmentId, String)>,
    /// Equipment skipped because it was offline or has no outputs
    pub skipped: Vec<EquipmentId>,
}
