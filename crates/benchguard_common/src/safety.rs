//! Safety limits, violations and audit events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EquipmentId, EquipmentType};

/// Hard bounds for one equipment. `None` means unbounded.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SafetyLimits {
    pub min_voltage: Option<f64>,
    pub max_voltage: Option<f64>,
    pub min_current: Option<f64>,
    pub max_current: Option<f64>,
    pub max_power: Option<f64>,
    /// Volts per second
    pub voltage_slew_rate: Option<f64>,
    /// Amps per second
    pub current_slew_rate: Option<f64>,
    pub require_interlock: bool,
}

impl SafetyLimits {
    /// Limits with every bound open.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Factory defaults for an equipment type.
    pub fn factory_default(equipment_type: EquipmentType) -> Self {
        match equipment_type {
            EquipmentType::Oscilloscope => Self::unbounded(),
            EquipmentType::PowerSupply => Self {
                min_voltage: Some(0.0),
                max_voltage: Some(30.0),
                min_current: Some(0.0),
                max_current: Some(5.0),
                max_power: Some(150.0),
                voltage_slew_rate: Some(10.0),
                current_slew_rate: Some(1.0),
                require_interlock: false,
            },
            EquipmentType::ElectronicLoad => Self {
                min_voltage: Some(0.0),
                max_voltage: Some(120.0),
                min_current: Some(0.0),
                max_current: Some(30.0),
                max_power: Some(300.0),
                voltage_slew_rate: None,
                current_slew_rate: Some(5.0),
                require_interlock: false,
            },
        }
    }
}

/// Which bound a request broke.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    VoltageAboveMax,
    VoltageBelowMin,
    CurrentAboveMax,
    CurrentBelowMin,
    PowerAboveMax,
    InterlockNotSet,
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ViolationType::VoltageAboveMax => "voltage above maximum",
            ViolationType::VoltageBelowMin => "voltage below minimum",
            ViolationType::CurrentAboveMax => "current above maximum",
            ViolationType::CurrentBelowMin => "current below minimum",
            ViolationType::PowerAboveMax => "power above maximum",
            ViolationType::InterlockNotSet => "interlock not set",
        };
        f.write_str(text)
    }
}

/// A request that must not reach the instrument.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Error)]
#[error("safety violation on {equipment_id}: {violation_type} (attempted {attempted_value}, limit {limit_value})")]
pub struct SafetyViolation {
    pub violation_type: ViolationType,
    pub attempted_value: f64,
    pub limit_value: f64,
    pub equipment_id: EquipmentId,
}

/// Controlled parameter subject to slew limiting.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlewParameter {
    Voltage,
    Current,
}

impl SlewParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlewParameter::Voltage => "voltage",
            SlewParameter::Current => "current",
        }
    }
}

/// What a safety event recorded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyEventKind {
    /// A request was blocked.
    Violation {
        violation_type: ViolationType,
        limit_value: f64,
    },
    /// A request was reduced to the slew-rate bound.
    SlewLimited {
        parameter: SlewParameter,
        applied_value: f64,
        max_change: f64,
    },
}

/// Audit entry kept per equipment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SafetyEvent {
    pub timestamp: DateTime<Utc>,
    pub equipment_id: EquipmentId,
    pub requested_value: f64,
    #[serde(flatten)]
    pub kind: SafetyEventKind,
}

impl SafetyEvent {
    pub fn violation(violation: &SafetyViolation) -> Self {
        Self {
            timestamp: Utc::now(),
            equipment_id: violation.equipment_id.clone(),
            requested_value: violation.attempted_value,
            kind: SafetyEventKind::Violation {
                violation_type: violation.violation_type,
                limit_value: violation.limit_value,
            },
        }
    }
}
