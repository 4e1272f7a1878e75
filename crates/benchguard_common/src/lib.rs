//! Shared data model for the benchguard control-plane.
//!
//! Everything in this crate is plain data: identifiers, statistics,
//! diagnostics snapshots, safety limits and the emergency-stop status. The
//! services that produce and mutate these values live in the `benchguard`
//! crate.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod estop;
pub mod safety;
pub mod stats;

pub use config::*;
pub use diagnostics::*;
pub use error::{ConfigError, EquipmentError};
pub use estop::*;
pub use safety::*;
pub use stats::*;

use serde::{Deserialize, Serialize};

use std::fmt::Display;

#[derive(Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
#[serde(transparent)]
/// An [`EquipmentId`] names a single instrument on the bus
pub struct EquipmentId(pub String);

impl EquipmentId {
    /// Creates an id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EquipmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EquipmentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EquipmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of instrument. Selects the factory-default [`SafetyLimits`].
#[derive(Serialize, Deserialize, Hash, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    /// Measurement only, no controllable outputs.
    Oscilloscope,
    /// Programmable DC power supply.
    PowerSupply,
    /// Programmable electronic load.
    ElectronicLoad,
}

impl Display for EquipmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EquipmentType::Oscilloscope => "oscilloscope",
            EquipmentType::PowerSupply => "power_supply",
            EquipmentType::ElectronicLoad => "electronic_load",
        };
        f.write_str(name)
    }
}

/// Connection state reported by a driver's status call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EquipmentStatus {
    /// Whether the driver currently holds a live session with the instrument.
    pub connected: bool,
}
