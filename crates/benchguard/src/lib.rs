#![deny(trivial_casts, unstable_features, unused_import_braces, clippy::unwrap_used)]

/*!
Resilience, diagnostics and safety services for a fleet of bench instruments.

Instruments are plugged in through the [`Equipment`] trait and kept in an
[`EquipmentRegistry`]. On top of that registry sit:

- [`RetryExecutor`] and [`ReconnectionSupervisor`], bounded retry and
  reconnection with exponential backoff;
- [`HealthMonitor`], a background loop that polls every instrument and
  reconnects the ones that dropped;
- [`DiagnosticsEngine`], which accumulates command statistics, runs probes
  and benchmarks and folds everything into a 0-100 health score;
- [`SafetyValidator`] with its [`SlewRateLimiter`], hard limits, interlocks
  and rate-of-change clamping checked before any setpoint is sent;
- [`EmergencyStopCoordinator`], the fleet-wide stop latch.

[`CommandDispatcher`] ties the command path together and [`ControlPlane`]
wires every service to one registry.

## Example
```rust,no_run
use std::sync::Arc;
use benchguard::{ControlPlane, GuardConfig, EquipmentType, SimulatedInstrument};

# async fn run() {
let plane = ControlPlane::new(GuardConfig::from_env().unwrap_or_default());
plane.register_equipment(
    "psu-1",
    Arc::new(SimulatedInstrument::new(EquipmentType::PowerSupply).connected(true)),
);
plane.start_monitoring();

let report = plane.diagnostics().generate_diagnostic_report(None, None).await;
println!("fleet is {:?}", report.overall_health);

plane.shutdown().await;
# }
```
*/

pub mod control_plane;
pub mod diagnostics;
pub mod dispatch;
pub mod equipment;
pub mod estop;
pub mod host;
pub mod monitor;
pub mod reconnect;
pub mod retry;
pub mod safety;
pub mod sim;

pub use benchguard_common::*;

pub use control_plane::ControlPlane;
pub use diagnostics::DiagnosticsEngine;
pub use dispatch::{CommandDispatcher, DispatchError};
pub use equipment::{Equipment, EquipmentRegistry};
pub use estop::EmergencyStopCoordinator;
pub use host::{FixedHost, HostMetrics, SysinfoHost};
pub use monitor::{HealthMonitor, MonitorState};
pub use reconnect::ReconnectionSupervisor;
pub use retry::{Backoff, RetryExecutor};
pub use safety::{SafetyValidator, SlewKey, SlewOutcome, SlewRateLimiter};
pub use sim::SimulatedInstrument;
