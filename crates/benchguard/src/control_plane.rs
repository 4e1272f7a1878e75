//! Wires every service to one registry and one configuration.

use std::sync::Arc;

use tracing::info;

use benchguard_common::{EquipmentId, FleetStopReport, GuardConfig};

use crate::diagnostics::DiagnosticsEngine;
use crate::dispatch::CommandDispatcher;
use crate::equipment::{Equipment, EquipmentRegistry};
use crate::estop::EmergencyStopCoordinator;
use crate::host::{HostMetrics, SysinfoHost};
use crate::monitor::HealthMonitor;
use crate::reconnect::ReconnectionSupervisor;
use crate::retry::RetryExecutor;
use crate::safety::SafetyValidator;

/// One instance per process. Owns the registry and the services built on it.
pub struct ControlPlane {
    config: GuardConfig,
    registry: Arc<EquipmentRegistry>,
    diagnostics: Arc<DiagnosticsEngine>,
    safety: Arc<SafetyValidator>,
    estop: Arc<EmergencyStopCoordinator>,
    monitor: HealthMonitor,
    dispatcher: CommandDispatcher,
}

impl ControlPlane {
    /// Builds the control-plane, sampling the real host with `sysinfo`.
    pub fn new(config: GuardConfig) -> Self {
        Self::with_host(config, Arc::new(SysinfoHost::new()))
    }

    pub fn with_host(config: GuardConfig, host: Arc<dyn HostMetrics>) -> Self {
        let registry = Arc::new(EquipmentRegistry::new());
        let diagnostics = Arc::new(DiagnosticsEngine::new(
            registry.clone(),
            host,
            config.command_timeout(),
        ));
        let safety = Arc::new(SafetyValidator::new(config.safety.clone()));
        let estop = Arc::new(EmergencyStopCoordinator::with_call_timeout(config.command_timeout()));
        let reconnect = Arc::new(ReconnectionSupervisor::new(config.reconnect.clone()));

        let monitor = HealthMonitor::new(
            config.health_check.clone(),
            config.command_timeout(),
            reconnect,
            diagnostics.clone(),
        );
        let dispatcher = CommandDispatcher::new(
            registry.clone(),
            diagnostics.clone(),
            safety.clone(),
            estop.clone(),
            RetryExecutor::new(config.retry.clone()),
            config.command_timeout(),
        );

        Self {
            config,
            registry,
            diagnostics,
            safety,
            estop,
            monitor,
            dispatcher,
        }
    }

    /// Adds an instrument and applies the safety defaults for its type.
    pub fn register_equipment(&self, equipment_id: impl Into<EquipmentId>, equipment: Arc<dyn Equipment>) {
        let equipment_id = equipment_id.into();
        self.safety.register(&equipment_id, equipment.equipment_type());
        info!("Registered {} ({})", equipment_id, equipment.equipment_type());
        self.registry.insert(equipment_id, equipment);
    }

    /// Removes an instrument from the registry and drops its slew state.
    pub fn unregister_equipment(&self, equipment_id: &EquipmentId) -> Option<Arc<dyn Equipment>> {
        self.safety.clear_slew_state(equipment_id);
        self.registry.remove(equipment_id)
    }

    pub fn start_monitoring(&self) -> bool {
        self.monitor.start(self.registry.clone())
    }

    /// Engages the emergency stop and disables every connected output.
    pub async fn emergency_stop(&self) -> FleetStopReport {
        self.estop.stop_fleet(&self.registry).await
    }

    /// Stops background work. Instruments are left as they are.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        info!("Control-plane shut down");
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EquipmentRegistry> {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsEngine> {
        &self.diagnostics
    }

    pub fn safety(&self) -> &Arc<SafetyValidator> {
        &self.safety
    }

    pub fn estop(&self) -> &Arc<EmergencyStopCoordinator> {
        &self.estop
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }
}
