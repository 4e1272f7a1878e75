//! The guarded command path.
//!
//! Every command sent through [`CommandDispatcher`] is retried per the
//! [`RetryExecutor`] policy, bounded by the command timeout and folded into
//! the communication statistics. Setpoint and output commands additionally
//! pass the emergency-stop gate and the safety checks before anything reaches
//! the instrument.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use benchguard_common::{EquipmentError, EquipmentId, SafetyViolation, SlewParameter};

use crate::diagnostics::DiagnosticsEngine;
use crate::equipment::{Equipment, EquipmentRegistry};
use crate::estop::EmergencyStopCoordinator;
use crate::retry::RetryExecutor;
use crate::safety::SafetyValidator;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no equipment registered as {0}")]
    NotFound(EquipmentId),

    #[error("emergency stop is active")]
    EmergencyStopActive,

    #[error(transparent)]
    Safety(#[from] SafetyViolation),

    #[error(transparent)]
    Equipment(#[from] EquipmentError),
}

pub struct CommandDispatcher {
    registry: Arc<EquipmentRegistry>,
    diagnostics: Arc<DiagnosticsEngine>,
    safety: Arc<SafetyValidator>,
    estop: Arc<EmergencyStopCoordinator>,
    retry: RetryExecutor,
    command_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<EquipmentRegistry>,
        diagnostics: Arc<DiagnosticsEngine>,
        safety: Arc<SafetyValidator>,
        estop: Arc<EmergencyStopCoordinator>,
        retry: RetryExecutor,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            diagnostics,
            safety,
            estop,
            retry,
            command_timeout,
        }
    }

    /// Sends a query and returns the instrument's reply.
    pub async fn query(&self, equipment_id: &EquipmentId, command: &str) -> Result<String, DispatchError> {
        let equipment = self.equipment(equipment_id)?;
        let reply = self
            .retry
            .execute_observed(
                &format!("{command} on {equipment_id}"),
                || self.exchange(equipment_id, equipment.as_ref(), command, true),
                |_, _| self.diagnostics.record_retry(equipment_id),
            )
            .await?;
        Ok(reply)
    }

    /// Sends a command without a reply. No safety checks are applied; use
    /// [`CommandDispatcher::apply_setpoint`] for output levels.
    pub async fn write(&self, equipment_id: &EquipmentId, command: &str) -> Result<(), DispatchError> {
        let equipment = self.equipment(equipment_id)?;
        self.retry
            .execute_observed(
                &format!("{command} on {equipment_id}"),
                || self.exchange(equipment_id, equipment.as_ref(), command, false),
                |_, _| self.diagnostics.record_retry(equipment_id),
            )
            .await?;
        Ok(())
    }

    /// Validates and sends a voltage or current setpoint.
    ///
    /// Checks run in this order: emergency stop, interlock, hard bounds of
    /// `target`, then power (`target * companion`) when the companion level
    /// is known. The level actually sent is `target` clamped by the slew
    /// limiter relative to `current`, and is returned on success. Nothing is
    /// written when a check fails, and a failed write leaves the slew
    /// reference where it was.
    pub async fn apply_setpoint(
        &self,
        equipment_id: &EquipmentId,
        parameter: SlewParameter,
        target: f64,
        current: f64,
        companion: Option<f64>,
    ) -> Result<f64, DispatchError> {
        if self.estop.is_active() {
            warn!("Refusing {} setpoint on {}: emergency stop active", parameter.as_str(), equipment_id);
            return Err(DispatchError::EmergencyStopActive);
        }
        if !self.registry.contains(equipment_id) {
            return Err(DispatchError::NotFound(equipment_id.clone()));
        }

        self.safety.check_interlock(equipment_id)?;
        match parameter {
            SlewParameter::Voltage => self.safety.check_voltage(equipment_id, target)?,
            SlewParameter::Current => self.safety.check_current(equipment_id, target)?,
        }
        if let Some(companion) = companion {
            self.safety.check_power(equipment_id, target * companion)?;
        }

        let applied = self.safety.limit_slew(equipment_id, parameter, target, current);
        if applied != target {
            debug!(
                "{} setpoint on {} slew limited: requested {}, applying {}",
                parameter.as_str(),
                equipment_id,
                target,
                applied
            );
        }

        let header = match parameter {
            SlewParameter::Voltage => "VOLT",
            SlewParameter::Current => "CURR",
        };
        if let Err(err) = self.write(equipment_id, &format!("{header} {applied}")).await {
            self.safety.revert_slew(equipment_id, parameter);
            return Err(err);
        }
        Ok(applied)
    }

    /// Switches the outputs of an instrument.
    ///
    /// Turning outputs on is refused during an emergency stop and requires
    /// the interlock when the limits ask for one. Turning them off is always
    /// allowed.
    pub async fn set_output(&self, equipment_id: &EquipmentId, enabled: bool) -> Result<(), DispatchError> {
        if enabled {
            if self.estop.is_active() {
                warn!("Refusing to enable outputs on {}: emergency stop active", equipment_id);
                return Err(DispatchError::EmergencyStopActive);
            }
            self.safety.check_interlock(equipment_id)?;
        }
        self.write(equipment_id, if enabled { "OUTP ON" } else { "OUTP OFF" })
            .await
    }

    fn equipment(&self, equipment_id: &EquipmentId) -> Result<Arc<dyn Equipment>, DispatchError> {
        self.registry
            .get(equipment_id)
            .ok_or_else(|| DispatchError::NotFound(equipment_id.clone()))
    }

    /// One timed attempt, recorded in the communication statistics.
    async fn exchange(
        &self,
        equipment_id: &EquipmentId,
        equipment: &dyn Equipment,
        command: &str,
        expects_reply: bool,
    ) -> Result<String, EquipmentError> {
        let started = Instant::now();
        let send = async {
            if expects_reply {
                equipment.query(command).await
            } else {
                equipment.write(command).await.map(|()| String::new())
            }
        };
        let result = match timeout(self.command_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(EquipmentError::Timeout(self.command_timeout.as_millis() as u64)),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        // commands go out newline terminated
        let bytes_sent = command.len() as u64 + 1;

        match &result {
            Ok(reply) => self.diagnostics.record_command(
                equipment_id,
                true,
                latency_ms,
                bytes_sent,
                reply.len() as u64,
                None,
            ),
            Err(err) => {
                if err.is_timeout() {
                    self.diagnostics.record_timeout(equipment_id);
                }
                self.diagnostics.record_command(
                    equipment_id,
                    false,
                    latency_ms,
                    bytes_sent,
                    0,
                    Some(&err.to_string()),
                );
            }
        }
        result
    }
}
