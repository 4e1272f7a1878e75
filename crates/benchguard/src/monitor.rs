//! Periodic connection check with automatic reconnection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use benchguard_common::{EquipmentError, EquipmentId, HealthCheckConfig};

use crate::diagnostics::DiagnosticsEngine;
use crate::equipment::{Equipment, EquipmentRegistry};
use crate::reconnect::ReconnectionSupervisor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared with the background task.
struct Sweeper {
    interval: Duration,
    status_timeout: Duration,
    reconnect: Arc<ReconnectionSupervisor>,
    diagnostics: Arc<DiagnosticsEngine>,
    /// Connection state seen by the previous sweep
    links: DashMap<EquipmentId, bool>,
    last_healthy: DashMap<EquipmentId, DateTime<Utc>>,
}

/// Background loop that polls every registered instrument and hands dropped
/// ones to the [`ReconnectionSupervisor`].
///
/// At most one loop runs per monitor. A stop request is honored at the sleep
/// between sweeps; a sweep already in progress, reconnection backoff
/// included, runs to completion and no new sweep is started. Every driver
/// call in a sweep is bounded by the status timeout, so a hung instrument
/// only delays the sweep.
pub struct HealthMonitor {
    config: HealthCheckConfig,
    sweeper: Arc<Sweeper>,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        status_timeout: Duration,
        reconnect: Arc<ReconnectionSupervisor>,
        diagnostics: Arc<DiagnosticsEngine>,
    ) -> Self {
        Self {
            sweeper: Arc::new(Sweeper {
                interval: config.interval(),
                status_timeout,
                reconnect,
                diagnostics,
                links: DashMap::new(),
                last_healthy: DashMap::new(),
            }),
            config,
            task: Mutex::new(None),
        }
    }

    /// Spawns the loop on the current tokio runtime.
    ///
    /// Returns `false` when monitoring is disabled or a loop is already
    /// running.
    pub fn start(&self, registry: Arc<EquipmentRegistry>) -> bool {
        if !self.config.enabled {
            info!("Health monitoring disabled");
            return false;
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            debug!("Health monitor already running");
            return false;
        }

        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(run(self.sweeper.clone(), registry, receiver));
        *task = Some(MonitorTask { shutdown, handle });
        info!("Health monitor started, interval {:?}", self.sweeper.interval);
        true
    }

    /// Signals the loop and waits for it to exit.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        let _ = task.shutdown.send(true);
        if let Err(err) = task.handle.await {
            warn!("Health monitor task ended abnormally: {}", err);
        }
        info!("Health monitor stopped");
    }

    pub fn state(&self) -> MonitorState {
        match self.task.lock().as_ref() {
            Some(task) if !task.handle.is_finished() => MonitorState::Running,
            _ => MonitorState::Stopped,
        }
    }

    /// Last sweep at which the instrument was seen connected.
    pub fn last_healthy(&self, equipment_id: &EquipmentId) -> Option<DateTime<Utc>> {
        self.sweeper.last_healthy.get(equipment_id).map(|at| *at)
    }

    /// Runs one sweep inline, outside the background loop.
    pub async fn check_now(&self, registry: &EquipmentRegistry) {
        self.sweeper.sweep(registry).await;
    }
}

async fn run(sweeper: Arc<Sweeper>, registry: Arc<EquipmentRegistry>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        sweeper.sweep(&registry).await;
        tokio::select! {
            _ = tokio::time::sleep(sweeper.interval) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
    }
    debug!("Health monitor loop exited");
}

/// Resolves once `true` is sent or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl Sweeper {
    async fn sweep(&self, registry: &EquipmentRegistry) {
        let fleet = registry.snapshot();
        debug!("Health sweep over {} instruments", fleet.len());
        join_all(
            fleet
                .iter()
                .map(|(id, equipment)| self.check(id, equipment.as_ref())),
        )
        .await;
    }

    async fn check(&self, equipment_id: &EquipmentId, equipment: &dyn Equipment) {
        let connected = match tokio::time::timeout(self.status_timeout, equipment.status()).await {
            Ok(Ok(status)) => status.connected,
            Ok(Err(err)) => {
                warn!("Status check on {} failed: {}", equipment_id, err);
                false
            }
            Err(_) => {
                warn!("Status check on {} timed out", equipment_id);
                false
            }
        };

        let previous = self.links.insert(equipment_id.clone(), connected);
        if connected {
            self.last_healthy.insert(equipment_id.clone(), Utc::now());
            return;
        }

        if previous != Some(false) {
            warn!("{} is disconnected", equipment_id);
            self.diagnostics
                .record_disconnection(equipment_id, Some("status check reported disconnected"));
        }

        let limit = self.status_timeout;
        if self
            .reconnect
            .attempt_reconnect(equipment_id, || async move {
                tokio::time::timeout(limit, equipment.connect())
                    .await
                    .unwrap_or(Err(EquipmentError::Timeout(limit.as_millis() as u64)))
            })
            .await
        {
            self.diagnostics.record_connection(equipment_id);
            self.links.insert(equipment_id.clone(), true);
            self.last_healthy.insert(equipment_id.clone(), Utc::now());
        }
    }
}
