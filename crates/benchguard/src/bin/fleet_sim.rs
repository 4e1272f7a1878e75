//! Runs the control-plane against a small simulated bench.
//!
//! Configuration is read from `BENCHGUARD_*` variables and log verbosity
//! from `RUST_LOG`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use benchguard::{
    ControlPlane, EquipmentId, EquipmentType, GuardConfig, SimulatedInstrument, SlewParameter,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GuardConfig::from_env().context("loading BENCHGUARD_* configuration")?;
    let plane = ControlPlane::new(config);

    let psu = Arc::new(
        SimulatedInstrument::new(EquipmentType::PowerSupply)
            .connected(true)
            .latency(Duration::from_millis(15)),
    );
    plane.register_equipment("psu-1", psu.clone());
    plane.register_equipment(
        "scope-1",
        Arc::new(
            SimulatedInstrument::new(EquipmentType::Oscilloscope)
                .connected(true)
                .latency(Duration::from_millis(40)),
        ),
    );
    // starts offline and refuses the first connect
    plane.register_equipment(
        "load-1",
        Arc::new(SimulatedInstrument::new(EquipmentType::ElectronicLoad).fail_connects(1)),
    );

    plane.start_monitoring();

    let psu_id = EquipmentId::new("psu-1");
    let dispatcher = plane.dispatcher();
    for _ in 0..20 {
        dispatcher.query(&psu_id, "*IDN?").await?;
    }

    let mut voltage = 0.0;
    for target in [5.0, 12.0, 24.0] {
        tokio::time::sleep(Duration::from_millis(500)).await;
        voltage = dispatcher
            .apply_setpoint(&psu_id, SlewParameter::Voltage, target, voltage, Some(1.0))
            .await?;
        info!("psu-1 voltage now {:.2} V (requested {:.2} V)", voltage, target);
    }
    if let Err(err) = dispatcher
        .apply_setpoint(&psu_id, SlewParameter::Voltage, 48.0, voltage, None)
        .await
    {
        warn!("Setpoint refused as expected: {}", err);
    }

    let report = plane.diagnostics().generate_diagnostic_report(None, None).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let stop = plane.emergency_stop().await;
    info!(
        "Emergency stop: {} stopped, {} skipped, {} failed",
        stop.stopped.len(),
        stop.skipped.len(),
        stop.failed.len()
    );
    println!("{}", serde_json::to_string_pretty(&plane.estop().status())?);
    info!("psu-1 output enabled after stop: {}", psu.output_enabled());

    plane.estop().deactivate();
    plane.shutdown().await;
    Ok(())
}
