use std::sync::Arc;
use std::time::Duration;

use benchguard::{
    ControlPlane, DiagnosticCategory, DiagnosticStatus, DispatchError, EquipmentId, EquipmentType,
    FixedHost, GuardConfig, HealthStatus, MAX_RESPONSE_SAMPLES, MonitorState, SafetyEventKind,
    SimulatedInstrument, SlewParameter, ViolationType,
};

// Helper building a control-plane that never touches the real host
fn create_plane(config: GuardConfig) -> ControlPlane {
    ControlPlane::with_host(config, Arc::new(FixedHost::default()))
}

fn connected(equipment_type: EquipmentType) -> Arc<SimulatedInstrument> {
    Arc::new(SimulatedInstrument::new(equipment_type).connected(true))
}

#[tokio::test(start_paused = true)]
async fn test_healthy_equipment_scores_100() {
    let plane = create_plane(GuardConfig::default());
    let psu = Arc::new(
        SimulatedInstrument::new(EquipmentType::PowerSupply)
            .connected(true)
            .latency(Duration::from_millis(40)),
    );
    plane.register_equipment("psu-1", psu);
    let id = EquipmentId::new("psu-1");

    for _ in 0..100 {
        plane.diagnostics().record_command(&id, true, 40.0, 6, 24, None);
    }

    let health = plane.diagnostics().check_equipment_health(&id).await;
    assert_eq!(health.health_score, 100.0);
    assert_eq!(health.health_status, HealthStatus::Healthy);
    assert_eq!(health.connection_status, DiagnosticStatus::Pass);
    assert_eq!(health.communication_status, DiagnosticStatus::Pass);
    assert_eq!(health.performance_status, DiagnosticStatus::Pass);
    assert_eq!(health.functionality_status, DiagnosticStatus::Pass);
    assert_eq!(health.tests_passed, 3);
    assert!(health.active_issues.is_empty());
}

#[tokio::test]
async fn test_never_connected_equipment_is_offline() {
    let plane = create_plane(GuardConfig::default());
    plane.register_equipment(
        "load-1",
        Arc::new(SimulatedInstrument::new(EquipmentType::ElectronicLoad)),
    );

    let health = plane
        .diagnostics()
        .check_equipment_health(&EquipmentId::new("load-1"))
        .await;
    assert_eq!(health.health_score, 0.0);
    assert_eq!(health.health_status, HealthStatus::Offline);
    assert!(health
        .active_issues
        .iter()
        .any(|issue| issue.contains("disconnected")));
}

#[tokio::test]
async fn test_report_rolls_up_fleet() {
    let plane = create_plane(GuardConfig::default());
    plane.register_equipment("psu-1", connected(EquipmentType::PowerSupply));
    plane.register_equipment(
        "load-1",
        Arc::new(SimulatedInstrument::new(EquipmentType::ElectronicLoad)),
    );
    let psu = EquipmentId::new("psu-1");
    for _ in 0..10 {
        plane.dispatcher().query(&psu, "*IDN?").await.unwrap();
    }

    let report = plane.diagnostics().generate_diagnostic_report(None, None).await;
    assert!(report.report_id.starts_with("diag-"));
    assert_eq!(report.equipment.len(), 2);
    assert_eq!(report.equipment[0].equipment_id, EquipmentId::new("load-1"));
    assert_eq!(report.equipment[1].health_status, HealthStatus::Healthy);
    // healthy plus offline matches no degraded band
    assert_eq!(report.overall_health, HealthStatus::Unknown);
    assert_eq!(report.tests_passed, 4);
    assert_eq!(report.tests_failed, 1);
    assert_eq!(report.tests_warning, 0);
    assert!(report.issues.contains(&"Equipment disconnected".to_string()));

    assert_eq!(report.system.total_equipment, 2);
    assert_eq!(report.system.connected, 1);
    assert_eq!(report.system.health.healthy, 1);
    assert_eq!(report.system.health.offline, 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["overall_health"], "unknown");

    let connection_only = plane
        .diagnostics()
        .generate_diagnostic_report(
            Some(std::slice::from_ref(&psu)),
            Some(&[DiagnosticCategory::Connection][..]),
        )
        .await;
    assert_eq!(connection_only.equipment.len(), 1);
    assert_eq!(connection_only.tests_passed, 1);
    assert_eq!(connection_only.tests_failed, 0);
    assert_eq!(connection_only.overall_health, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_response_samples_are_capped() {
    let plane = create_plane(GuardConfig::default());
    plane.register_equipment("psu-1", connected(EquipmentType::PowerSupply));
    let id = EquipmentId::new("psu-1");

    for _ in 0..1500 {
        plane.dispatcher().query(&id, "*OPC?").await.unwrap();
    }

    let stats = plane.diagnostics().communication_stats(&id);
    assert_eq!(stats.total_commands, 1500);
    assert_eq!(stats.response_times.len(), MAX_RESPONSE_SAMPLES);
}

#[tokio::test]
async fn test_unsafe_setpoint_never_reaches_instrument() {
    let plane = create_plane(GuardConfig::default());
    let psu = connected(EquipmentType::PowerSupply);
    plane.register_equipment("psu-1", psu.clone());
    let id = EquipmentId::new("psu-1");

    let err = plane
        .dispatcher()
        .apply_setpoint(&id, SlewParameter::Voltage, 35.0, 0.0, None)
        .await
        .unwrap_err();
    let DispatchError::Safety(violation) = err else {
        panic!("expected a safety violation, got {err:?}");
    };
    assert_eq!(violation.violation_type, ViolationType::VoltageAboveMax);
    assert_eq!(violation.attempted_value, 35.0);
    assert_eq!(violation.limit_value, 30.0);

    assert!(psu.writes().is_empty());
    assert_eq!(plane.safety().safety_events(&id, 10).len(), 1);
}

#[tokio::test]
async fn test_setpoints_are_slew_limited() {
    let plane = create_plane(GuardConfig::default());
    let psu = connected(EquipmentType::PowerSupply);
    plane.register_equipment("psu-1", psu.clone());
    let id = EquipmentId::new("psu-1");

    let first = plane
        .dispatcher()
        .apply_setpoint(&id, SlewParameter::Voltage, 5.0, 0.0, None)
        .await
        .unwrap();
    assert_eq!(first, 5.0);

    let second = plane
        .dispatcher()
        .apply_setpoint(&id, SlewParameter::Voltage, 25.0, first, None)
        .await
        .unwrap();
    assert!(second > first && second < 25.0, "applied {second}");
    assert_eq!(psu.voltage(), second);

    let events = plane.safety().safety_events(&id, 10);
    assert!(matches!(
        events.last().map(|event| &event.kind),
        Some(SafetyEventKind::SlewLimited { parameter: SlewParameter::Voltage, .. })
    ));
}

#[tokio::test]
async fn test_emergency_stop_sweeps_fleet() {
    let plane = create_plane(GuardConfig::default());
    let psu = connected(EquipmentType::PowerSupply);
    plane.register_equipment("psu-1", psu.clone());
    plane.register_equipment("scope-1", connected(EquipmentType::Oscilloscope));
    plane.register_equipment(
        "load-1",
        Arc::new(SimulatedInstrument::new(EquipmentType::ElectronicLoad)),
    );
    let id = EquipmentId::new("psu-1");
    plane.dispatcher().set_output(&id, true).await.unwrap();
    assert!(psu.output_enabled());

    let report = plane.emergency_stop().await;
    assert!(report.activation.activated());
    assert_eq!(report.stopped, vec![id.clone()]);
    assert_eq!(
        report.skipped,
        vec![EquipmentId::new("load-1"), EquipmentId::new("scope-1")]
    );
    assert!(report.failed.is_empty());
    assert!(!psu.output_enabled());

    let status = plane.estop().status();
    assert!(status.active);
    assert_eq!(status.stopped_equipment, vec![id.clone()]);

    assert!(matches!(
        plane
            .dispatcher()
            .apply_setpoint(&id, SlewParameter::Voltage, 1.0, 0.0, None)
            .await,
        Err(DispatchError::EmergencyStopActive)
    ));

    // a second stop keeps the original activation
    assert!(plane.emergency_stop().await.activation.already_active());

    plane.estop().deactivate();
    assert!(!plane.estop().is_active());
    assert!(!psu.output_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_recovers_dropped_equipment() {
    let plane = create_plane(GuardConfig::default());
    let psu = connected(EquipmentType::PowerSupply);
    plane.register_equipment("psu-1", psu.clone());
    let id = EquipmentId::new("psu-1");

    assert!(plane.start_monitoring());
    assert_eq!(plane.monitor().state(), MonitorState::Running);

    tokio::time::sleep(Duration::from_secs(1)).await;
    psu.set_connected(false);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let stats = plane.diagnostics().connection_stats(&id);
    assert_eq!(stats.disconnection_count, 1);
    assert_eq!(stats.connection_count, 1);
    assert_eq!(psu.connect_calls(), 1);
    assert!(plane.monitor().last_healthy(&id).is_some());

    plane.shutdown().await;
    assert_eq!(plane.monitor().state(), MonitorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_returns_despite_hung_driver() {
    let plane = create_plane(GuardConfig::default());
    let psu = connected(EquipmentType::PowerSupply);
    plane.register_equipment("psu-1", psu.clone());
    plane.register_equipment(
        "psu-2",
        Arc::new(
            SimulatedInstrument::new(EquipmentType::PowerSupply)
                .connected(true)
                .stall_output_disable(),
        ),
    );
    let id = EquipmentId::new("psu-1");
    plane.dispatcher().set_output(&id, true).await.unwrap();

    let report = tokio::time::timeout(Duration::from_secs(60), plane.emergency_stop())
        .await
        .expect("emergency stop never returned");

    assert_eq!(report.stopped, vec![id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, EquipmentId::new("psu-2"));
    assert!(!psu.output_enabled());
    assert_eq!(plane.estop().status().stopped_equipment, vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_survives_hung_reconnect() {
    let plane = create_plane(GuardConfig::default());
    let stuck = Arc::new(SimulatedInstrument::new(EquipmentType::ElectronicLoad).stall_connects());
    plane.register_equipment("load-1", stuck.clone());
    let psu = connected(EquipmentType::PowerSupply);
    plane.register_equipment("psu-1", psu.clone());
    let id = EquipmentId::new("psu-1");

    assert!(plane.start_monitoring());
    tokio::time::sleep(Duration::from_secs(1)).await;
    psu.set_connected(false);
    tokio::time::sleep(Duration::from_secs(120)).await;

    // the stuck load delays sweeps but later ones still reach the psu
    let stats = plane.diagnostics().connection_stats(&id);
    assert_eq!(stats.disconnection_count, 1);
    assert_eq!(stats.connection_count, 1);
    assert_eq!(psu.connect_calls(), 1);
    assert!(plane.monitor().last_healthy(&id).is_some());
    assert!(stuck.connect_calls() >= 5);

    tokio::time::timeout(Duration::from_secs(120), plane.shutdown())
        .await
        .expect("shutdown never completed");
    assert_eq!(plane.monitor().state(), MonitorState::Stopped);
}

#[test]
fn test_config_document_drives_services() {
    let config = GuardConfig::from_json_str(
        r#"{ "health_check": { "enabled": false }, "retry": { "max_retries": 0 } }"#,
    )
    .unwrap();
    assert_eq!(config.retry.max_retries, 0);
    assert_eq!(config.reconnect.max_attempts, 5);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let plane = create_plane(config);
        assert!(!plane.start_monitoring());
        assert_eq!(plane.monitor().state(), MonitorState::Stopped);
    });
}
