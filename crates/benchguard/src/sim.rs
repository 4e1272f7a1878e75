//! In-memory instrument used by the fleet simulator and the tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use benchguard_common::{EquipmentError, EquipmentStatus, EquipmentType};

use crate::equipment::Equipment;

const NO_ERROR: &str = "0,\"No error\"";

#[derive(Debug)]
struct SimState {
    connected: bool,
    latency: Duration,
    failing_connects: u32,
    failing_queries: u32,
    failing_status: u32,
    stalled_connects: bool,
    stalled_disables: bool,
    error_queue: String,
    voltage: f64,
    current: f64,
    output_enabled: bool,
    connect_calls: u32,
    writes: Vec<String>,
}

/// A scriptable SCPI-ish instrument.
///
/// Answers `*IDN?`, `*OPC?`, `*STB?`, `SYST:ERR?`, `VOLT?` and `CURR?`, and
/// accepts `VOLT <v>`, `CURR <a>` and `OUTP ON|OFF` writes. Faults are
/// injected by count: the next `n` connects, status checks or queries fail.
/// Connects and output disables can also be made to hang forever.
#[derive(Debug)]
pub struct SimulatedInstrument {
    equipment_type: EquipmentType,
    state: Mutex<SimState>,
}

impl SimulatedInstrument {
    /// A disconnected instrument with no latency and an empty error queue.
    pub fn new(equipment_type: EquipmentType) -> Self {
        Self {
            equipment_type,
            state: Mutex::new(SimState {
                connected: false,
                latency: Duration::ZERO,
                failing_connects: 0,
                failing_queries: 0,
                failing_status: 0,
                stalled_connects: false,
                stalled_disables: false,
                error_queue: NO_ERROR.to_string(),
                voltage: 0.0,
                current: 0.0,
                output_enabled: false,
                connect_calls: 0,
                writes: Vec::new(),
            }),
        }
    }

    pub fn connected(self, connected: bool) -> Self {
        self.state.lock().connected = connected;
        self
    }

    /// Delay added to every query and write.
    pub fn latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn fail_connects(self, count: u32) -> Self {
        self.state.lock().failing_connects = count;
        self
    }

    pub fn fail_queries(self, count: u32) -> Self {
        self.state.lock().failing_queries = count;
        self
    }

    pub fn fail_status(self, count: u32) -> Self {
        self.state.lock().failing_status = count;
        self
    }

    /// Every `connect` call is counted and then never resolves.
    pub fn stall_connects(self) -> Self {
        self.state.lock().stalled_connects = true;
        self
    }

    /// Every `disable_output` call never resolves.
    pub fn stall_output_disable(self) -> Self {
        self.state.lock().stalled_disables = true;
        self
    }

    /// Reply to `SYST:ERR?`.
    pub fn with_error_queue(self, reply: &str) -> Self {
        self.state.lock().error_queue = reply.to_string();
        self
    }

    /// Drops or restores the session, as a cable pull would.
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }

    /// Every write accepted so far, in order.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    pub fn output_enabled(&self) -> bool {
        self.state.lock().output_enabled
    }

    pub fn voltage(&self) -> f64 {
        self.state.lock().voltage
    }

    pub fn current(&self) -> f64 {
        self.state.lock().current
    }

    /// Checks the session and consumes one injected query fault, returning
    /// the latency to simulate.
    fn begin_exchange(&self) -> Result<Duration, EquipmentError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(EquipmentError::NotConnected);
        }
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(EquipmentError::Io("simulated bus fault".to_string()));
        }
        Ok(state.latency)
    }

    fn identity(&self) -> String {
        let model = match self.equipment_type {
            EquipmentType::Oscilloscope => "SIM-SCOPE",
            EquipmentType::PowerSupply => "SIM-PSU",
            EquipmentType::ElectronicLoad => "SIM-LOAD",
        };
        format!("BENCHGUARD,{model},0001,1.0")
    }

    fn has_outputs(&self) -> bool {
        self.equipment_type != EquipmentType::Oscilloscope
    }
}

fn parse_level(command: &str, argument: &str) -> Result<f64, EquipmentError> {
    argument
        .trim()
        .parse::<f64>()
        .map_err(|_| EquipmentError::Protocol(format!("bad argument in {command:?}")))
}

#[async_trait]
impl Equipment for SimulatedInstrument {
    fn equipment_type(&self) -> EquipmentType {
        self.equipment_type
    }

    async fn connect(&self) -> Result<(), EquipmentError> {
        let stalled = {
            let mut state = self.state.lock();
            state.connect_calls += 1;
            state.stalled_connects
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(EquipmentError::Io("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn status(&self) -> Result<EquipmentStatus, EquipmentError> {
        let mut state = self.state.lock();
        if state.failing_status > 0 {
            state.failing_status -= 1;
            return Err(EquipmentError::Io("status read failed".to_string()));
        }
        Ok(EquipmentStatus {
            connected: state.connected,
        })
    }

    async fn query(&self, command: &str) -> Result<String, EquipmentError> {
        let latency = self.begin_exchange()?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.state.lock();
        let reply = match command.trim() {
            "*IDN?" => self.identity(),
            "*OPC?" => "1".to_string(),
            "*STB?" => "0".to_string(),
            "SYST:ERR?" => state.error_queue.clone(),
            "VOLT?" if self.has_outputs() => format!("{:.3}", state.voltage),
            "CURR?" if self.has_outputs() => format!("{:.3}", state.current),
            other => return Err(EquipmentError::Protocol(format!("unknown query {other:?}"))),
        };
        Ok(reply)
    }

    async fn write(&self, command: &str) -> Result<(), EquipmentError> {
        let latency = self.begin_exchange()?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let command = command.trim();
        let (header, argument) = command.split_once(' ').unwrap_or((command, ""));
        let mut state = self.state.lock();
        match (header, self.has_outputs()) {
            ("VOLT", true) => state.voltage = parse_level(command, argument)?,
            ("CURR", true) => state.current = parse_level(command, argument)?,
            ("OUTP", true) => {
                state.output_enabled = match argument.trim() {
                    "ON" | "1" => true,
                    "OFF" | "0" => false,
                    _ => return Err(EquipmentError::Protocol(format!("bad argument in {command:?}"))),
                }
            }
            _ => return Err(EquipmentError::Protocol(format!("unknown command {command:?}"))),
        }
        state.writes.push(command.to_string());
        Ok(())
    }

    async fn disable_output(&self) -> Result<(), EquipmentError> {
        if !self.has_outputs() {
            return Err(EquipmentError::Unsupported("disable_output"));
        }
        let stalled = self.state.lock().stalled_disables;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock();
        if !state.connected {
            return Err(EquipmentError::NotConnected);
        }
        state.output_enabled = false;
        state.writes.push("OUTP OFF".to_string());
        Ok(())
    }
}
