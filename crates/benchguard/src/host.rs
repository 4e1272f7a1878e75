//! Host resource sampling for benchmarks and fleet diagnostics.

use parking_lot::Mutex;
use sysinfo::System;

use benchguard_common::HostSnapshot;

/// Source of host CPU and memory figures.
pub trait HostMetrics: Send + Sync {
    fn sample(&self) -> HostSnapshot;
}

/// Samples the running machine through `sysinfo`.
///
/// CPU usage is measured between successive refreshes, so the first sample
/// after construction may read 0%.
pub struct SysinfoHost {
    system: Mutex<System>,
}

impl SysinfoHost {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics for SysinfoHost {
    fn sample(&self) -> HostSnapshot {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        HostSnapshot {
            cpu_percent: system.global_cpu_usage(),
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
            uptime_secs: System::uptime(),
        }
    }
}

/// Always reports the same snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedHost(pub HostSnapshot);

impl HostMetrics for FixedHost {
    fn sample(&self) -> HostSnapshot {
        self.0
    }
}
