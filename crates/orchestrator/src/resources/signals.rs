//! System signal sampling
//!
//! The capability adapter never talks to the OS directly; it reads a
//! [`SignalSource`]. Production uses [`SysinfoSignalSource`], tests and
//! embedders can pin values with [`FixedSignalSource`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Components, CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::debug;

/// Coarse thermal classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

impl ThermalState {
    /// Classify the hottest sensor reading, in degrees Celsius.
    pub fn from_celsius(temperature: f32, critical: Option<f32>) -> Self {
        if let Some(critical) = critical.filter(|c| c.is_finite() && *c > 0.0) {
            if temperature >= critical * 0.95 {
                return ThermalState::Critical;
            }
        }

        match temperature {
            t if t >= 90.0 => ThermalState::Critical,
            t if t >= 80.0 => ThermalState::Serious,
            t if t >= 70.0 => ThermalState::Fair,
            _ => ThermalState::Nominal,
        }
    }
}

/// Memory figures in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total: u64,
    pub available: u64,
}

/// One sample of everything the adapter looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSignals {
    pub memory: MemorySnapshot,
    pub cpu_count: usize,
    /// `None` when the platform exposes no sensors
    pub thermal: Option<ThermalState>,
}

pub trait SignalSource: Send + Sync {
    /// Full sample, taken once per orchestrator construction.
    fn sample(&self) -> SystemSignals;

    /// Memory only; called before every request so it must stay cheap.
    fn memory(&self) -> MemorySnapshot {
        self.sample().memory
    }
}

/// Reads the host through `sysinfo`
#[derive(Debug)]
pub struct SysinfoSignalSource {
    sys: Mutex<System>,
}

impl SysinfoSignalSource {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            sys: Mutex::new(sys),
        }
    }

    fn read_thermal() -> Option<ThermalState> {
        let components = Components::new_with_refreshed_list();
        components
            .iter()
            .filter(|c| c.temperature().is_finite())
            .map(|c| ThermalState::from_celsius(c.temperature(), c.critical()))
            .max()
    }
}

impl Default for SysinfoSignalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for SysinfoSignalSource {
    fn sample(&self) -> SystemSignals {
        let (memory, cpu_count) = {
            let mut sys = self.sys.lock();
            sys.refresh_memory();
            sys.refresh_cpu_all();
            (
                MemorySnapshot {
                    total: sys.total_memory(),
                    available: sys.available_memory(),
                },
                sys.cpus().len().max(1),
            )
        };

        let thermal = Self::read_thermal();
        debug!(
            total_memory = memory.total,
            available_memory = memory.available,
            cpu_count,
            thermal = ?thermal,
            "Sampled system signals"
        );

        SystemSignals {
            memory,
            cpu_count,
            thermal,
        }
    }

    fn memory(&self) -> MemorySnapshot {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        MemorySnapshot {
            total: sys.total_memory(),
            available: sys.available_memory(),
        }
    }
}

/// Pinned signals; available memory can be changed at runtime to simulate
/// pressure.
#[derive(Debug)]
pub struct FixedSignalSource {
    signals: Mutex<SystemSignals>,
}

impl FixedSignalSource {
    pub fn new(signals: SystemSignals) -> Self {
        Self {
            signals: Mutex::new(signals),
        }
    }

    /// Convenience constructor from gibibytes and a core count.
    pub fn with_memory_gib(total_gib: u64, available_gib: u64, cpu_count: usize) -> Self {
        const GIB: u64 = 1024 * 1024 * 1024;
        Self::new(SystemSignals {
            memory: MemorySnapshot {
                total: total_gib * GIB,
                available: available_gib * GIB,
            },
            cpu_count,
            thermal: None,
        })
    }

    pub fn set_available_memory(&self, bytes: u64) {
        self.signals.lock().memory.available = bytes;
    }

    pub fn set_thermal(&self, thermal: Option<ThermalState>) {
        self.signals.lock().thermal = thermal;
    }
}

impl SignalSource for FixedSignalSource {
    fn sample(&self) -> SystemSignals {
        *self.signals.lock()
    }
}
