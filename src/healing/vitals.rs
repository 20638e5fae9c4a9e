use std::sync::Mutex;

/// Host resource sample feeding the healing triggers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vitals {
    pub cpu_pct: f32,
    pub mem_pct: f32,
}

pub trait VitalsProbe: Send + Sync {
    fn sample(&self) -> Vitals;
}

/// Production probe over the host via sysinfo.
pub struct SysinfoProbe {
    system: Mutex<sysinfo::System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl VitalsProbe for SysinfoProbe {
    fn sample(&self) -> Vitals {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        system.refresh_cpu_usage();
        system.refresh_memory();
        let total = system.total_memory().max(1);
        Vitals {
            cpu_pct: system.global_cpu_usage(),
            mem_pct: (system.used_memory() as f32 / total as f32) * 100.0,
        }
    }
}

/// Deterministic probe for tests and headless environments.
pub struct FixedProbe {
    vitals: Mutex<Vitals>,
}

impl FixedProbe {
    pub fn new(cpu_pct: f32, mem_pct: f32) -> Self {
        Self {
            vitals: Mutex::new(Vitals { cpu_pct, mem_pct }),
        }
    }

    pub fn set(&self, cpu_pct: f32, mem_pct: f32) {
        *self
            .vitals
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Vitals { cpu_pct, mem_pct };
    }
}

impl VitalsProbe for FixedProbe {
    fn sample(&self) -> Vitals {
        *self
            .vitals
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
