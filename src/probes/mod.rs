pub mod host;
pub mod remote;

use async_trait::async_trait;

use crate::db::models::Device;

pub use host::HostProbe;
pub use remote::RemoteProbe;

/// Host-machine identity and environment summary, gathered once per sample.
#[derive(Debug, Clone, Default)]
pub struct SystemSummary {
    pub hostname: String,
    pub description: String,
    pub location: String,
    pub contact: String,
    pub uptime_s: u64,
    pub platform: String,
    pub arch: String,
    pub cpu_cores: u32,
    pub total_memory_bytes: u64,
    pub processes: u64,
    pub users: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct CpuReading {
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryReading {
    pub usage_percent: f64,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DiskReading {
    pub usage_percent: f64,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct InterfaceReading {
    pub index: i64,
    pub name: String,
    pub description: String,
    pub interface_type: String,
    pub speed: i64,
    pub admin_status: String,
    pub oper_status: String,
    pub in_octets: i64,
    pub out_octets: i64,
}

/// The normalized output of one probe pass against one device. Never fails —
/// every field that could not be gathered is `None`/empty and an entry is
/// appended to `errors`.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub system: SystemSummary,
    pub cpu: Option<CpuReading>,
    pub memory: Option<MemoryReading>,
    pub disk: Option<DiskReading>,
    pub network: Vec<InterfaceReading>,
    pub errors: Vec<String>,
    pub reachable: bool,
}

/// Shared interface over the two ways a device can be probed: the local
/// host (via OS facilities) or a remote device (via the management
/// protocol). Kept as a trait so engine tests can substitute stub sources
/// without touching real OS/network I/O.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn collect(&self, device: &Device) -> Sample;
}

pub fn round_percent(value: f64) -> f64 {
    (value).round().clamp(0.0, 100.0)
}
