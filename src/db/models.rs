use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Sentinel device id for the host machine lanwatchd runs on.
pub const LOCALHOST_DEVICE_ID: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unknown,
    Online,
    Warning,
    Critical,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Online => "online",
            DeviceStatus::Warning => "warning",
            DeviceStatus::Critical => "critical",
            DeviceStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(DeviceStatus::Unknown),
            "online" => Ok(DeviceStatus::Online),
            "warning" => Ok(DeviceStatus::Warning),
            "critical" => Ok(DeviceStatus::Critical),
            "offline" => Ok(DeviceStatus::Offline),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    MemoryTotal,
    MemoryUsed,
    DiskTotal,
    DiskUsed,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::CpuUsage => "cpu_usage",
            MetricType::MemoryUsage => "memory_usage",
            MetricType::DiskUsage => "disk_usage",
            MetricType::MemoryTotal => "memory_total",
            MetricType::MemoryUsed => "memory_used",
            MetricType::DiskTotal => "disk_total",
            MetricType::DiskUsed => "disk_used",
        }
    }

    /// The kind of alert threshold this metric feeds, if any.
    pub fn threshold_kind(&self) -> Option<AlertType> {
        match self {
            MetricType::CpuUsage => Some(AlertType::Cpu),
            MetricType::MemoryUsage => Some(AlertType::Memory),
            MetricType::DiskUsage => Some(AlertType::Disk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Percent,
    Bytes,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Percent => "percent",
            Unit::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Cpu,
    Memory,
    Disk,
    Network,
    Offline,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Cpu => "cpu",
            AlertType::Memory => "memory",
            AlertType::Disk => "disk",
            AlertType::Network => "network",
            AlertType::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: String,
    pub ip: String,
    pub hostname: String,
    pub description: String,
    pub location: String,
    pub contact: String,
    pub community: String,
    pub status: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn is_local(&self) -> bool {
        self.id == LOCALHOST_DEVICE_ID
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricSample {
    pub id: i64,
    pub device_id: String,
    pub metric_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// A single unpersisted metric observation, as produced by a probe.
#[derive(Debug, Clone)]
pub struct NewMetric {
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: Unit,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemInfo {
    pub id: i64,
    pub device_id: String,
    pub uptime: i64,
    pub processes: i64,
    pub users: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NetworkInterface {
    pub id: i64,
    pub device_id: String,
    #[sqlx(rename = "if_index")]
    pub index: i64,
    pub name: String,
    pub description: String,
    #[sqlx(rename = "if_type")]
    pub interface_type: String,
    pub speed: i64,
    pub admin_status: String,
    pub oper_status: String,
    pub in_octets: i64,
    pub out_octets: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub device_ip: String,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanRecord {
    pub id: i64,
    pub scan_range: String,
    pub total_ips: i64,
    pub discovered_hosts: i64,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
    pub description: String,
}

/// Per-table row counts and an approximate storage footprint, returned by
/// `Store::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub devices: i64,
    pub metrics: i64,
    pub system_info: i64,
    pub network_interfaces: i64,
    pub alerts: i64,
    pub scan_history: i64,
    pub page_count: i64,
    pub page_size: i64,
}

impl StoreStats {
    pub fn approx_bytes(&self) -> i64 {
        self.page_count * self.page_size
    }
}
