use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use csnmp::{ObjectIdentifier, ObjectValue, Snmp2cClient};
use tokio::sync::RwLock;
use tracing::warn;

use super::{CpuReading, DiskReading, InterfaceReading, MemoryReading, MetricSource, Sample, SystemSummary};
use crate::db::models::Device;

const OID_SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
const OID_SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
const OID_SYS_CONTACT: &str = "1.3.6.1.2.1.1.4.0";
const OID_SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
const OID_SYS_LOCATION: &str = "1.3.6.1.2.1.1.6.0";

const OID_HR_PROCESSOR_LOAD: &str = "1.3.6.1.2.1.25.3.3.1.2";
const OID_HR_STORAGE_DESCR: &str = "1.3.6.1.2.1.25.2.3.1.3";
const OID_HR_STORAGE_ALLOC_UNITS: &str = "1.3.6.1.2.1.25.2.3.1.4";
const OID_HR_STORAGE_SIZE: &str = "1.3.6.1.2.1.25.2.3.1.5";
const OID_HR_STORAGE_USED: &str = "1.3.6.1.2.1.25.2.3.1.6";

const OID_IF_DESCR: &str = "1.3.6.1.2.1.2.2.1.2";
const OID_IF_TYPE: &str = "1.3.6.1.2.1.2.2.1.3";
const OID_IF_SPEED: &str = "1.3.6.1.2.1.2.2.1.5";
const OID_IF_ADMIN_STATUS: &str = "1.3.6.1.2.1.2.2.1.7";
const OID_IF_OPER_STATUS: &str = "1.3.6.1.2.1.2.2.1.8";
const OID_IF_IN_OCTETS: &str = "1.3.6.1.2.1.2.2.1.10";
const OID_IF_OUT_OCTETS: &str = "1.3.6.1.2.1.2.2.1.16";

const OID_UCD_LA_LOAD: &str = "1.3.6.1.4.1.2021.10.1.3";
const OID_UCD_MEM_TOTAL_REAL: &str = "1.3.6.1.4.1.2021.4.5.0";
const OID_UCD_MEM_AVAIL_REAL: &str = "1.3.6.1.4.1.2021.4.6.0";

fn oid(s: &str) -> ObjectIdentifier {
    s.parse().expect("static OID string is well-formed")
}

type SessionKey = (IpAddr, String);

/// Caches one `Snmp2cClient` per `(ip, community)` pair and reuses it across
/// polls. A session-level error evicts the entry so the next poll opens a
/// fresh one.
#[derive(Clone)]
pub struct RemoteProbe {
    sessions: Arc<RwLock<HashMap<SessionKey, Arc<Snmp2cClient>>>>,
    timeout: Duration,
    retries: usize,
}

impl Default for RemoteProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 2)
    }
}

impl RemoteProbe {
    pub fn new(timeout: Duration, retries: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout,
            retries,
        }
    }

    async fn session(&self, ip: IpAddr, community: &str) -> Result<Arc<Snmp2cClient>, String> {
        let key: SessionKey = (ip, community.to_string());
        if let Some(client) = self.sessions.read().await.get(&key) {
            return Ok(client.clone());
        }

        let client = Snmp2cClient::new(
            std::net::SocketAddr::new(ip, 161),
            community.as_bytes().to_vec(),
            None,
            0,
        )
        .await
        .map_err(|e| format!("failed to open session: {e}"))?;

        let client = Arc::new(client);
        self.sessions.write().await.insert(key, client.clone());
        Ok(client)
    }

    async fn invalidate(&self, ip: IpAddr, community: &str) {
        self.sessions.write().await.remove(&(ip, community.to_string()));
    }

    /// Drops every cached session, as on process shutdown.
    pub async fn clear_sessions(&self) {
        self.sessions.write().await.clear();
    }

    /// Collect system/CPU/memory/disk/interfaces concurrently; each may
    /// independently fail. Always returns a `Sample`.
    pub async fn collect_all(&self, ip: IpAddr, community: &str) -> Sample {
        let mut errors = Vec::new();

        let (system, cpu, memory, disk, network) = tokio::join!(
            self.collect_system(ip, community),
            self.collect_cpu(ip, community),
            self.collect_memory(ip, community),
            self.collect_disk(ip, community),
            self.collect_interfaces(ip, community),
        );

        let reachable = system.is_ok() || cpu.is_ok() || memory.is_ok() || disk.is_ok() || network.is_ok();

        let system = match system {
            Ok(s) => s,
            Err(e) => {
                errors.push(format!("system: {e}"));
                SystemSummary::default()
            }
        };
        let cpu = cpu
            .inspect_err(|e| errors.push(format!("cpu: {e}")))
            .ok();
        let memory = memory
            .inspect_err(|e| errors.push(format!("memory: {e}")))
            .ok();
        let disk = disk
            .inspect_err(|e| errors.push(format!("disk: {e}")))
            .ok();
        let network = network.unwrap_or_else(|e| {
            errors.push(format!("interfaces: {e}"));
            Vec::new()
        });

        if !reachable {
            self.invalidate(ip, community).await;
        }

        Sample {
            system,
            cpu,
            memory,
            disk,
            network,
            errors,
            reachable,
        }
    }

    async fn get_scalar(&self, ip: IpAddr, community: &str, oid_str: &str) -> Result<ObjectValue, String> {
        let client = self.session(ip, community).await?;
        let result = tokio::time::timeout(self.timeout, client.get(oid(oid_str)))
            .await
            .map_err(|_| "timeout".to_string())?
            .map_err(|e| e.to_string())?;
        Ok(result)
    }

    async fn walk_table(&self, ip: IpAddr, community: &str, base_oid: &str) -> Result<Vec<(ObjectIdentifier, ObjectValue)>, String> {
        let client = self.session(ip, community).await?;
        let result = tokio::time::timeout(self.timeout, client.walk(oid(base_oid)))
            .await
            .map_err(|_| "timeout".to_string())?
            .map_err(|e| e.to_string())?;
        Ok(result.into_iter().collect())
    }

    async fn collect_system(&self, ip: IpAddr, community: &str) -> Result<SystemSummary, String> {
        let descr = self.get_scalar(ip, community, OID_SYS_DESCR).await?;
        let uptime = self.get_scalar(ip, community, OID_SYS_UPTIME).await.ok();
        let contact = self.get_scalar(ip, community, OID_SYS_CONTACT).await.ok();
        let name = self.get_scalar(ip, community, OID_SYS_NAME).await.ok();
        let location = self.get_scalar(ip, community, OID_SYS_LOCATION).await.ok();

        Ok(SystemSummary {
            hostname: name.as_ref().map(value_to_string).unwrap_or_default(),
            description: value_to_string(&descr),
            location: location.as_ref().map(value_to_string).unwrap_or_default(),
            contact: contact.as_ref().map(value_to_string).unwrap_or_default(),
            uptime_s: uptime
                .and_then(|v| value_to_u64(&v))
                .map(centiseconds_to_seconds)
                .unwrap_or(0),
            platform: "snmp".into(),
            arch: String::new(),
            cpu_cores: 0,
            total_memory_bytes: 0,
            processes: 0,
            users: 0,
        })
    }

    async fn collect_cpu(&self, ip: IpAddr, community: &str) -> Result<CpuReading, String> {
        let loads = self.walk_table(ip, community, OID_HR_PROCESSOR_LOAD).await;
        if let Ok(rows) = &loads {
            if let Some(pct) = cpu_from_processor_loads(rows.iter().filter_map(|(_, v)| value_to_u64(v))) {
                return Ok(CpuReading { usage_percent: pct });
            }
        }

        let la = self.walk_table(ip, community, OID_UCD_LA_LOAD).await;
        if let Ok(rows) = &la {
            if let Some(first) = rows.first().and_then(|(_, v)| value_to_string(v).parse::<f64>().ok()) {
                return Ok(CpuReading {
                    usage_percent: cpu_from_load_average(first),
                });
            }
        }

        Err("no processor load table or load average available".into())
    }

    async fn collect_memory(&self, ip: IpAddr, community: &str) -> Result<MemoryReading, String> {
        let total_real = self.get_scalar(ip, community, OID_UCD_MEM_TOTAL_REAL).await;
        let avail_real = self.get_scalar(ip, community, OID_UCD_MEM_AVAIL_REAL).await;

        if let (Ok(total), Ok(avail)) = (&total_real, &avail_real) {
            if let (Some(total_kb), Some(avail_kb)) = (value_to_u64(total), value_to_u64(avail)) {
                if let Some(reading) = memory_from_ucd(total_kb, avail_kb) {
                    return Ok(reading);
                }
            }
        }

        let storage = self.walk_table(ip, community, OID_HR_STORAGE_DESCR).await;
        if let Ok(descrs) = storage {
            for (oid_val, descr) in &descrs {
                let text = value_to_string(descr).to_lowercase();
                if text.contains("memory") || text.contains("ram") || text.contains("physical memory") {
                    if let Some(reading) = self.storage_row_reading(ip, community, oid_val).await {
                        return Ok(MemoryReading {
                            usage_percent: reading.usage_percent,
                            total_bytes: reading.total_bytes,
                            used_bytes: reading.used_bytes,
                        });
                    }
                }
            }
        }

        Err("no UCD memory OIDs or matching host-resources storage row".into())
    }

    async fn collect_disk(&self, ip: IpAddr, community: &str) -> Result<DiskReading, String> {
        let descrs = self.walk_table(ip, community, OID_HR_STORAGE_DESCR).await?;
        let mut total_bytes: u64 = 0;
        let mut used_bytes: u64 = 0;
        let mut matched = false;

        for (row_oid, descr) in &descrs {
            let text = value_to_string(descr);
            if is_disk_descr(&text) {
                if let Some(reading) = self.storage_row_reading(ip, community, row_oid).await {
                    total_bytes += reading.total_bytes;
                    used_bytes += reading.used_bytes;
                    matched = true;
                }
            }
        }

        if !matched {
            return Err("no storage rows matched a disk-like description".into());
        }

        Ok(DiskReading {
            usage_percent: disk_percent(total_bytes, used_bytes),
            total_bytes,
            used_bytes,
        })
    }

    /// Read size/used/allocation-units for one hrStorageTable row, given the
    /// index suffix shared by the description OID.
    async fn storage_row_reading(&self, ip: IpAddr, community: &str, descr_oid: &ObjectIdentifier) -> Option<DiskReading> {
        let suffix = last_oid_component(descr_oid)?;
        let size_oid = format!("{OID_HR_STORAGE_SIZE}.{suffix}");
        let used_oid = format!("{OID_HR_STORAGE_USED}.{suffix}");
        let units_oid = format!("{OID_HR_STORAGE_ALLOC_UNITS}.{suffix}");

        let size = value_to_u64(&self.get_scalar(ip, community, &size_oid).await.ok()?)?;
        let used = value_to_u64(&self.get_scalar(ip, community, &used_oid).await.ok()?)?;
        let units = value_to_u64(&self.get_scalar(ip, community, &units_oid).await.ok()?).unwrap_or(1);

        let total_bytes = size.saturating_mul(units);
        let used_bytes = used.saturating_mul(units);
        Some(DiskReading {
            usage_percent: disk_percent(total_bytes, used_bytes),
            total_bytes,
            used_bytes,
        })
    }

    async fn collect_interfaces(&self, ip: IpAddr, community: &str) -> Result<Vec<InterfaceReading>, String> {
        let descrs = self.walk_table(ip, community, OID_IF_DESCR).await?;
        let mut readings = Vec::new();

        for (row_oid, descr) in &descrs {
            let idx = match last_oid_component(row_oid) {
                Some(i) => i,
                None => continue,
            };
            let name = value_to_string(descr);

            let if_type = self
                .get_scalar(ip, community, &format!("{OID_IF_TYPE}.{idx}"))
                .await
                .ok()
                .and_then(|v| value_to_u64(&v))
                .map(if_type_name)
                .unwrap_or_else(|| "other".into());
            let speed = self
                .get_scalar(ip, community, &format!("{OID_IF_SPEED}.{idx}"))
                .await
                .ok()
                .and_then(|v| value_to_u64(&v))
                .unwrap_or(0);
            let admin_status = self
                .get_scalar(ip, community, &format!("{OID_IF_ADMIN_STATUS}.{idx}"))
                .await
                .ok()
                .and_then(|v| value_to_u64(&v))
                .map(if_status_name)
                .unwrap_or_else(|| "unknown".into());
            let oper_status = self
                .get_scalar(ip, community, &format!("{OID_IF_OPER_STATUS}.{idx}"))
                .await
                .ok()
                .and_then(|v| value_to_u64(&v))
                .map(if_status_name)
                .unwrap_or_else(|| "unknown".into());
            let in_octets = self
                .get_scalar(ip, community, &format!("{OID_IF_IN_OCTETS}.{idx}"))
                .await
                .ok()
                .and_then(|v| value_to_u64(&v))
                .unwrap_or(0);
            let out_octets = self
                .get_scalar(ip, community, &format!("{OID_IF_OUT_OCTETS}.{idx}"))
                .await
                .ok()
                .and_then(|v| value_to_u64(&v))
                .unwrap_or(0);

            readings.push(InterfaceReading {
                index: idx as i64,
                name,
                description: String::new(),
                interface_type: if_type,
                speed: speed as i64,
                admin_status,
                oper_status,
                in_octets: in_octets as i64,
                out_octets: out_octets as i64,
            });
        }

        Ok(readings)
    }
}

#[async_trait]
impl MetricSource for RemoteProbe {
    async fn collect(&self, device: &Device) -> Sample {
        match device.ip.parse::<IpAddr>() {
            Ok(ip) => self.collect_all(ip, &device.community).await,
            Err(e) => {
                warn!(ip = %device.ip, error = %e, "device has unparseable IP");
                Sample {
                    errors: vec![format!("invalid IP address: {e}")],
                    reachable: false,
                    ..Default::default()
                }
            }
        }
    }
}

fn last_oid_component(id: &ObjectIdentifier) -> Option<u64> {
    id.to_string().rsplit('.').next()?.parse().ok()
}

fn value_to_string(value: &ObjectValue) -> String {
    match value {
        ObjectValue::String(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => format!("{other:?}").trim_matches('"').to_string(),
    }
}

fn value_to_u64(value: &ObjectValue) -> Option<u64> {
    match value {
        ObjectValue::Integer(i) => u64::try_from(*i).ok(),
        ObjectValue::Counter32(c) => Some(*c as u64),
        ObjectValue::Counter64(c) => Some(*c),
        ObjectValue::Gauge32(g) => Some(*g as u64),
        ObjectValue::TimeTicks(t) => Some(*t as u64),
        ObjectValue::Unsigned32(u) => Some(*u as u64),
        _ => value_to_string(value).parse().ok(),
    }
}

fn is_disk_descr(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains('/') || lower.contains("c:") || lower.contains("disk")
}

fn disk_percent(total: u64, used: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        super::round_percent(100.0 * used as f64 / total as f64)
    }
}

fn if_type_name(code: u64) -> String {
    match code {
        6 => "ethernetCsmacd",
        24 => "softwareLoopback",
        71 => "ieee80211",
        _ => "other",
    }
    .to_string()
}

fn if_status_name(code: u64) -> String {
    match code {
        1 => "up",
        2 => "down",
        3 => "testing",
        _ => "unknown",
    }
    .to_string()
}

/// Average the processor load table (percentages, 0-100), if non-empty.
pub fn cpu_from_processor_loads(loads: impl Iterator<Item = u64>) -> Option<f64> {
    let loads: Vec<u64> = loads.collect();
    if loads.is_empty() {
        return None;
    }
    let sum: u64 = loads.iter().sum();
    Some(super::round_percent(sum as f64 / loads.len() as f64))
}

/// Derive an approximate CPU percent from the 1-minute load average.
pub fn cpu_from_load_average(load_1min: f64) -> f64 {
    super::round_percent((load_1min * 10.0).min(100.0))
}

/// UCD-SNMP-MIB-style memory: values are in KB.
pub fn memory_from_ucd(total_real_kb: u64, avail_real_kb: u64) -> Option<MemoryReading> {
    if total_real_kb == 0 {
        return None;
    }
    let total_bytes = total_real_kb * 1024;
    let avail_bytes = avail_real_kb.saturating_mul(1024);
    let used_bytes = total_bytes.saturating_sub(avail_bytes);
    Some(MemoryReading {
        usage_percent: super::round_percent(100.0 * used_bytes as f64 / total_bytes as f64),
        total_bytes,
        used_bytes,
    })
}

/// Convert a sysUpTime-style TimeTicks value (centiseconds) to seconds.
pub fn centiseconds_to_seconds(ticks: u64) -> u64 {
    ticks / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_from_processor_loads_averages_nonempty() {
        let pct = cpu_from_processor_loads(vec![10, 20, 30].into_iter()).unwrap();
        assert_eq!(pct, 20.0);
    }

    #[test]
    fn cpu_from_processor_loads_empty_is_none() {
        assert!(cpu_from_processor_loads(std::iter::empty()).is_none());
    }

    #[test]
    fn cpu_from_load_average_scales_and_clamps() {
        assert_eq!(cpu_from_load_average(2.0), 20.0);
        assert_eq!(cpu_from_load_average(15.0), 100.0);
    }

    #[test]
    fn memory_from_ucd_computes_used_and_percent() {
        let mem = memory_from_ucd(1_000_000, 250_000).unwrap();
        assert_eq!(mem.total_bytes, 1_000_000 * 1024);
        assert_eq!(mem.usage_percent, 75.0);
    }

    #[test]
    fn memory_from_ucd_zero_total_is_none() {
        assert!(memory_from_ucd(0, 0).is_none());
    }

    #[test]
    fn centiseconds_to_seconds_divides_by_100() {
        assert_eq!(centiseconds_to_seconds(12345), 123);
    }

    #[test]
    fn disk_percent_handles_zero_total() {
        assert_eq!(disk_percent(0, 0), 0.0);
    }

    #[test]
    fn is_disk_descr_matches_unix_and_windows_style() {
        assert!(is_disk_descr("/"));
        assert!(is_disk_descr("C:\\ Label:  Serial Number"));
        assert!(!is_disk_descr("swap space"));
    }

    #[test]
    fn if_status_name_maps_known_codes() {
        assert_eq!(if_status_name(1), "up");
        assert_eq!(if_status_name(2), "down");
        assert_eq!(if_status_name(99), "unknown");
    }

    #[test]
    fn value_to_string_decodes_octet_string_as_text() {
        let value = ObjectValue::String(b"eth0 description".to_vec());
        assert_eq!(value_to_string(&value), "eth0 description");
    }

    #[test]
    fn value_to_string_decoded_text_matches_disk_descriptors() {
        let value = ObjectValue::String(b"/ : Label:root  Serial Number 0001".to_vec());
        assert!(is_disk_descr(&value_to_string(&value)));
    }
}
