pub mod config;

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::alerts::AlertEngine;
use crate::broadcast::{Broadcaster, Event};
use crate::db::models::{Alert, Device, DeviceStatus, MetricSample, MetricType, NewMetric, ScanRecord, Severity, Unit};
use crate::db::store::{AggPeriod, AlertFilter, MetricBucket, NewInterface, Store, StoreError};
use crate::probes::{host::HostProbe, remote::RemoteProbe, MetricSource, Sample};
use crate::scanner::{ScanOptions, ScanState, Scanner};

pub use config::{RuntimeConfig, Thresholds};

/// Candidate management-protocol credentials tried, in order, against a
/// newly discovered host with unknown identity.
const DISCOVERY_COMMUNITIES: &[&str] = &["public", "private", "monitoring"];

/// Upper bound on poll tasks dispatched concurrently within one tick.
const DEFAULT_CONCURRENT_POLLS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            other => EngineError::Fatal(other.into()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub running: bool,
    pub device_count: usize,
    pub scan_state: String,
    pub last_tick_age_s: Option<i64>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsOverview {
    pub device_count: usize,
    pub online: usize,
    pub warning: usize,
    pub critical: usize,
    pub offline: usize,
    pub active_alerts: usize,
    pub avg_cpu_percent: Option<f64>,
    pub avg_memory_percent: Option<f64>,
    pub avg_disk_percent: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TopUsageEntry {
    pub device: Device,
    pub value: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RangeValidation {
    pub valid: bool,
    pub total_ips: usize,
    pub first_ip: Option<String>,
    pub last_ip: Option<String>,
    pub sample_ips: Vec<String>,
    pub error: Option<String>,
}

struct EngineState {
    config: RuntimeConfig,
    registry: HashMap<String, Device>, // keyed by ip
    last_scan_time: Option<chrono::DateTime<Utc>>,
    last_tick_time: Option<chrono::DateTime<Utc>>,
}

/// Orchestrates Store, probes, Scanner, AlertEngine, and Broadcaster into one
/// polling/alerting/discovery loop. Cheap to clone: every field is `Arc`- or
/// lock-wrapped shared state, same convention as the teacher's scheduler
/// handle.
#[derive(Clone)]
pub struct Engine {
    store: Store,
    broadcaster: Broadcaster,
    scanner: Scanner,
    alerts: AlertEngine,
    host_probe: Arc<HostProbe>,
    remote_probe: Arc<RemoteProbe>,
    state: Arc<RwLock<EngineState>>,
    running: Arc<AtomicBool>,
    tick_lock: Arc<Mutex<()>>,
    ticker_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Engine {
    pub fn new(store: Store) -> Self {
        let broadcaster = Broadcaster::new();
        let scanner = Scanner::new(broadcaster.clone());
        let alerts = AlertEngine::new(store.clone(), broadcaster.clone());

        Self {
            store,
            broadcaster,
            scanner,
            alerts,
            host_probe: Arc::new(HostProbe::new()),
            remote_probe: Arc::new(RemoteProbe::default()),
            state: Arc::new(RwLock::new(EngineState {
                config: RuntimeConfig::default(),
                registry: HashMap::new(),
                last_scan_time: None,
                last_tick_time: None,
            })),
            running: Arc::new(AtomicBool::new(false)),
            tick_lock: Arc::new(Mutex::new(())),
            ticker_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Strict bootstrap order: load config, hydrate registry, ensure
    /// localhost exists, wire listeners (a no-op here — Scanner and
    /// AlertEngine already publish to the shared Broadcaster instance),
    /// start the ticker and daily maintenance job, then run one cycle now.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let cfg = config::load(&self.store).await?;
        let devices = self.store.list_devices().await?;

        {
            let mut state = self.state.write().await;
            state.config = cfg;
            state.registry = devices.into_iter().map(|d| (d.ip.clone(), d)).collect();
        }

        self.ensure_localhost_device().await?;
        self.alerts.load().await?;

        self.running.store(true, Ordering::SeqCst);
        self.spawn_ticker().await;
        self.spawn_daily_maintenance();

        self.tick().await;
        info!("engine initialized");
        Ok(())
    }

    async fn ensure_localhost_device(&self) -> Result<(), EngineError> {
        if self.store.get_device(crate::db::models::LOCALHOST_DEVICE_ID).await?.is_some() {
            return Ok(());
        }

        let ip = primary_interface_ip().unwrap_or_else(|| "127.0.0.1".to_string());
        let now = Utc::now();
        let device = Device {
            id: crate::db::models::LOCALHOST_DEVICE_ID.to_string(),
            ip,
            hostname: "localhost".to_string(),
            description: "local host".to_string(),
            location: String::new(),
            contact: String::new(),
            community: "local".to_string(),
            status: DeviceStatus::Unknown.as_str().to_string(),
            first_seen: now,
            last_seen: now,
        };
        self.store.upsert_device(&device).await?;
        self.state.write().await.registry.insert(device.ip.clone(), device);
        Ok(())
    }

    async fn spawn_ticker(&self) {
        let engine = self.clone();
        let interval_s = self.state.read().await.config.refresh_interval_s;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_s));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !engine.running.load(Ordering::SeqCst) {
                    break;
                }
                engine.tick().await;
            }
        });
        *self.ticker_handle.lock().await = Some(handle);
    }

    fn spawn_daily_maintenance(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let sleep_for = seconds_until_next_2am();
                tokio::time::sleep(std::time::Duration::from_secs(sleep_for)).await;
                if !engine.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = engine.run_maintenance().await {
                    error!(error = %e, "scheduled maintenance failed");
                }
            }
        });
    }

    /// One monitoring cycle: skipped (coalesced) if the previous tick is
    /// still running, or if a scan is in progress.
    pub async fn tick(&self) {
        let guard = match self.tick_lock.try_lock() {
            Ok(g) => g,
            Err(_) => {
                warn!("tick skipped: previous tick still in progress");
                return;
            }
        };

        if self.scanner.state().await == ScanState::Scanning {
            return;
        }

        let start = std::time::Instant::now();
        let devices: Vec<Device> = self.state.read().await.registry.values().cloned().collect();
        let thresholds = self.state.read().await.config.thresholds;
        let concurrency = DEFAULT_CONCURRENT_POLLS.min(devices.len().max(1));

        let mut join_set = JoinSet::new();
        let mut pending = devices.into_iter();
        for device in pending.by_ref().take(concurrency) {
            let engine = self.clone();
            join_set.spawn(async move { engine.poll_device(device, thresholds).await });
        }

        let mut polled: Vec<Device> = Vec::new();
        while let Some(result) = join_set.join_next().await {
            if let Ok(device) = result {
                polled.push(device);
            }
            if let Some(device) = pending.next() {
                let engine = self.clone();
                join_set.spawn(async move { engine.poll_device(device, thresholds).await });
            }
        }

        {
            let mut state = self.state.write().await;
            for device in &polled {
                state.registry.insert(device.ip.clone(), device.clone());
            }
            state.last_tick_time = Some(Utc::now());
        }

        let cycle_ms = start.elapsed().as_millis() as i64;
        self.broadcaster
            .publish(
                "monitoring_update",
                json!({"devices": polled, "timestamp": Utc::now(), "cycle_ms": cycle_ms}),
            )
            .await;
        drop(guard);
    }

    async fn poll_device(&self, mut device: Device, thresholds: Thresholds) -> Device {
        let sample: Sample = if device.is_local() {
            self.host_probe.collect(&device).await
        } else {
            self.remote_probe.collect(&device).await
        };

        if !sample.reachable {
            device.status = DeviceStatus::Offline.as_str().to_string();
            if let Err(e) = self.store.set_device_status(&device.id, DeviceStatus::Offline).await {
                warn!(device = %device.id, error = %e, "failed to persist offline status");
            }
            self.alerts
                .create(&device.id, &device.ip, crate::db::models::AlertType::Offline, Severity::Critical, "device unreachable")
                .await;
            self.broadcaster.publish("host_offline", json!({"device_id": device.id, "ip": device.ip})).await;
            return device;
        }

        device.hostname = non_empty_or(&sample.system.hostname, &device.hostname);
        device.description = non_empty_or(&sample.system.description, &device.description);
        device.last_seen = Utc::now();

        if let Err(e) = self.store.upsert_device(&device).await {
            warn!(device = %device.id, error = %e, "failed to persist refreshed device identity");
        }
        if let Err(e) = self
            .store
            .insert_system_info(&device.id, sample.system.uptime_s as i64, sample.system.processes as i64, sample.system.users as i64)
            .await
        {
            warn!(device = %device.id, error = %e, "failed to persist system info");
        }

        let mut metrics = Vec::new();
        if let Some(cpu) = sample.cpu {
            metrics.push(NewMetric { metric_type: MetricType::CpuUsage, value: cpu.usage_percent, unit: Unit::Percent });
        }
        if let Some(mem) = sample.memory {
            metrics.push(NewMetric { metric_type: MetricType::MemoryUsage, value: mem.usage_percent, unit: Unit::Percent });
            metrics.push(NewMetric { metric_type: MetricType::MemoryTotal, value: mem.total_bytes as f64, unit: Unit::Bytes });
            metrics.push(NewMetric { metric_type: MetricType::MemoryUsed, value: mem.used_bytes as f64, unit: Unit::Bytes });
        }
        if let Some(disk) = sample.disk {
            metrics.push(NewMetric { metric_type: MetricType::DiskUsage, value: disk.usage_percent, unit: Unit::Percent });
            metrics.push(NewMetric { metric_type: MetricType::DiskTotal, value: disk.total_bytes as f64, unit: Unit::Bytes });
            metrics.push(NewMetric { metric_type: MetricType::DiskUsed, value: disk.used_bytes as f64, unit: Unit::Bytes });
        }
        if let Err(e) = self.store.insert_metrics(&device.id, &metrics).await {
            warn!(device = %device.id, error = %e, "failed to persist metrics batch");
        }

        let interfaces: Vec<NewInterface> = sample
            .network
            .iter()
            .map(|i| NewInterface {
                index: i.index,
                name: i.name.clone(),
                description: i.description.clone(),
                interface_type: i.interface_type.clone(),
                speed: i.speed,
                admin_status: i.admin_status.clone(),
                oper_status: i.oper_status.clone(),
                in_octets: i.in_octets,
                out_octets: i.out_octets,
            })
            .collect();
        if let Err(e) = self.store.replace_interfaces(&device.id, &interfaces).await {
            warn!(device = %device.id, error = %e, "failed to persist interface snapshot");
        }

        // A successful poll means the device is reachable again; clear any
        // stale offline/critical alert before deriving the overall status.
        self.alerts.auto_resolve(&device.id, crate::db::models::AlertType::Offline, 0.0, 0.0).await;

        let status = self.check_thresholds(&device, &sample, thresholds).await;
        device.status = status.as_str().to_string();
        if let Err(e) = self.store.set_device_status(&device.id, status).await {
            warn!(device = %device.id, error = %e, "failed to persist derived device status");
        }

        self.broadcaster.publish("host_online", json!({"device_id": device.id, "ip": device.ip})).await;
        device
    }

    /// Creates or auto-resolves cpu/memory/disk alerts for one device's
    /// sample, and returns the derived overall device status.
    async fn check_thresholds(&self, device: &Device, sample: &Sample, thresholds: Thresholds) -> DeviceStatus {
        use crate::db::models::AlertType;

        let checks = [
            (AlertType::Cpu, sample.cpu.map(|c| c.usage_percent), thresholds.cpu),
            (AlertType::Memory, sample.memory.map(|m| m.usage_percent), thresholds.memory),
            (AlertType::Disk, sample.disk.map(|d| d.usage_percent), thresholds.disk),
        ];

        for (kind, usage, pair) in checks {
            let Some(usage) = usage else { continue };
            if usage >= pair.critical {
                self.alerts
                    .create(&device.id, &device.ip, kind, Severity::Critical, &format!("{} usage at {usage:.1}%", kind.as_str()))
                    .await;
            } else if usage >= pair.warning {
                self.alerts
                    .create(&device.id, &device.ip, kind, Severity::Warning, &format!("{} usage at {usage:.1}%", kind.as_str()))
                    .await;
            } else {
                self.alerts.auto_resolve(&device.id, kind, usage, pair.warning).await;
            }
        }

        let active = self.alerts.for_device(&device.id).await;
        let worst = active
            .iter()
            .filter(|a| !a.acknowledged)
            .filter_map(|a| a.severity.parse::<Severity>().ok())
            .max();
        match worst {
            Some(Severity::Critical) => DeviceStatus::Critical,
            Some(Severity::Warning) => DeviceStatus::Warning,
            None => DeviceStatus::Online,
        }
    }

    /// Delegates to Scanner; on each discovered host, enriches the device
    /// registry (`ProcessDiscoveredHost`) and appends a `ScanRecord`.
    pub async fn scan_network(&self, range: &str, options: ScanOptions) -> Result<ScanRecord, EngineError> {
        if self.scanner.state().await == ScanState::Scanning {
            return Err(EngineError::Conflict("a scan is already in progress".into()));
        }

        let started_at = Utc::now();
        let summary = self
            .scanner
            .scan(range, options)
            .await
            .map_err(|e| EngineError::Invalid(e.to_string()))?;

        for host in &summary.discovered {
            self.process_discovered_host(host.ip).await;
        }

        let completed_at = Utc::now();
        let record = ScanRecord {
            id: 0,
            scan_range: range.to_string(),
            total_ips: summary.total_scanned as i64,
            discovered_hosts: summary.discovered.len() as i64,
            duration_ms: summary.duration_ms,
            started_at,
            completed_at,
        };
        self.store.append_scan_history(&record).await?;
        self.state.write().await.last_scan_time = Some(completed_at);
        Ok(record)
    }

    async fn process_discovered_host(&self, ip: std::net::Ipv4Addr) {
        let ip_str = ip.to_string();

        let existing = { self.state.read().await.registry.get(&ip_str).cloned() };
        if let Some(mut device) = existing {
            device.status = DeviceStatus::Online.as_str().to_string();
            device.last_seen = Utc::now();
            if let Err(e) = self.store.upsert_device(&device).await {
                warn!(ip = %ip_str, error = %e, "failed to mark rediscovered device online");
            }
            self.state.write().await.registry.insert(ip_str, device);
            return;
        }

        let mut found_community = None;
        let mut hostname = ip_str.clone();
        for community in DISCOVERY_COMMUNITIES {
            let probe_device = Device {
                id: String::new(),
                ip: ip_str.clone(),
                hostname: String::new(),
                description: String::new(),
                location: String::new(),
                contact: String::new(),
                community: community.to_string(),
                status: DeviceStatus::Unknown.as_str().to_string(),
                first_seen: Utc::now(),
                last_seen: Utc::now(),
            };
            let sample = self.remote_probe.collect(&probe_device).await;
            if sample.reachable {
                found_community = Some(community.to_string());
                if !sample.system.hostname.is_empty() {
                    hostname = sample.system.hostname;
                }
                break;
            }
        }

        let community = found_community.unwrap_or_else(|| "public".to_string());
        let now = Utc::now();
        let device = Device {
            id: uuid::Uuid::new_v4().to_string(),
            ip: ip_str.clone(),
            hostname,
            description: String::new(),
            location: String::new(),
            contact: String::new(),
            community,
            status: DeviceStatus::Online.as_str().to_string(),
            first_seen: now,
            last_seen: now,
        };

        if let Err(e) = self.store.upsert_device(&device).await {
            warn!(ip = %ip_str, error = %e, "failed to persist newly discovered device");
            return;
        }
        self.state.write().await.registry.insert(ip_str, device);
    }

    pub fn validate_range(&self, range: &str) -> RangeValidation {
        match crate::scanner::parse_range(range) {
            Ok(hosts) => RangeValidation {
                valid: true,
                total_ips: hosts.len(),
                first_ip: hosts.first().map(|h| h.to_string()),
                last_ip: hosts.last().map(|h| h.to_string()),
                sample_ips: hosts.iter().take(5).map(|h| h.to_string()).collect(),
                error: None,
            },
            Err(e) => RangeValidation {
                valid: false,
                total_ips: 0,
                first_ip: None,
                last_ip: None,
                sample_ips: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Validates and persists configuration changes, then reloads. If
    /// `refresh_interval` changed, the ticker is restarted once pending work
    /// completes.
    pub async fn update_config(&self, updates: HashMap<String, String>) -> Result<(), EngineError> {
        const RECOGNIZED: &[&str] = &[
            "refresh_interval",
            "default_community",
            "scan_timeout",
            "snmp_timeout",
            "max_history_days",
            "cpu_warning_threshold",
            "cpu_critical_threshold",
            "memory_warning_threshold",
            "memory_critical_threshold",
            "disk_warning_threshold",
            "disk_critical_threshold",
        ];

        for key in updates.keys() {
            if !RECOGNIZED.contains(&key.as_str()) {
                return Err(EngineError::Invalid(format!("unrecognized configuration key: {key}")));
            }
        }

        let previous_interval = self.state.read().await.config.refresh_interval_s;
        for (key, value) in &updates {
            self.store.set_config(key, value, None).await?;
        }

        let cfg = config::load(&self.store).await?;
        let new_interval = cfg.refresh_interval_s;
        self.state.write().await.config = cfg;

        if new_interval != previous_interval {
            if let Some(handle) = self.ticker_handle.lock().await.take() {
                handle.abort();
            }
            self.spawn_ticker().await;
        }

        Ok(())
    }

    pub async fn health(&self) -> HealthSnapshot {
        let state = self.state.read().await;
        HealthSnapshot {
            running: self.running.load(Ordering::SeqCst),
            device_count: state.registry.len(),
            scan_state: format!("{:?}", self.scanner.state().await),
            last_tick_age_s: state.last_tick_time.map(|t| (Utc::now() - t).num_seconds()),
        }
    }

    pub async fn run_maintenance(&self) -> Result<(), EngineError> {
        let retention_days = self.state.read().await.config.max_history_days;
        self.store.cleanup(retention_days).await?;
        info!(retention_days, "maintenance cleanup complete");
        Ok(())
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        self.state.read().await.registry.values().cloned().collect()
    }

    pub async fn get_device(&self, id: &str) -> Option<Device> {
        self.state.read().await.registry.values().find(|d| d.id == id).cloned()
    }

    /// Registers a new managed device. Rejects a duplicate IP rather than
    /// silently adopting the existing entry, since the caller supplied
    /// community/contact fields they expect to take effect.
    pub async fn add_device(
        &self,
        ip: &str,
        hostname: &str,
        community: &str,
        description: &str,
        location: &str,
        contact: &str,
    ) -> Result<Device, EngineError> {
        if self.store.get_device_by_ip(ip).await?.is_some() {
            return Err(EngineError::Conflict(format!("a device with ip {ip} already exists")));
        }

        let now = Utc::now();
        let device = Device {
            id: uuid::Uuid::new_v4().to_string(),
            ip: ip.to_string(),
            hostname: hostname.to_string(),
            description: description.to_string(),
            location: location.to_string(),
            contact: contact.to_string(),
            community: community.to_string(),
            status: DeviceStatus::Unknown.as_str().to_string(),
            first_seen: now,
            last_seen: now,
        };
        self.store.upsert_device(&device).await?;
        self.state.write().await.registry.insert(device.ip.clone(), device.clone());
        Ok(device)
    }

    /// Applies a partial update to a device's static fields. Fields left as
    /// `None` keep their current value.
    pub async fn update_device(
        &self,
        id: &str,
        hostname: Option<String>,
        description: Option<String>,
        location: Option<String>,
        contact: Option<String>,
        community: Option<String>,
    ) -> Result<Device, EngineError> {
        let mut device = self
            .store
            .get_device(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("device {id} not found")))?;

        if let Some(hostname) = hostname {
            device.hostname = hostname;
        }
        if let Some(description) = description {
            device.description = description;
        }
        if let Some(location) = location {
            device.location = location;
        }
        if let Some(contact) = contact {
            device.contact = contact;
        }
        if let Some(community) = community {
            device.community = community;
        }

        self.store.upsert_device(&device).await?;
        self.state.write().await.registry.insert(device.ip.clone(), device.clone());
        Ok(device)
    }

    /// Removes a device and its history. The synthetic localhost device
    /// can't be deleted: it's recreated by `initialize` on every restart.
    pub async fn delete_device(&self, id: &str) -> Result<(), EngineError> {
        if id == crate::db::models::LOCALHOST_DEVICE_ID {
            return Err(EngineError::Invalid("the localhost device cannot be deleted".into()));
        }
        let device = self
            .store
            .get_device(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("device {id} not found")))?;
        self.store.delete_device(id).await?;
        self.state.write().await.registry.remove(&device.ip);
        Ok(())
    }

    /// Probes a candidate IP/community pair without touching the registry,
    /// for validating credentials before `add_device`.
    pub async fn test_connectivity(&self, ip: &str, community: &str) -> bool {
        let probe_device = Device {
            id: String::new(),
            ip: ip.to_string(),
            hostname: String::new(),
            description: String::new(),
            location: String::new(),
            contact: String::new(),
            community: community.to_string(),
            status: DeviceStatus::Unknown.as_str().to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        };
        self.remote_probe.collect(&probe_device).await.reachable
    }

    /// Forces an out-of-cycle poll of one device, bypassing the tick
    /// schedule, and returns its refreshed state.
    pub async fn collect_now(&self, device_id: &str) -> Result<Device, EngineError> {
        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("device {device_id} not found")))?;
        let thresholds = self.state.read().await.config.thresholds;
        let polled = self.poll_device(device, thresholds).await;
        self.state.write().await.registry.insert(polled.ip.clone(), polled.clone());
        Ok(polled)
    }

    /// Single-host liveness check, independent of device management.
    pub async fn ping_host(&self, ip: Ipv4Addr) -> Option<u64> {
        crate::scanner::ping(ip, std::time::Duration::from_millis(2000)).await
    }

    /// Single-host port scan against the well-known target list.
    pub async fn port_scan_host(&self, ip: Ipv4Addr) -> Vec<u16> {
        crate::scanner::port_scan(ip, std::time::Duration::from_millis(2000)).await
    }

    /// Named range templates offered to callers that don't want to type a
    /// CIDR block by hand.
    pub fn scan_presets(&self) -> &'static [(&'static str, &'static str)] {
        const SCAN_PRESETS: &[(&str, &str)] = &[
            ("home-lan", "192.168.1.0/24"),
            ("office-lan", "10.0.0.0/24"),
            ("small-office", "192.168.0.0/24"),
            ("link-local", "169.254.0.0/24"),
        ];
        SCAN_PRESETS
    }

    pub fn stop_scan(&self) {
        self.scanner.stop();
    }

    pub async fn scan_state(&self) -> ScanState {
        self.scanner.state().await
    }

    pub async fn scan_history(&self, limit: i64) -> Result<Vec<ScanRecord>, EngineError> {
        Ok(self.store.list_scan_history(limit).await?)
    }

    pub async fn get_config(&self) -> RuntimeConfig {
        self.state.read().await.config.clone()
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resumes the polling ticker if it is currently stopped. Distinct from
    /// `initialize`: assumes configuration and the device registry are
    /// already loaded, and only restarts the tick schedule.
    pub async fn start_monitoring(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn_ticker().await;
        info!("monitoring resumed");
        Ok(())
    }

    /// Pauses the polling ticker without tearing down Store/Scanner/
    /// Broadcaster state. Safe to follow with `start_monitoring`.
    pub async fn stop_monitoring(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.ticker_handle.lock().await.take() {
            handle.abort();
        }
        info!("monitoring paused");
    }

    /// Most recent reading per metric type for one device.
    pub async fn metrics_for_device(
        &self,
        device_id: &str,
        types: Option<&[MetricType]>,
    ) -> Result<Vec<MetricSample>, EngineError> {
        Ok(self.store.latest_metrics(device_id, types).await?)
    }

    /// Ascending time series for one metric over a trailing window.
    pub async fn metrics_history(
        &self,
        device_id: &str,
        metric_type: MetricType,
        window_hours: i64,
    ) -> Result<Vec<MetricSample>, EngineError> {
        Ok(self.store.metrics_history(device_id, metric_type, window_hours).await?)
    }

    /// Bucketed avg/min/max/count roll-up for one metric.
    pub async fn metrics_aggregated(
        &self,
        device_id: &str,
        metric_type: MetricType,
        period: AggPeriod,
    ) -> Result<Vec<MetricBucket>, EngineError> {
        Ok(self.store.metrics_aggregate(device_id, metric_type, period).await?)
    }

    /// Fleet-wide snapshot: device counts by status, active alert count, and
    /// the mean of each usage metric across devices that reported one.
    pub async fn metrics_overview(&self) -> MetricsOverview {
        let devices = self.list_devices().await;
        let mut overview = MetricsOverview {
            device_count: devices.len(),
            active_alerts: self.alerts.active_count().await,
            ..Default::default()
        };

        let (mut cpu_sum, mut cpu_n) = (0.0, 0usize);
        let (mut mem_sum, mut mem_n) = (0.0, 0usize);
        let (mut disk_sum, mut disk_n) = (0.0, 0usize);

        for device in &devices {
            match device.status.parse::<DeviceStatus>() {
                Ok(DeviceStatus::Online) => overview.online += 1,
                Ok(DeviceStatus::Warning) => overview.warning += 1,
                Ok(DeviceStatus::Critical) => overview.critical += 1,
                Ok(DeviceStatus::Offline) => overview.offline += 1,
                _ => {}
            }

            if let Ok(latest) = self.store.latest_metrics(&device.id, None).await {
                for m in latest {
                    if m.metric_type == MetricType::CpuUsage.as_str() {
                        cpu_sum += m.value;
                        cpu_n += 1;
                    } else if m.metric_type == MetricType::MemoryUsage.as_str() {
                        mem_sum += m.value;
                        mem_n += 1;
                    } else if m.metric_type == MetricType::DiskUsage.as_str() {
                        disk_sum += m.value;
                        disk_n += 1;
                    }
                }
            }
        }

        overview.avg_cpu_percent = (cpu_n > 0).then(|| cpu_sum / cpu_n as f64);
        overview.avg_memory_percent = (mem_n > 0).then(|| mem_sum / mem_n as f64);
        overview.avg_disk_percent = (disk_n > 0).then(|| disk_sum / disk_n as f64);
        overview
    }

    /// Devices ranked by their latest reading of one metric, highest first.
    pub async fn top_usage(&self, metric_type: MetricType, limit: usize) -> Vec<TopUsageEntry> {
        let devices = self.list_devices().await;
        let mut entries = Vec::with_capacity(devices.len());

        for device in devices {
            if let Ok(latest) = self.store.latest_metrics(&device.id, Some(&[metric_type])).await {
                if let Some(sample) = latest.into_iter().next() {
                    entries.push(TopUsageEntry { device, value: sample.value });
                }
            }
        }

        entries.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(limit);
        entries
    }

    /// Registers a new live-event subscriber; the caller drains the returned
    /// receiver and calls `unsubscribe_realtime` (or just drops it) when done.
    pub async fn subscribe_realtime(&self, capacity: usize) -> (uuid::Uuid, tokio::sync::mpsc::Receiver<Event>) {
        self.broadcaster.subscribe(capacity).await
    }

    pub async fn unsubscribe_realtime(&self, id: uuid::Uuid) {
        self.broadcaster.unsubscribe(id).await;
    }

    pub async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>, EngineError> {
        Ok(self.store.list_alerts(&filter).await?)
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>, EngineError> {
        Ok(self.store.get_alert(id).await?)
    }

    pub async fn ack_alert(&self, id: &str, who: &str) -> Result<Alert, EngineError> {
        Ok(self.alerts.ack(id, who).await?)
    }

    pub async fn resolve_alert(&self, id: &str) -> Result<Alert, EngineError> {
        Ok(self.alerts.resolve(id).await?)
    }

    pub async fn delete_alert(&self, id: &str) -> Result<(), EngineError> {
        Ok(self.alerts.delete(id).await?)
    }

    pub async fn bulk_ack_alerts(&self, ids: &[String], who: &str) -> Vec<Result<Alert, EngineError>> {
        self.alerts
            .bulk_ack(ids, who)
            .await
            .into_iter()
            .map(|r| r.map_err(EngineError::from))
            .collect()
    }

    pub async fn bulk_resolve_alerts(&self, ids: &[String]) -> Vec<Result<Alert, EngineError>> {
        self.alerts
            .bulk_resolve(ids)
            .await
            .into_iter()
            .map(|r| r.map_err(EngineError::from))
            .collect()
    }

    /// Full process shutdown: pauses the ticker, closes remote sessions and
    /// broadcaster subscriber handles. The Store's connection pool closes
    /// when the last `Engine` clone (and thus the last `Store` handle) drops.
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        self.remote_probe.clear_sessions().await;
        self.broadcaster.close_all().await;
        info!("engine shut down");
    }
}

fn non_empty_or(candidate: &str, fallback: &str) -> String {
    if candidate.is_empty() {
        fallback.to_string()
    } else {
        candidate.to_string()
    }
}

fn primary_interface_ip() -> Option<String> {
    let networks = sysinfo::Networks::new_with_refreshed_list();
    networks
        .iter()
        .filter(|(name, _)| !name.starts_with("lo"))
        .find_map(|(_, data)| {
            data.ip_networks()
                .iter()
                .find(|n| matches!(n.addr, IpAddr::V4(_)))
                .map(|n| n.addr.to_string())
        })
}

fn seconds_until_next_2am() -> u64 {
    use chrono::{Local, NaiveTime, TimeZone};

    let now = Local::now();
    let target_time = NaiveTime::from_hms_opt(2, 0, 0).expect("valid constant time");
    let mut target = now.date_naive().and_time(target_time);
    if now.naive_local() >= target {
        target += chrono::Duration::days(1);
    }
    let target = Local.from_local_datetime(&target).single().unwrap_or(now);
    (target - now).num_seconds().max(0) as u64
}
