use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::crypto;
use super::models::{
    Alert, ConfigRow, Device, DeviceStatus, MetricSample, MetricType, NetworkInterface, NewMetric,
    ScanRecord, StoreStats, SystemInfo,
};
use super::Database;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("encryption error: {0}")]
    Crypto(#[from] anyhow::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// A single network interface reading, as produced by a probe, ready to be
/// persisted via `replace_interfaces`.
#[derive(Debug, Clone)]
pub struct NewInterface {
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

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub device_id: Option<String>,
    pub acknowledged: Option<bool>,
    pub active_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggPeriod {
    Hour,
    Day,
}

impl AggPeriod {
    fn strftime_fmt(&self) -> &'static str {
        match self {
            AggPeriod::Hour => "%Y-%m-%dT%H:00:00",
            AggPeriod::Day => "%Y-%m-%dT00:00:00",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricBucket {
    pub bucket_start: String,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: i64,
}

/// Durable storage for devices, metrics, alerts, scan history, and
/// configuration. All writes go through `&self.db.pool`; sqlx serializes
/// writers on SQLite internally.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    encryption_key: Option<String>,
}

impl Store {
    pub fn new(db: Database, encryption_key: Option<String>) -> Self {
        Self { db, encryption_key }
    }

    fn encrypt_community(&self, community: &str) -> Result<String, StoreError> {
        match &self.encryption_key {
            Some(key) => Ok(crypto::encrypt(community, key)?),
            None => Ok(community.to_string()),
        }
    }

    fn decrypt_community(&self, stored: &str) -> String {
        match &self.encryption_key {
            Some(key) => crypto::decrypt(stored, key).unwrap_or_else(|_| stored.to_string()),
            None => stored.to_string(),
        }
    }

    fn decorate(&self, mut device: Device) -> Device {
        device.community = self.decrypt_community(&device.community);
        device
    }

    // ---- devices ----

    pub async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        let existing_first_seen: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT first_seen FROM devices WHERE id = ?")
                .bind(&device.id)
                .fetch_optional(&self.db.pool)
                .await?;

        let first_seen = existing_first_seen.unwrap_or(device.first_seen);
        let community_enc = self.encrypt_community(&device.community)?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO devices (id, ip, hostname, description, location, contact, community, status, first_seen, last_seen) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               ip = excluded.ip, hostname = excluded.hostname, description = excluded.description, \
               location = excluded.location, contact = excluded.contact, community = excluded.community, \
               status = excluded.status, last_seen = excluded.last_seen",
        )
        .bind(&device.id)
        .bind(&device.ip)
        .bind(&device.hostname)
        .bind(&device.description)
        .bind(&device.location)
        .bind(&device.contact)
        .bind(&community_enc)
        .bind(&device.status)
        .bind(first_seen)
        .bind(now)
        .execute(&self.db.pool)
        .await?;

        Ok(())
    }

    pub async fn set_device_status(&self, id: &str, status: DeviceStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE devices SET status = ?, last_seen = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    pub async fn get_device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        let row: Option<Device> = sqlx::query_as("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row.map(|d| self.decorate(d)))
    }

    pub async fn get_device_by_ip(&self, ip: &str) -> Result<Option<Device>, StoreError> {
        let row: Option<Device> = sqlx::query_as("SELECT * FROM devices WHERE ip = ?")
            .bind(ip)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row.map(|d| self.decorate(d)))
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let rows: Vec<Device> = sqlx::query_as("SELECT * FROM devices ORDER BY ip")
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows.into_iter().map(|d| self.decorate(d)).collect())
    }

    pub async fn delete_device(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("DELETE FROM metrics WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM system_info WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM network_interfaces WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM alerts WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- metrics ----

    pub async fn insert_metric(&self, device_id: &str, m: &NewMetric) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO metrics (device_id, metric_type, value, unit, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(m.metric_type.as_str())
        .bind(m.value)
        .bind(m.unit.as_str())
        .bind(Utc::now())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Insert a batch of metrics for one device atomically — all rows commit
    /// together or none do.
    pub async fn insert_metrics(
        &self,
        device_id: &str,
        samples: &[NewMetric],
    ) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.pool.begin().await?;
        let now = Utc::now();
        for m in samples {
            sqlx::query(
                "INSERT INTO metrics (device_id, metric_type, value, unit, timestamp) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(device_id)
            .bind(m.metric_type.as_str())
            .bind(m.value)
            .bind(m.unit.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn latest_metrics(
        &self,
        device_id: &str,
        types: Option<&[MetricType]>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let all: Vec<MetricSample> = sqlx::query_as(
            "SELECT m.* FROM metrics m \
             INNER JOIN (SELECT metric_type, MAX(timestamp) AS ts FROM metrics WHERE device_id = ? GROUP BY metric_type) latest \
             ON m.metric_type = latest.metric_type AND m.timestamp = latest.ts \
             WHERE m.device_id = ?",
        )
        .bind(device_id)
        .bind(device_id)
        .fetch_all(&self.db.pool)
        .await?;

        match types {
            Some(types) => {
                let wanted: Vec<&'static str> = types.iter().map(|t| t.as_str()).collect();
                Ok(all
                    .into_iter()
                    .filter(|m| wanted.contains(&m.metric_type.as_str()))
                    .collect())
            }
            None => Ok(all),
        }
    }

    pub async fn metrics_history(
        &self,
        device_id: &str,
        metric_type: MetricType,
        window_hours: i64,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let since = Utc::now() - Duration::hours(window_hours);
        let rows: Vec<MetricSample> = sqlx::query_as(
            "SELECT * FROM metrics WHERE device_id = ? AND metric_type = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(device_id)
        .bind(metric_type.as_str())
        .bind(since)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    pub async fn metrics_aggregate(
        &self,
        device_id: &str,
        metric_type: MetricType,
        period: AggPeriod,
    ) -> Result<Vec<MetricBucket>, StoreError> {
        let rows: Vec<(String, f64, f64, f64, i64)> = sqlx::query_as(&format!(
            "SELECT strftime('{fmt}', timestamp) AS bucket, AVG(value), MIN(value), MAX(value), COUNT(*) \
             FROM metrics WHERE device_id = ? AND metric_type = ? \
             GROUP BY bucket ORDER BY bucket ASC",
            fmt = period.strftime_fmt()
        ))
        .bind(device_id)
        .bind(metric_type.as_str())
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(bucket_start, avg, min, max, sample_count)| MetricBucket {
                bucket_start,
                avg,
                min,
                max,
                sample_count,
            })
            .collect())
    }

    pub async fn insert_system_info(
        &self,
        device_id: &str,
        uptime: i64,
        processes: i64,
        users: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_info (device_id, uptime, processes, users, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(device_id)
        .bind(uptime)
        .bind(processes)
        .bind(users)
        .bind(Utc::now())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_system_info(&self, device_id: &str) -> Result<Option<SystemInfo>, StoreError> {
        let row: Option<SystemInfo> = sqlx::query_as(
            "SELECT * FROM system_info WHERE device_id = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    // ---- interfaces ----

    /// Atomically replace the interface snapshot for a device: delete the
    /// old rows and insert the new ones in one transaction.
    pub async fn replace_interfaces(
        &self,
        device_id: &str,
        list: &[NewInterface],
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("DELETE FROM network_interfaces WHERE device_id = ?")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        for iface in list {
            sqlx::query(
                "INSERT INTO network_interfaces \
                 (device_id, if_index, name, description, if_type, speed, admin_status, oper_status, in_octets, out_octets, timestamp) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(device_id)
            .bind(iface.index)
            .bind(&iface.name)
            .bind(&iface.description)
            .bind(&iface.interface_type)
            .bind(iface.speed)
            .bind(&iface.admin_status)
            .bind(&iface.oper_status)
            .bind(iface.in_octets)
            .bind(iface.out_octets)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_interfaces(&self, device_id: &str) -> Result<Vec<NetworkInterface>, StoreError> {
        let rows: Vec<NetworkInterface> =
            sqlx::query_as("SELECT * FROM network_interfaces WHERE device_id = ? ORDER BY if_index")
                .bind(device_id)
                .fetch_all(&self.db.pool)
                .await?;
        Ok(rows)
    }

    // ---- alerts ----

    pub async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO alerts \
             (id, device_id, device_ip, alert_type, severity, message, acknowledged, acknowledged_by, acknowledged_at, created_at, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&alert.id)
        .bind(&alert.device_id)
        .bind(&alert.device_ip)
        .bind(&alert.alert_type)
        .bind(&alert.severity)
        .bind(&alert.message)
        .bind(alert.acknowledged)
        .bind(&alert.acknowledged_by)
        .bind(alert.acknowledged_at)
        .bind(alert.created_at)
        .bind(alert.resolved_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>, StoreError> {
        let row: Option<Alert> = sqlx::query_as("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row)
    }

    pub async fn ack_alert(&self, id: &str, who: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE alerts SET acknowledged = 1, acknowledged_by = ?, acknowledged_at = ? \
             WHERE id = ? AND resolved_at IS NULL",
        )
        .bind(who)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("active alert {id}")));
        }
        Ok(())
    }

    pub async fn resolve_alert(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE alerts SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("active alert {id}")));
        }
        Ok(())
    }

    pub async fn delete_alert(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        let mut sql = String::from("SELECT * FROM alerts WHERE 1=1");
        if filter.device_id.is_some() {
            sql.push_str(" AND device_id = ?");
        }
        if let Some(ack) = filter.acknowledged {
            sql.push_str(if ack {
                " AND acknowledged = 1"
            } else {
                " AND acknowledged = 0"
            });
        }
        if filter.active_only {
            sql.push_str(" AND resolved_at IS NULL");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
            if filter.offset.is_some() {
                sql.push_str(" OFFSET ?");
            }
        }

        let mut query = sqlx::query_as::<_, Alert>(&sql);
        if let Some(device_id) = &filter.device_id {
            query = query.bind(device_id);
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
            if let Some(offset) = filter.offset {
                query = query.bind(offset);
            }
        }
        let rows = query.fetch_all(&self.db.pool).await?;
        Ok(rows)
    }

    /// Active alerts (`resolved_at IS NULL`), used to hydrate the in-memory
    /// active set on startup.
    pub async fn load_active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
        self.list_alerts(&AlertFilter {
            active_only: true,
            ..Default::default()
        })
        .await
    }

    // ---- scan history ----

    pub async fn append_scan_history(&self, record: &ScanRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scan_history (scan_range, total_ips, discovered_hosts, duration_ms, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.scan_range)
        .bind(record.total_ips)
        .bind(record.discovered_hosts)
        .bind(record.duration_ms)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    pub async fn list_scan_history(&self, limit: i64) -> Result<Vec<ScanRecord>, StoreError> {
        let rows: Vec<ScanRecord> = sqlx::query_as(
            "SELECT * FROM scan_history ORDER BY completed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    // ---- configuration ----

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM configuration WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(value)
    }

    pub async fn list_config(&self) -> Result<Vec<ConfigRow>, StoreError> {
        let rows: Vec<ConfigRow> = sqlx::query_as("SELECT * FROM configuration ORDER BY key")
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }

    pub async fn set_config(&self, key: &str, value: &str, description: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO configuration (key, value, description) VALUES (?, ?, COALESCE(?, '')) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    // ---- maintenance ----

    /// Delete metrics/system_info older than `retention_days`, interface
    /// snapshots older than 1 day, and resolved alerts older than 7 days.
    pub async fn cleanup(&self, retention_days: i64) -> Result<(), StoreError> {
        let metric_cutoff = Utc::now() - Duration::days(retention_days);
        let interface_cutoff = Utc::now() - Duration::days(1);
        let alert_cutoff = Utc::now() - Duration::days(7);

        sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
            .bind(metric_cutoff)
            .execute(&self.db.pool)
            .await?;
        sqlx::query("DELETE FROM system_info WHERE timestamp < ?")
            .bind(metric_cutoff)
            .execute(&self.db.pool)
            .await?;
        sqlx::query("DELETE FROM network_interfaces WHERE timestamp < ?")
            .bind(interface_cutoff)
            .execute(&self.db.pool)
            .await?;
        sqlx::query("DELETE FROM alerts WHERE resolved_at IS NOT NULL AND resolved_at < ?")
            .bind(alert_cutoff)
            .execute(&self.db.pool)
            .await?;

        Ok(())
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let devices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.db.pool)
            .await?;
        let metrics: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.db.pool)
            .await?;
        let system_info: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM system_info")
            .fetch_one(&self.db.pool)
            .await?;
        let network_interfaces: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM network_interfaces")
            .fetch_one(&self.db.pool)
            .await?;
        let alerts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.db.pool)
            .await?;
        let scan_history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_history")
            .fetch_one(&self.db.pool)
            .await?;
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.db.pool)
            .await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.db.pool)
            .await?;

        Ok(StoreStats {
            devices,
            metrics,
            system_info,
            network_interfaces,
            alerts,
            scan_history,
            page_count,
            page_size,
        })
    }
}

/// Mint a fresh opaque alert id. Ids are never reused, so a plain `INSERT`
/// never conflicts — dedup happens one layer up, in `AlertEngine`.
pub fn new_alert_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewMetric, Unit};

    fn sample_device(id: &str, ip: &str) -> Device {
        let now = Utc::now();
        Device {
            id: id.to_string(),
            ip: ip.to_string(),
            hostname: "host".into(),
            description: String::new(),
            location: String::new(),
            contact: String::new(),
            community: "public".into(),
            status: DeviceStatus::Unknown.as_str().into(),
            first_seen: now,
            last_seen: now,
        }
    }

    async fn store() -> Store {
        Store::new(Database::test_db().await, None)
    }

    #[tokio::test]
    async fn upsert_then_get_device_round_trips() {
        let s = store().await;
        let d = sample_device("dev1", "192.168.1.1");
        s.upsert_device(&d).await.unwrap();

        let got = s.get_device("dev1").await.unwrap().unwrap();
        assert_eq!(got.ip, "192.168.1.1");
        assert_eq!(got.community, "public");
    }

    #[tokio::test]
    async fn upsert_preserves_first_seen_on_update() {
        let s = store().await;
        let mut d = sample_device("dev1", "192.168.1.1");
        s.upsert_device(&d).await.unwrap();
        let first = s.get_device("dev1").await.unwrap().unwrap().first_seen;

        d.first_seen = Utc::now() + Duration::days(1); // should be ignored
        d.hostname = "renamed".into();
        s.upsert_device(&d).await.unwrap();

        let got = s.get_device("dev1").await.unwrap().unwrap();
        assert_eq!(got.hostname, "renamed");
        assert_eq!(got.first_seen, first);
    }

    #[tokio::test]
    async fn get_device_by_ip_finds_match() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        let got = s.get_device_by_ip("10.0.0.5").await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn delete_device_cascades_metrics_and_alerts() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        s.insert_metric(
            "dev1",
            &NewMetric {
                metric_type: MetricType::CpuUsage,
                value: 10.0,
                unit: Unit::Percent,
            },
        )
        .await
        .unwrap();

        s.delete_device("dev1").await.unwrap();

        assert!(s.get_device("dev1").await.unwrap().is_none());
        let history = s
            .metrics_history("dev1", MetricType::CpuUsage, 24)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn insert_metrics_batch_is_atomic() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();

        let samples = vec![
            NewMetric { metric_type: MetricType::CpuUsage, value: 10.0, unit: Unit::Percent },
            NewMetric { metric_type: MetricType::MemoryUsage, value: 20.0, unit: Unit::Percent },
        ];
        s.insert_metrics("dev1", &samples).await.unwrap();

        let latest = s.latest_metrics("dev1", None).await.unwrap();
        assert_eq!(latest.len(), 2);
    }

    #[tokio::test]
    async fn latest_metrics_returns_most_recent_per_type() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();

        s.insert_metric("dev1", &NewMetric { metric_type: MetricType::CpuUsage, value: 10.0, unit: Unit::Percent })
            .await
            .unwrap();
        s.insert_metric("dev1", &NewMetric { metric_type: MetricType::CpuUsage, value: 50.0, unit: Unit::Percent })
            .await
            .unwrap();

        let latest = s.latest_metrics("dev1", None).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, 50.0);
    }

    #[tokio::test]
    async fn metrics_aggregate_buckets_by_hour() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();

        for v in [10.0, 20.0, 30.0, 40.0] {
            s.insert_metric("dev1", &NewMetric { metric_type: MetricType::CpuUsage, value: v, unit: Unit::Percent })
                .await
                .unwrap();
        }

        let buckets = s
            .metrics_aggregate("dev1", MetricType::CpuUsage, AggPeriod::Hour)
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].sample_count, 4);
        assert_eq!(buckets[0].avg, 25.0);
        assert_eq!(buckets[0].min, 10.0);
        assert_eq!(buckets[0].max, 40.0);
    }

    #[tokio::test]
    async fn replace_interfaces_is_atomic_delete_then_insert() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();

        let first = vec![NewInterface {
            index: 1,
            name: "eth0".into(),
            description: String::new(),
            interface_type: "ethernetCsmacd".into(),
            speed: 1_000_000_000,
            admin_status: "up".into(),
            oper_status: "up".into(),
            in_octets: 0,
            out_octets: 0,
        }];
        s.replace_interfaces("dev1", &first).await.unwrap();
        assert_eq!(s.list_interfaces("dev1").await.unwrap().len(), 1);

        s.replace_interfaces("dev1", &[]).await.unwrap();
        assert_eq!(s.list_interfaces("dev1").await.unwrap().len(), 0);
    }

    fn sample_alert(id: &str, device_id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            device_id: device_id.to_string(),
            device_ip: "10.0.0.5".into(),
            alert_type: "cpu".into(),
            severity: "warning".into(),
            message: "cpu high".into(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn alert_lifecycle_ack_then_resolve() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        let alert = sample_alert("a1", "dev1");
        s.insert_alert(&alert).await.unwrap();

        s.ack_alert("a1", "operator").await.unwrap();
        let got = s.get_alert("a1").await.unwrap().unwrap();
        assert!(got.acknowledged);
        assert!(got.is_active());

        s.resolve_alert("a1").await.unwrap();
        let got = s.get_alert("a1").await.unwrap().unwrap();
        assert!(!got.is_active());
    }

    #[tokio::test]
    async fn resolve_unknown_alert_errors_not_found() {
        let s = store().await;
        let err = s.resolve_alert("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_alerts_active_only_excludes_resolved() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        s.insert_alert(&sample_alert("a1", "dev1")).await.unwrap();
        s.insert_alert(&sample_alert("a2", "dev1")).await.unwrap();
        s.resolve_alert("a2").await.unwrap();

        let active = s
            .list_alerts(&AlertFilter { active_only: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a1");
    }

    #[tokio::test]
    async fn list_alerts_respects_limit_and_offset() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        for (i, id) in ["a1", "a2", "a3"].iter().enumerate() {
            let mut alert = sample_alert(id, "dev1");
            alert.created_at = Utc::now() + chrono::Duration::seconds(i as i64);
            s.insert_alert(&alert).await.unwrap();
        }

        let page1 = s
            .list_alerts(&AlertFilter { limit: Some(2), offset: Some(0), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page1[0].id, "a3");
        assert_eq!(page1[1].id, "a2");

        let page2 = s
            .list_alerts(&AlertFilter { limit: Some(2), offset: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].id, "a1");
    }

    #[tokio::test]
    async fn config_round_trip() {
        let s = store().await;
        s.set_config("refresh_interval", "15", None).await.unwrap();
        let v = s.get_config("refresh_interval").await.unwrap();
        assert_eq!(v.as_deref(), Some("15"));
    }

    #[tokio::test]
    async fn config_seeded_defaults_present() {
        let s = store().await;
        let all = s.list_config().await.unwrap();
        assert!(all.iter().any(|c| c.key == "cpu_warning_threshold"));
    }

    #[tokio::test]
    async fn cleanup_removes_old_metrics() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        s.insert_metric("dev1", &NewMetric { metric_type: MetricType::CpuUsage, value: 1.0, unit: Unit::Percent })
            .await
            .unwrap();

        // retention_days = 0 means "older than now", which the just-inserted row is not,
        // so nothing is removed; this checks cleanup runs without touching fresh data.
        s.cleanup(30).await.unwrap();
        let latest = s.latest_metrics("dev1", None).await.unwrap();
        assert_eq!(latest.len(), 1);
    }

    #[tokio::test]
    async fn community_round_trips_through_encryption() {
        let db = Database::test_db().await;
        let s = Store::new(db, Some("a-key-with-entropy".into()));
        let mut d = sample_device("dev1", "10.0.0.5");
        d.community = "super-secret".into();
        s.upsert_device(&d).await.unwrap();

        let got = s.get_device("dev1").await.unwrap().unwrap();
        assert_eq!(got.community, "super-secret");
    }

    #[tokio::test]
    async fn stats_reports_row_counts() {
        let s = store().await;
        s.upsert_device(&sample_device("dev1", "10.0.0.5")).await.unwrap();
        let stats = s.stats().await.unwrap();
        assert_eq!(stats.devices, 1);
        assert!(stats.approx_bytes() >= 0);
    }
}
