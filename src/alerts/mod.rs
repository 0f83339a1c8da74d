use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use crate::broadcast::Broadcaster;
use crate::db::models::{Alert, AlertType, Severity};
use crate::db::store::{new_alert_id, Store, StoreError};

#[derive(Debug, Clone)]
pub struct AlertStats {
    pub total_active: usize,
    pub acknowledged: usize,
    pub unacknowledged: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub by_device: HashMap<String, usize>,
    pub resolved_last_24h: usize,
}

/// An alert held in the active set, decorated with the two fields the spec
/// keeps in memory only and never persists: how many times the same
/// condition has re-fired, and when it last did.
#[derive(Debug, Clone)]
struct ActiveAlert {
    alert: Alert,
    occurrence_count: u64,
    last_occurrence: DateTime<Utc>,
}

/// The canonical active-alert set. Owns dedup, lifecycle transitions and
/// threshold-driven auto-resolution; Store persists the same facts but this
/// is the source of truth for "is this condition already alerting".
#[derive(Clone)]
pub struct AlertEngine {
    active: Arc<Mutex<HashMap<String, ActiveAlert>>>,
    history: Arc<Mutex<Vec<Alert>>>,
    store: Store,
    broadcaster: Broadcaster,
}

impl AlertEngine {
    pub fn new(store: Store, broadcaster: Broadcaster) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(Vec::new())),
            store,
            broadcaster,
        }
    }

    /// Hydrates the active set from the Store on startup.
    pub async fn load(&self) -> Result<(), StoreError> {
        let rows = self.store.load_active_alerts().await?;
        let mut active = self.active.lock().await;
        for alert in rows {
            active.insert(
                alert.id.clone(),
                ActiveAlert {
                    last_occurrence: alert.created_at,
                    occurrence_count: 1,
                    alert,
                },
            );
        }
        Ok(())
    }

    /// Creates a new alert, or bumps the occurrence count of a matching
    /// active one. Never produces two simultaneously-active alerts for the
    /// same `(device_id, type, severity)`.
    pub async fn create(
        &self,
        device_id: &str,
        device_ip: &str,
        alert_type: AlertType,
        severity: Severity,
        message: &str,
    ) -> Alert {
        let mut active = self.active.lock().await;

        if let Some(existing) = active.values_mut().find(|a| {
            a.alert.device_id == device_id
                && a.alert.alert_type == alert_type.as_str()
                && a.alert.severity == severity.as_str()
                && !a.alert.acknowledged
                && a.alert.resolved_at.is_none()
        }) {
            existing.alert.message = message.to_string();
            existing.occurrence_count += 1;
            existing.last_occurrence = Utc::now();
            return existing.alert.clone();
        }

        let now = Utc::now();
        let alert = Alert {
            id: new_alert_id(),
            device_id: device_id.to_string(),
            device_ip: device_ip.to_string(),
            alert_type: alert_type.as_str().to_string(),
            severity: severity.as_str().to_string(),
            message: message.to_string(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: now,
            resolved_at: None,
        };

        if let Err(e) = self.store.insert_alert(&alert).await {
            warn!(alert_id = %alert.id, error = %e, "failed to persist new alert, keeping in memory only");
        }
        active.insert(
            alert.id.clone(),
            ActiveAlert {
                alert: alert.clone(),
                occurrence_count: 1,
                last_occurrence: now,
            },
        );
        drop(active);

        self.broadcaster
            .publish("alert_created", json!({"alert": &alert}))
            .await;
        alert
    }

    /// Number of times this alert's underlying condition has re-fired since
    /// it was first created, and when it last did. `None` if the alert is
    /// not currently active.
    pub async fn occurrence(&self, id: &str) -> Option<(u64, DateTime<Utc>)> {
        self.active
            .lock()
            .await
            .get(id)
            .map(|a| (a.occurrence_count, a.last_occurrence))
    }

    pub async fn ack(&self, id: &str, who: &str) -> Result<Alert, StoreError> {
        let mut active = self.active.lock().await;
        let entry = match active.get_mut(id) {
            Some(entry) => entry,
            None => {
                drop(active);
                return Err(self.not_active_error(id).await);
            }
        };
        if entry.alert.acknowledged {
            return Err(StoreError::Conflict(format!("alert {id} already acknowledged")));
        }
        entry.alert.acknowledged = true;
        entry.alert.acknowledged_by = Some(who.to_string());
        entry.alert.acknowledged_at = Some(Utc::now());
        let snapshot = entry.alert.clone();
        drop(active);

        self.store.ack_alert(id, who).await?;
        self.broadcaster
            .publish("alert_acknowledged", json!({"alert": &snapshot}))
            .await;
        Ok(snapshot)
    }

    pub async fn resolve(&self, id: &str) -> Result<Alert, StoreError> {
        let mut active = self.active.lock().await;
        let entry = match active.remove(id) {
            Some(entry) => entry,
            None => {
                drop(active);
                return Err(self.not_active_error(id).await);
            }
        };
        let mut alert = entry.alert;
        alert.resolved_at = Some(Utc::now());
        drop(active);

        self.store.resolve_alert(id).await?;
        self.history.lock().await.push(alert.clone());
        self.broadcaster
            .publish("alert_resolved", json!({"alert": &alert}))
            .await;
        Ok(alert)
    }

    /// Disambiguates a missing-from-active-set id: `Conflict` if the alert
    /// exists in the Store but is already resolved, `NotFound` otherwise.
    async fn not_active_error(&self, id: &str) -> StoreError {
        match self.store.get_alert(id).await {
            Ok(Some(alert)) if alert.resolved_at.is_some() => {
                StoreError::Conflict(format!("alert {id} already resolved"))
            }
            _ => StoreError::NotFound(format!("alert {id} not active")),
        }
    }

    /// Acknowledge a batch of alert ids, continuing past individual failures
    /// (unknown id, already acknowledged) and reporting one result per id.
    pub async fn bulk_ack(&self, ids: &[String], who: &str) -> Vec<Result<Alert, StoreError>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.ack(id, who).await);
        }
        results
    }

    /// Resolve a batch of alert ids, continuing past individual failures.
    pub async fn bulk_resolve(&self, ids: &[String]) -> Vec<Result<Alert, StoreError>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.resolve(id).await);
        }
        results
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.active.lock().await.remove(id);
        self.store.delete_alert(id).await?;
        self.broadcaster.publish("alert_deleted", json!({"id": id})).await;
        Ok(())
    }

    /// Resolves alerts whose underlying condition has cleared.
    /// `cpu`/`memory`/`disk` resolve once the reading drops back under the
    /// warning threshold; `offline` resolves unconditionally (the caller
    /// only invokes this after a successful poll).
    pub async fn auto_resolve(&self, device_id: &str, alert_type: AlertType, current_value: f64, warning_threshold: f64) {
        let candidates: Vec<String> = {
            let active = self.active.lock().await;
            active
                .values()
                .filter(|a| a.alert.device_id == device_id && a.alert.alert_type == alert_type.as_str())
                .map(|a| a.alert.id.clone())
                .collect()
        };

        for id in candidates {
            let should_resolve = match alert_type {
                AlertType::Offline => true,
                _ => current_value < warning_threshold,
            };
            if should_resolve {
                if let Err(e) = self.resolve(&id).await {
                    warn!(alert_id = %id, error = %e, "failed to auto-resolve alert");
                }
            }
        }
    }

    pub async fn stats(&self) -> AlertStats {
        let active = self.active.lock().await;
        let history = self.history.lock().await;
        let cutoff = Utc::now() - Duration::hours(24);

        let mut by_severity = HashMap::new();
        let mut by_type = HashMap::new();
        let mut by_device = HashMap::new();
        let mut acknowledged = 0;

        for entry in active.values() {
            let alert = &entry.alert;
            *by_severity.entry(alert.severity.clone()).or_insert(0) += 1;
            *by_type.entry(alert.alert_type.clone()).or_insert(0) += 1;
            *by_device.entry(alert.device_id.clone()).or_insert(0) += 1;
            if alert.acknowledged {
                acknowledged += 1;
            }
        }

        let resolved_last_24h = history
            .iter()
            .filter(|a| a.resolved_at.map(|t| t >= cutoff).unwrap_or(false))
            .count();

        AlertStats {
            total_active: active.len(),
            acknowledged,
            unacknowledged: active.len() - acknowledged,
            by_severity,
            by_type,
            by_device,
            resolved_last_24h,
        }
    }

    /// Active alerts for one device, newest state as held in memory.
    pub async fn for_device(&self, device_id: &str) -> Vec<Alert> {
        self.active
            .lock()
            .await
            .values()
            .filter(|a| a.alert.device_id == device_id)
            .map(|a| a.alert.clone())
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    pub async fn get(&self, id: &str) -> Option<Alert> {
        self.active.lock().await.get(id).map(|a| a.alert.clone())
    }
}

pub fn resolved_within(alert: &Alert, window: Duration, now: DateTime<Utc>) -> bool {
    alert.resolved_at.map(|t| now - t <= window).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn engine() -> AlertEngine {
        AlertEngine::new(Store::new(Database::test_db().await, None), Broadcaster::new())
    }

    #[tokio::test]
    async fn create_dedups_matching_active_alert() {
        let engine = engine().await;
        let a = engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu high")
            .await;
        let b = engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu still high")
            .await;
        assert_eq!(a.id, b.id);
        assert_eq!(engine.active_count().await, 1);
        assert_eq!(engine.occurrence(&a.id).await.unwrap().0, 2);
    }

    #[tokio::test]
    async fn concurrent_create_dedups_to_one_alert_with_occurrence_count() {
        let engine = engine().await;
        let results = futures::future::join_all((0..10).map(|_| {
            let engine = engine.clone();
            async move {
                engine
                    .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu high")
                    .await
            }
        }))
        .await;

        let first_id = &results[0].id;
        assert!(results.iter().all(|a| &a.id == first_id));
        assert_eq!(engine.active_count().await, 1);
        assert!(engine.occurrence(first_id).await.unwrap().0 >= 10);
    }

    #[tokio::test]
    async fn create_distinguishes_by_severity() {
        let engine = engine().await;
        engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "m1")
            .await;
        engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Critical, "m2")
            .await;
        assert_eq!(engine.active_count().await, 2);
    }

    #[tokio::test]
    async fn ack_then_resolve_lifecycle() {
        let engine = engine().await;
        let alert = engine
            .create("dev-1", "10.0.0.5", AlertType::Memory, Severity::Warning, "mem high")
            .await;

        let acked = engine.ack(&alert.id, "operator").await.unwrap();
        assert!(acked.acknowledged);

        let resolved = engine.resolve(&alert.id).await.unwrap();
        assert!(resolved.resolved_at.is_some());
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn ack_twice_errors_as_conflict() {
        let engine = engine().await;
        let alert = engine
            .create("dev-1", "10.0.0.5", AlertType::Disk, Severity::Warning, "disk high")
            .await;
        engine.ack(&alert.id, "operator").await.unwrap();
        let err = engine.ack(&alert.id, "operator").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn resolve_twice_errors_as_conflict() {
        let engine = engine().await;
        let alert = engine
            .create("dev-1", "10.0.0.5", AlertType::Disk, Severity::Warning, "disk high")
            .await;
        engine.resolve(&alert.id).await.unwrap();
        let err = engine.resolve(&alert.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn ack_unknown_alert_errors_as_not_found() {
        let engine = engine().await;
        let err = engine.ack("nonexistent", "operator").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn auto_resolve_cpu_below_warning() {
        let engine = engine().await;
        engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu high")
            .await;
        engine.auto_resolve("dev-1", AlertType::Cpu, 10.0, 80.0).await;
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn auto_resolve_cpu_still_above_warning_keeps_active() {
        let engine = engine().await;
        engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu high")
            .await;
        engine.auto_resolve("dev-1", AlertType::Cpu, 90.0, 80.0).await;
        assert_eq!(engine.active_count().await, 1);
    }

    #[tokio::test]
    async fn auto_resolve_offline_is_unconditional() {
        let engine = engine().await;
        engine
            .create("dev-1", "10.0.0.5", AlertType::Offline, Severity::Critical, "unreachable")
            .await;
        engine.auto_resolve("dev-1", AlertType::Offline, 0.0, 0.0).await;
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn stats_counts_by_severity_and_device() {
        let engine = engine().await;
        engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "a")
            .await;
        engine
            .create("dev-2", "10.0.0.6", AlertType::Disk, Severity::Critical, "b")
            .await;
        let stats = engine.stats().await;
        assert_eq!(stats.total_active, 2);
        assert_eq!(stats.by_device.len(), 2);
        assert_eq!(*stats.by_severity.get("warning").unwrap(), 1);
    }

    #[tokio::test]
    async fn load_hydrates_from_store() {
        let store = Store::new(Database::test_db().await, None);
        let alert = Alert {
            id: new_alert_id(),
            device_id: "dev-1".into(),
            device_ip: "10.0.0.5".into(),
            alert_type: AlertType::Cpu.as_str().into(),
            severity: Severity::Warning.as_str().into(),
            message: "cpu high".into(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.insert_alert(&alert).await.unwrap();

        let engine = AlertEngine::new(store, Broadcaster::new());
        engine.load().await.unwrap();
        assert_eq!(engine.active_count().await, 1);
    }

    #[tokio::test]
    async fn bulk_ack_handles_mix_of_valid_and_unknown_ids() {
        let engine = engine().await;
        let a = engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu high")
            .await;
        let b = engine
            .create("dev-1", "10.0.0.5", AlertType::Memory, Severity::Warning, "mem high")
            .await;

        let results = engine
            .bulk_ack(&[a.id.clone(), "missing".into(), b.id.clone()], "operator")
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert!(engine.get(&a.id).await.unwrap().acknowledged);
        assert!(engine.get(&b.id).await.unwrap().acknowledged);
    }

    #[tokio::test]
    async fn bulk_resolve_removes_all_from_active_set() {
        let engine = engine().await;
        let a = engine
            .create("dev-1", "10.0.0.5", AlertType::Cpu, Severity::Warning, "cpu high")
            .await;
        let b = engine
            .create("dev-1", "10.0.0.5", AlertType::Disk, Severity::Warning, "disk high")
            .await;

        let results = engine.bulk_resolve(&[a.id.clone(), b.id.clone()]).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(engine.active_count().await, 0);
    }
}
