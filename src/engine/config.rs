use std::collections::HashMap;

use tracing::warn;

use crate::db::store::{Store, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub cpu: ThresholdPair,
    pub memory: ThresholdPair,
    pub disk: ThresholdPair,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: ThresholdPair { warning: 75.0, critical: 90.0 },
            memory: ThresholdPair { warning: 80.0, critical: 95.0 },
            disk: ThresholdPair { warning: 85.0, critical: 95.0 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub refresh_interval_s: u64,
    pub default_community: String,
    pub scan_timeout_ms: u64,
    pub snmp_timeout_ms: u64,
    pub max_history_days: i64,
    pub thresholds: Thresholds,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            refresh_interval_s: 10,
            default_community: "public".into(),
            scan_timeout_ms: 3000,
            snmp_timeout_ms: 5000,
            max_history_days: 30,
            thresholds: Thresholds::default(),
        }
    }
}

fn clamp_u64(value: u64, min: u64, max: u64, key: &str) -> u64 {
    if value < min || value > max {
        warn!(key, value, min, max, "configuration value out of range, clamping");
        value.clamp(min, max)
    } else {
        value
    }
}

fn clamp_i64(value: i64, min: i64, max: i64, key: &str) -> i64 {
    if value < min || value > max {
        warn!(key, value, min, max, "configuration value out of range, clamping");
        value.clamp(min, max)
    } else {
        value
    }
}

fn clamp_percent(value: f64, key: &str) -> f64 {
    if !(1.0..=100.0).contains(&value) {
        warn!(key, value, "threshold out of [1,100], clamping");
        value.clamp(1.0, 100.0)
    } else {
        value
    }
}

/// Reads every recognized configuration key from the Store, applying the
/// range clamps and the `warning < critical` invariant documented for each
/// metric pair. A pair that violates the invariant keeps its prior
/// (default or previously loaded) value and logs the rejection.
pub async fn load(store: &Store) -> Result<RuntimeConfig, StoreError> {
    let mut cfg = RuntimeConfig::default();
    let rows = store.list_config().await?;
    let map: HashMap<String, String> = rows.into_iter().map(|r| (r.key, r.value)).collect();

    if let Some(v) = map.get("refresh_interval").and_then(|v| v.parse::<u64>().ok()) {
        cfg.refresh_interval_s = clamp_u64(v, 5, 300, "refresh_interval");
    }
    if let Some(v) = map.get("default_community") {
        cfg.default_community = v.clone();
    }
    if let Some(v) = map.get("scan_timeout").and_then(|v| v.parse::<u64>().ok()) {
        cfg.scan_timeout_ms = clamp_u64(v, 1000, 30000, "scan_timeout");
    }
    if let Some(v) = map.get("snmp_timeout").and_then(|v| v.parse::<u64>().ok()) {
        cfg.snmp_timeout_ms = clamp_u64(v, 1000, 30000, "snmp_timeout");
    }
    if let Some(v) = map.get("max_history_days").and_then(|v| v.parse::<i64>().ok()) {
        cfg.max_history_days = clamp_i64(v, 1, 365, "max_history_days");
    }

    apply_pair(&map, "cpu", &mut cfg.thresholds.cpu);
    apply_pair(&map, "memory", &mut cfg.thresholds.memory);
    apply_pair(&map, "disk", &mut cfg.thresholds.disk);

    Ok(cfg)
}

fn apply_pair(map: &HashMap<String, String>, prefix: &str, pair: &mut ThresholdPair) {
    let warning = map
        .get(&format!("{prefix}_warning_threshold"))
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| clamp_percent(v, "warning_threshold"));
    let critical = map
        .get(&format!("{prefix}_critical_threshold"))
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| clamp_percent(v, "critical_threshold"));

    match (warning, critical) {
        (Some(w), Some(c)) if w < c => {
            pair.warning = w;
            pair.critical = c;
        }
        (Some(w), Some(c)) => {
            warn!(prefix, warning = w, critical = c, "warning >= critical, keeping prior values");
        }
        (Some(w), None) if w < pair.critical => pair.warning = w,
        (None, Some(c)) if c > pair.warning => pair.critical = c,
        (Some(_), None) | (None, Some(_)) => {
            warn!(prefix, "updated threshold would violate warning < critical, keeping prior values");
        }
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn load_applies_seeded_defaults() {
        let store = Store::new(Database::test_db().await, None);
        let cfg = load(&store).await.unwrap();
        assert_eq!(cfg.refresh_interval_s, 10);
        assert_eq!(cfg.thresholds.cpu.warning, 75.0);
        assert_eq!(cfg.thresholds.cpu.critical, 90.0);
    }

    #[tokio::test]
    async fn load_clamps_out_of_range_refresh_interval() {
        let store = Store::new(Database::test_db().await, None);
        store.set_config("refresh_interval", "1000", None).await.unwrap();
        let cfg = load(&store).await.unwrap();
        assert_eq!(cfg.refresh_interval_s, 300);
    }

    #[tokio::test]
    async fn load_rejects_inverted_threshold_pair() {
        let store = Store::new(Database::test_db().await, None);
        store.set_config("cpu_warning_threshold", "95", None).await.unwrap();
        store.set_config("cpu_critical_threshold", "90", None).await.unwrap();
        let cfg = load(&store).await.unwrap();
        // violating pair keeps seeded defaults (75/90)
        assert_eq!(cfg.thresholds.cpu.warning, 75.0);
        assert_eq!(cfg.thresholds.cpu.critical, 90.0);
    }
}
