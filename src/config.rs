use anyhow::Result;

/// Process-level bootstrap settings — the handful of values that must exist
/// before the Store is reachable. Everything else (refresh interval,
/// thresholds, timeouts) lives in the `configuration` table once the Store
/// is open, per the config keys table.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database URL.
    pub database_url: String,

    /// Encryption key for the `community` column at rest (env:
    /// `DB_ENCRYPTION_KEY`). When set, `community` is AES-256-GCM encrypted.
    /// When absent, stored plaintext.
    pub db_encryption_key: Option<String>,

    /// Default IP range to scan on first run if none is configured
    /// (env: `DEFAULT_SCAN_RANGE`). Optional convenience only.
    pub default_scan_range: Option<String>,

    /// Tracing env-filter directive override (env: `RUST_LOG`). Falls back
    /// to a sensible default when unset.
    pub log_filter: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./lanwatch.db".into()),
            db_encryption_key: std::env::var("DB_ENCRYPTION_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            default_scan_range: std::env::var("DEFAULT_SCAN_RANGE").ok(),
            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "lanwatch=info".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal `AppConfig` with all fields defaulted. Override
    /// specific fields in each test via struct update syntax.
    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            db_encryption_key: None,
            default_scan_range: None,
            log_filter: "lanwatch=info".into(),
        }
    }

    #[test]
    fn default_database_url_is_relative_file() {
        let cfg = base_config();
        assert!(cfg.database_url.starts_with("sqlite"));
    }

    #[test]
    fn encryption_key_absent_by_default() {
        let cfg = base_config();
        assert!(cfg.db_encryption_key.is_none());
    }

    #[test]
    fn encryption_key_present_when_set() {
        let cfg = AppConfig {
            db_encryption_key: Some("a-key-with-entropy".into()),
            ..base_config()
        };
        assert_eq!(cfg.db_encryption_key.as_deref(), Some("a-key-with-entropy"));
    }
}
