//! Engine configuration, loadable from the environment.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Environment prefix for per-source credentials:
/// `FLOWLINE_CREDENTIAL_<SOURCE>` becomes the credential for the
/// lowercased source name.
const CREDENTIAL_PREFIX: &str = "FLOWLINE_CREDENTIAL_";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root directory holding one subdirectory per source.
    pub data_dir: PathBuf,
    /// Per-source credentials, keyed by lowercase source name.
    pub credentials: HashMap<String, String>,
    /// Global cap on concurrently processed sites.
    pub workers: usize,
    /// Per-source cap on in-flight upstream calls.
    pub per_source_fetch_limit: usize,
    /// A site is due when it was last synced strictly more than this
    /// many days ago.
    pub tolerance_days: i64,
    /// Ignore staleness and refetch from the epoch.
    pub force: bool,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl SyncConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            credentials: HashMap::new(),
            workers: 1,
            per_source_fetch_limit: 1,
            tolerance_days: 1,
            force: false,
            http_timeout_secs: 20,
            user_agent: format!("flowline/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::new(
            env::var("FLOWLINE_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        if let Some(workers) = read_env_parsed("FLOWLINE_WORKERS") {
            config.workers = workers;
        }
        if let Some(limit) = read_env_parsed("FLOWLINE_SOURCE_FETCH_LIMIT") {
            config.per_source_fetch_limit = limit;
        }
        if let Some(tolerance) = read_env_parsed("FLOWLINE_TOLERANCE_DAYS") {
            config.tolerance_days = tolerance;
        }
        if let Some(timeout) = read_env_parsed("FLOWLINE_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = timeout;
        }
        if let Ok(force) = env::var("FLOWLINE_FORCE") {
            config.force = matches!(force.as_str(), "1" | "true" | "yes");
        }
        if let Ok(agent) = env::var("FLOWLINE_USER_AGENT") {
            config.user_agent = agent;
        }

        for (key, value) in env::vars() {
            if let Some(source) = key.strip_prefix(CREDENTIAL_PREFIX) {
                if !source.is_empty() && !value.is_empty() {
                    config
                        .credentials
                        .insert(source.to_ascii_lowercase(), value);
                }
            }
        }

        config
    }

    pub fn credential_for(&self, source: &str) -> Option<&str> {
        self.credentials
            .get(&source.to_ascii_lowercase())
            .map(String::as_str)
    }
}

fn read_env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_lookup_is_case_insensitive_on_source() {
        let mut config = SyncConfig::new("/tmp/data");
        config
            .credentials
            .insert("ukea".to_string(), "k-123".to_string());
        assert_eq!(config.credential_for("ukea"), Some("k-123"));
        assert_eq!(config.credential_for("UKEA"), Some("k-123"));
        assert_eq!(config.credential_for("usgs"), None);
    }

    #[test]
    fn defaults_are_sane() {
        let config = SyncConfig::new("/tmp/data");
        assert!(config.workers >= 1);
        assert!(config.per_source_fetch_limit >= 1);
        assert_eq!(config.tolerance_days, 1);
        assert!(!config.force);
    }
}
