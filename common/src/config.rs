//! Runtime settings loaded from the environment.

use std::time::Duration;

const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Process-level settings that are not part of the probe YAML files.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name used in log records.
    pub service_name: String,
    /// Shared deadline for one test's dispatch to all sinks.
    pub dispatch_timeout_secs: u64,
    /// Timeout for opening a database connection.
    pub connect_timeout_secs: u64,
    /// Timeout for a single HTTP write to a time-series sink.
    pub http_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "collector".to_string(),
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl AppConfig {
    /// Loads settings from environment variables, falling back to defaults.
    ///
    /// Recognised variables: `DISPATCH_TIMEOUT_SECS`, `CONNECT_TIMEOUT_SECS`,
    /// `HTTP_TIMEOUT_SECS`.
    pub fn load_with_service(service_name: &str) -> Self {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    fn from_lookup(service_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str, default: u64| match lookup(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(v) if v > 0 => v,
                _ => {
                    tracing::warn!(key, value = %raw, default, "ignoring invalid timeout setting");
                    default
                }
            },
        };
        Self {
            service_name: service_name.to_string(),
            dispatch_timeout_secs: secs("DISPATCH_TIMEOUT_SECS", DEFAULT_DISPATCH_TIMEOUT_SECS),
            connect_timeout_secs: secs("CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            http_timeout_secs: secs("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let cfg = AppConfig::from_lookup("collector", |_| None);
        assert_eq!(cfg.dispatch_timeout(), Duration::from_secs(1800));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides_and_garbage() {
        let cfg = AppConfig::from_lookup("collector", |key| match key {
            "DISPATCH_TIMEOUT_SECS" => Some("5".to_string()),
            "CONNECT_TIMEOUT_SECS" => Some("abc".to_string()),
            "HTTP_TIMEOUT_SECS" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(cfg.dispatch_timeout_secs, 5);
        assert_eq!(cfg.connect_timeout_secs, 10);
        assert_eq!(cfg.http_timeout_secs, 60);
    }
}
