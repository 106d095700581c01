use std::env;
use std::time::Duration;

use remote::BackoffPolicy;
use serde::Deserialize;

/// Tunables for the persistence gateway and connection bring-up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Repeated loads inside this window are answered from cache.
    pub load_cooldown_ms: u64,
    /// Backend loads allowed per `load_window_ms`.
    pub load_ceiling: u32,
    pub load_window_ms: u64,
    pub backoff: BackoffPolicy,
    /// Prepended to every local storage key.
    pub storage_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            load_cooldown_ms: 1_000,
            load_ceiling: 50,
            load_window_ms: 60 * 60 * 1_000,
            backoff: BackoffPolicy::default(),
            storage_prefix: String::new(),
        }
    }
}

impl SyncConfig {
    /// Reads `PARCEL_*` overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source; unset or unparsable
    /// values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let num = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };
        let backoff = BackoffPolicy {
            initial_delay: Duration::from_millis(num(
                "PARCEL_BACKOFF_INITIAL_MS",
                defaults.backoff.initial_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(num(
                "PARCEL_BACKOFF_MAX_MS",
                defaults.backoff.max_delay.as_millis() as u64,
            )),
            multiplier: num("PARCEL_BACKOFF_MULTIPLIER", defaults.backoff.multiplier as u64) as u32,
            max_attempts: num("PARCEL_BACKOFF_ATTEMPTS", defaults.backoff.max_attempts as u64) as u32,
        };
        Self {
            load_cooldown_ms: num("PARCEL_LOAD_COOLDOWN_MS", defaults.load_cooldown_ms),
            load_ceiling: num("PARCEL_LOAD_CEILING", defaults.load_ceiling as u64) as u32,
            load_window_ms: num("PARCEL_LOAD_WINDOW_MS", defaults.load_window_ms),
            backoff,
            storage_prefix: lookup("PARCEL_STORAGE_PREFIX").unwrap_or(defaults.storage_prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SyncConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = [
            ("PARCEL_LOAD_CEILING", "10"),
            ("PARCEL_LOAD_COOLDOWN_MS", "nope"),
            ("PARCEL_BACKOFF_ATTEMPTS", " 3 "),
            ("PARCEL_STORAGE_PREFIX", "user1:"),
        ]
        .into_iter()
        .collect();
        let cfg = SyncConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.load_ceiling, 10);
        assert_eq!(cfg.load_cooldown_ms, 1_000);
        assert_eq!(cfg.backoff.max_attempts, 3);
        assert_eq!(cfg.backoff.initial_delay, Duration::from_millis(500));
        assert_eq!(cfg.storage_prefix, "user1:");
    }

    #[test]
    fn deserializes_partial_json() {
        let cfg: SyncConfig =
            serde_json::from_str(r#"{"load_ceiling": 5, "backoff": {"max_attempts": 1}}"#).unwrap();
        assert_eq!(cfg.load_ceiling, 5);
        assert_eq!(cfg.load_window_ms, 3_600_000);
        assert_eq!(cfg.backoff.max_attempts, 1);
    }
}
