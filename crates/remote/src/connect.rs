use std::time::Duration;

use serde::Deserialize;

use crate::RemoteStore;

/// Exponential backoff for remote-client bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: u32,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Connection state of the remote tier for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Bring-up has not finished yet.
    Connecting,
    Online,
    /// Bring-up gave up; the session stays local-only.
    Offline { attempts: u32 },
    /// No remote store configured.
    Disabled,
}

impl ConnectionStatus {
    pub fn is_online(self) -> bool {
        matches!(self, ConnectionStatus::Online)
    }
}

/// Pings `store` until it answers or the attempt ceiling is reached.
///
/// Never loops past `policy.max_attempts`; exhaustion yields
/// [`ConnectionStatus::Offline`] rather than an error.
pub async fn connect_with_backoff(store: &dyn RemoteStore, policy: &BackoffPolicy) -> ConnectionStatus {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match store.ping().await {
            Ok(()) => {
                tracing::info!("remote store {} connected (attempt {attempt})", store.name());
                return ConnectionStatus::Online;
            }
            Err(e) => {
                tracing::warn!(
                    "remote store {} unreachable (attempt {attempt}/{attempts}): {e}",
                    store.name()
                );
                if attempt < attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }
    tracing::warn!("remote store {} offline for this session", store.name());
    ConnectionStatus::Offline { attempts }
}
