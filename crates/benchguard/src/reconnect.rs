//! Reconnection of equipment that dropped off the bus.

use std::fmt::Display;
use std::future::Future;

use tracing::{info, warn};

use benchguard_common::{EquipmentId, ReconnectConfig};

use crate::retry::Backoff;

/// Retries a connect operation with exponential backoff.
///
/// The outcome is a plain `bool`: `false` means the equipment stays offline,
/// which callers treat as a recoverable state rather than an error.
#[derive(Clone, Debug)]
pub struct ReconnectionSupervisor {
    config: ReconnectConfig,
}

impl ReconnectionSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Calls `connect` up to `max_attempts` times.
    ///
    /// Attempt `k > 0` first sleeps `base_delay * backoff_multiplier^k`; the
    /// first attempt runs immediately.
    pub async fn attempt_reconnect<F, Fut, E>(&self, equipment_id: &EquipmentId, mut connect: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        if !self.config.enabled {
            info!("Reconnection disabled, leaving {} offline", equipment_id);
            return false;
        }

        let backoff = Backoff::new(self.config.base_delay(), self.config.backoff_multiplier);
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff.delay(attempt)).await;
            }

            info!(
                "Reconnecting {} (attempt {}/{})",
                equipment_id,
                attempt + 1,
                self.config.max_attempts
            );
            match connect().await {
                Ok(()) => {
                    info!("Reconnected {} on attempt {}", equipment_id, attempt + 1);
                    return true;
                }
                Err(err) => {
                    info!("Reconnect attempt {} for {} failed: {}", attempt + 1, equipment_id, err);
                }
            }
        }

        warn!(
            "Giving up on {} after {} reconnect attempts; equipment remains offline",
            equipment_id, self.config.max_attempts
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn supervisor(max_attempts: u32) -> ReconnectionSupervisor {
        ReconnectionSupervisor::new(ReconnectConfig {
            enabled: true,
            max_attempts,
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let ok = supervisor(3)
            .attempt_reconnect(&EquipmentId::new("psu-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("no carrier")
            })
            .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // no sleep before the first attempt, then 2s and 4s
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_success() {
        let calls = AtomicU32::new(0);

        let ok = supervisor(5)
            .attempt_reconnect(&EquipmentId::new("psu-1"), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 1 { Ok(()) } else { Err("busy") }
            })
            .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let calls = AtomicU32::new(0);
        let supervisor = ReconnectionSupervisor::new(ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        });

        let ok = supervisor
            .attempt_reconnect(&EquipmentId::new("psu-1"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            })
            .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
