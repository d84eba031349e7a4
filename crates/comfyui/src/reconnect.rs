//! Exponential-backoff reconnection for backend WebSocket sessions.
//!
//! [`reconnect_loop`] keeps retrying with growing delays until a session
//! is restored or the [`CancellationToken`] fires. The backend stays
//! unreachable for scheduling the whole time.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay sequence for one reconnect episode.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    config: ReconnectConfig,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
        }
    }

    /// Return the delay to wait now and grow the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown_ms = (self.current.as_millis() as f64 * self.config.multiplier) as u64;
        self.current = Duration::from_millis(grown_ms).min(self.config.max_delay);
        delay
    }
}

/// Attempt to reconnect to a backend with exponential backoff.
///
/// Returns `Some(connection)` once a connection succeeds, or `None` if
/// the `cancel` token is triggered first.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    let mut backoff = Backoff::new(config.clone());
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        attempt += 1;

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = client.connect() => result,
        };

        match result {
            Ok(conn) => {
                tracing::info!(
                    backend_id = client.backend_id(),
                    attempt,
                    "Reconnected to ComfyUI",
                );
                return Some(conn);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    backend_id = client.backend_id(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Reconnect attempt failed",
                );
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_clamps() {
        let mut backoff = Backoff::new(ReconnectConfig::default());
        let seen: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn custom_multiplier() {
        let mut backoff = Backoff::new(ReconnectConfig {
            initial_delay: Duration::from_secs(2),
            multiplier: 3.0,
            max_delay: Duration::from_secs(60),
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(6));
        assert_eq!(backoff.next_delay(), Duration::from_secs(18));
    }

    #[tokio::test]
    async fn cancellation_token_stops_reconnect() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = ComfyUIClient::new(1, "ws://localhost:9999".into());
        let result = reconnect_loop(&client, &ReconnectConfig::default(), &cancel).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cancellation_during_backoff_sleep_returns() {
        let cancel = CancellationToken::new();
        let client = ComfyUIClient::new(0, "ws://127.0.0.1:1".into());
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            reconnect_loop(&client, &config, &cancel),
        )
        .await
        .expect("reconnect loop should observe cancellation");
        assert!(result.is_none());
    }
}
