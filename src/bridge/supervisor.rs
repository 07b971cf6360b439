//! Connect retries and the optional reconnect supervisor.
//!
//! [`connect_with_retry`] is what startup uses for the OneBot side. When
//! `bridge.auto_reconnect` is on, [`spawn_supervisor`] watches a
//! connection's state and runs the same retry loop whenever it drops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channels::{ConnectionManager, FrameHandler, shutdown_requested};
use crate::config::{HubConfig, OneBotConfig};
use crate::error::TransportError;

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&OneBotConfig> for RetryPolicy {
    fn from(config: &OneBotConfig) -> Self {
        Self {
            interval: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

impl From<&HubConfig> for RetryPolicy {
    fn from(config: &HubConfig) -> Self {
        Self {
            interval: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Try to connect up to `policy.max_attempts` times (at least once),
/// sleeping `policy.interval` between attempts.
///
/// Returns [`TransportError::Cancelled`] if `shutdown` fires while waiting.
pub async fn connect_with_retry(
    connection: &ConnectionManager,
    policy: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if *shutdown.borrow() {
            return Err(TransportError::Cancelled {
                name: connection.name().to_string(),
            });
        }

        tracing::info!(transport = connection.name(), attempt, max_attempts, "Connecting");
        match connection.connect(shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::error!(
                    transport = connection.name(),
                    attempt,
                    error = %e,
                    "Connect attempt failed"
                );
            }
        }

        if attempt < max_attempts {
            tracing::info!(transport = connection.name(), delay = ?policy.interval, "Retrying");
            tokio::select! {
                _ = tokio::time::sleep(policy.interval) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    return Err(TransportError::Cancelled {
                        name: connection.name().to_string(),
                    });
                }
            }
        }
    }

    Err(TransportError::RetriesExhausted {
        name: connection.name().to_string(),
        attempts: max_attempts,
    })
}

/// Reconnect `connection` whenever it goes down, until shutdown or until a
/// whole retry budget is spent. `handler` is (re)registered before each
/// reconnect attempt.
pub fn spawn_supervisor(
    connection: Arc<ConnectionManager>,
    policy: RetryPolicy,
    handler: Option<Arc<dyn FrameHandler>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = connection.subscribe_state();
        tracing::debug!(transport = connection.name(), "Reconnect supervisor started");

        loop {
            let went_down = tokio::select! {
                down = async { state.wait_for(|up| !*up).await.is_ok() } => down,
                _ = shutdown_requested(&mut shutdown) => false,
            };
            if !went_down || *shutdown.borrow() {
                break;
            }

            tracing::warn!(transport = connection.name(), "Connection down, reconnecting");
            if let Some(handler) = &handler {
                connection.set_inbound_handler(Arc::clone(handler)).await;
            }
            match connect_with_retry(&connection, policy, shutdown.clone()).await {
                Ok(()) => tracing::info!(transport = connection.name(), "Reconnected"),
                Err(TransportError::Cancelled { .. }) => break,
                Err(e) => {
                    tracing::error!(
                        transport = connection.name(),
                        error = %e,
                        "Giving up on reconnect"
                    );
                    connection.clear_inbound_handler().await;
                    break;
                }
            }
        }

        tracing::debug!(transport = connection.name(), "Reconnect supervisor stopped");
    })
}
