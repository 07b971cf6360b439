//! The bridge orchestrator.
//!
//! Owns both connections and wires them through the converter:
//!
//! ```text
//!  OneBot ──frame──► OneBotFrameHandler ──► MessageConverter::inbound ──► hub
//!  hub    ──frame──► HubFrameHandler    ──► MessageConverter::outbound ──► OneBot groups
//! ```
//!
//! OneBot is the primary side: startup fails if it cannot be reached. The
//! hub is optional; without it the bridge runs OneBot-only and every hub
//! publish is a no-op.

pub mod confirmation;
pub mod converter;
pub mod formatter;
pub mod supervisor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

pub use confirmation::{ConfirmationManager, SWEEP_INTERVAL};
pub use converter::{MessageConverter, OutboundReport};
pub use formatter::Formatter;
pub use supervisor::{RetryPolicy, connect_with_retry, spawn_supervisor};

use crate::channels::{
    ConnectionManager, ConnectionRole, Connector, Endpoint, FrameHandler, GroupSender,
    HubPublisher, OneBotSender, WsConnector, shutdown_requested,
};
use crate::config::Config;
use crate::error::{PayloadError, Result};
use crate::protocol::{CanonicalMessage, HelloFrame, InboundFrame};

/// Transport names used in logs and errors.
pub const ONEBOT_TRANSPORT: &str = "onebot";
pub const HUB_TRANSPORT: &str = "grunichat";

/// Handles frames from the OneBot gateway.
struct OneBotFrameHandler {
    converter: Arc<MessageConverter>,
    hub: Arc<dyn HubPublisher>,
}

#[async_trait]
impl FrameHandler for OneBotFrameHandler {
    async fn handle_frame(&self, frame: String) {
        tracing::trace!(frame = %frame, "OneBot frame");

        let event = match InboundFrame::parse(&frame) {
            Ok(InboundFrame::Event(event)) => event,
            Ok(InboundFrame::Response(response)) => {
                if response.is_ok() {
                    tracing::debug!(echo = ?response.echo, "OneBot action succeeded");
                } else {
                    tracing::warn!(
                        status = %response.status,
                        retcode = response.retcode,
                        echo = ?response.echo,
                        "OneBot action failed"
                    );
                }
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Dropping OneBot frame");
                return;
            }
        };

        let Some(message) = self.converter.inbound(&event).await else {
            return;
        };
        if let Err(e) = self.hub.publish(&message).await {
            tracing::error!(error = %e, "Failed to forward message to hub");
        }
    }
}

/// Handles frames from the hub.
struct HubFrameHandler {
    converter: Arc<MessageConverter>,
}

#[async_trait]
impl FrameHandler for HubFrameHandler {
    async fn handle_frame(&self, frame: String) {
        tracing::trace!(frame = %frame, "Hub frame");

        match serde_json::from_str::<CanonicalMessage>(&frame) {
            Ok(message) => {
                self.converter.outbound(&message).await;
            }
            Err(e) => tracing::error!(error = %PayloadError::from(e), "Dropping hub frame"),
        }
    }
}

/// Runs the bridge between one OneBot gateway and one hub.
pub struct Bridge {
    config: Config,
    onebot: Arc<ConnectionManager>,
    hub: Arc<ConnectionManager>,
    confirmations: Arc<ConfirmationManager>,
    onebot_handler: Arc<dyn FrameHandler>,
    hub_handler: Arc<dyn FrameHandler>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Bridge over real WebSocket connections.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Bridge over the given connector, used for both sides.
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        let onebot_endpoint = Endpoint::new(ONEBOT_TRANSPORT, config.onebot.websocket_url.clone())
            .with_bearer_token(config.onebot.access_token.clone());
        let hub_endpoint = Endpoint::new(HUB_TRANSPORT, config.grunichat.url.clone());

        let onebot = Arc::new(ConnectionManager::new(
            onebot_endpoint,
            ConnectionRole::Primary,
            Arc::clone(&connector),
        ));
        let hub = Arc::new(
            ConnectionManager::new(hub_endpoint, ConnectionRole::Secondary, connector)
                .with_handshake(&HelloFrame::new(&config.grunichat.client_id))?,
        );

        let im: Arc<dyn GroupSender> = Arc::new(OneBotSender::new(Arc::clone(&onebot)));
        let publisher: Arc<dyn HubPublisher> = Arc::clone(&hub) as Arc<dyn HubPublisher>;

        let confirmations = Arc::new(ConfirmationManager::new(
            Formatter::new(config.format.group_message_format.clone()),
            Arc::clone(&im),
            Arc::clone(&publisher),
        ));
        let converter = Arc::new(MessageConverter::new(&config, Arc::clone(&confirmations), im));

        let onebot_handler: Arc<dyn FrameHandler> = Arc::new(OneBotFrameHandler {
            converter: Arc::clone(&converter),
            hub: publisher,
        });
        let hub_handler: Arc<dyn FrameHandler> = Arc::new(HubFrameHandler { converter });

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            onebot,
            hub,
            confirmations,
            onebot_handler,
            hub_handler,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn onebot(&self) -> &Arc<ConnectionManager> {
        &self.onebot
    }

    pub fn hub(&self) -> &Arc<ConnectionManager> {
        &self.hub
    }

    pub fn confirmations(&self) -> &Arc<ConfirmationManager> {
        &self.confirmations
    }

    /// Connect both sides and start the background tasks.
    ///
    /// Fails only when OneBot cannot be reached within its retry budget.
    /// Handlers are registered before connecting so frames the peer sends
    /// right after the handshake are not lost.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("Starting bridge");

        self.onebot
            .set_inbound_handler(Arc::clone(&self.onebot_handler))
            .await;
        let connected = connect_with_retry(
            &self.onebot,
            RetryPolicy::from(&self.config.onebot),
            self.shutdown_tx.subscribe(),
        )
        .await;
        if let Err(e) = connected {
            self.onebot.clear_inbound_handler().await;
            return Err(e.into());
        }

        self.hub
            .set_inbound_handler(Arc::clone(&self.hub_handler))
            .await;
        if let Err(e) = self.hub.connect(self.shutdown_tx.subscribe()).await {
            tracing::warn!(error = %e, "Hub unavailable, continuing OneBot-only");
            self.hub.clear_inbound_handler().await;
        }

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_sweeper());

        if self.config.bridge.auto_reconnect {
            tasks.push(spawn_supervisor(
                Arc::clone(&self.onebot),
                RetryPolicy::from(&self.config.onebot),
                Some(Arc::clone(&self.onebot_handler)),
                self.shutdown_tx.subscribe(),
            ));
            tasks.push(spawn_supervisor(
                Arc::clone(&self.hub),
                RetryPolicy::from(&self.config.grunichat),
                Some(Arc::clone(&self.hub_handler)),
                self.shutdown_tx.subscribe(),
            ));
        }

        tracing::info!(
            hub_connected = self.hub.is_connected(),
            auto_reconnect = self.config.bridge.auto_reconnect,
            "Bridge started"
        );
        Ok(())
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let confirmations = Arc::clone(&self.confirmations);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick completes immediately.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let removed = confirmations.sweep_expired().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired confirmations");
                        }
                    }
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
        })
    }

    /// Start, then run until Ctrl-C, SIGTERM or [`Bridge::trigger_shutdown`].
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = wait_for_signal() => tracing::info!("Signal received, shutting down"),
            _ = shutdown_requested(&mut shutdown) => {
                tracing::info!("Shutdown requested");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Ask a running bridge to stop.
    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Stop every task and close both connections. Safe to call more than
    /// once and before [`Bridge::start`].
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down bridge");
        self.shutdown_tx.send_replace(true);

        for connection in [&self.onebot, &self.hub] {
            if let Err(e) = connection.close().await {
                tracing::debug!(
                    transport = connection.name(),
                    error = %e,
                    "Close reported an error"
                );
            }
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "Background task ended abnormally");
            }
        }

        // Handlers hold the converter, which holds the OneBot connection.
        // Cleared last so a stopping supervisor cannot re-register one.
        self.onebot.clear_inbound_handler().await;
        self.hub.clear_inbound_handler().await;

        tracing::info!("Bridge shutdown complete");
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
