//! Connection lifecycle manager.
//!
//! One manager owns one socket. It connects on request, optionally sends a
//! handshake frame, and runs a background read task that hands every frame
//! to the registered [`FrameHandler`], awaiting it before reading the next.
//!
//! ```text
//! connect() ──► Connector ──► (FrameWriter, FrameReader)
//!                                  │             │
//!   send() ──► writer (mutex) ◄────┘             ▼
//!                                          read task ──► FrameHandler
//!                                                │
//!                          shutdown signal ──────┘ (stops the loop)
//! ```
//!
//! The two bridge sides differ only in [`ConnectionRole`]: sending on a
//! disconnected primary is an error, sending on a disconnected secondary
//! is a silent no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;

use crate::channels::transport::{Connector, Endpoint, FrameReader, FrameWriter};
use crate::error::TransportError;

/// Receives raw inbound frames.
///
/// Called from the read task; the next frame on the same connection is not
/// read until this returns, so implementations must not wait on anything
/// unbounded.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle_frame(&self, frame: String);
}

/// How a manager treats sends while disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Sends fail with [`TransportError::NotConnected`].
    Primary,
    /// Sends succeed without effect (degraded mode).
    Secondary,
}

type SharedHandler = Arc<RwLock<Option<Arc<dyn FrameHandler>>>>;

/// Writer slot and connected flag, shared by a manager and its read task.
///
/// Every installed writer gets a new generation. Only the holder of the
/// current generation may tear the link down, so a read task that outlives
/// its connection cannot mark a newer one as down.
struct Link {
    writer: Mutex<Option<Box<dyn FrameWriter>>>,
    state: watch::Sender<bool>,
    generation: AtomicU64,
}

impl Link {
    fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            writer: Mutex::new(None),
            state,
            generation: AtomicU64::new(0),
        }
    }

    /// Install the writer of a fresh connection and mark the link up.
    /// Returns the new generation and the writer it replaced.
    async fn install(&self, writer: Box<dyn FrameWriter>) -> (u64, Option<Box<dyn FrameWriter>>) {
        let mut slot = self.writer.lock().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = slot.replace(writer);
        self.state.send_replace(true);
        (generation, previous)
    }

    /// Close the writer and mark the link down.
    ///
    /// With `Some(generation)` nothing happens unless that generation is
    /// still current; `Ok(false)` reports the skip. `None` always tears
    /// down and invalidates the current generation.
    async fn release(&self, generation: Option<u64>) -> Result<bool, TransportError> {
        let mut slot = self.writer.lock().await;
        match generation {
            Some(generation) if self.generation.load(Ordering::SeqCst) != generation => {
                return Ok(false);
            }
            Some(_) => {}
            None => {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
        }

        let closed = match slot.take() {
            Some(mut writer) => writer.close().await,
            None => Ok(()),
        };
        self.state.send_replace(false);
        closed.map(|()| true)
    }
}

/// Owns a single transport connection.
pub struct ConnectionManager {
    endpoint: Endpoint,
    role: ConnectionRole,
    connector: Arc<dyn Connector>,
    /// Sent immediately after every successful connect.
    handshake: Option<String>,
    link: Arc<Link>,
    handler: SharedHandler,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint, role: ConnectionRole, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoint,
            role,
            connector,
            handshake: None,
            link: Arc::new(Link::new()),
            handler: Arc::new(RwLock::new(None)),
            reader_task: Mutex::new(None),
        }
    }

    /// Send `frame` as the first message after each connect.
    pub fn with_handshake<T: Serialize>(mut self, frame: &T) -> Result<Self, TransportError> {
        self.handshake = Some(serde_json::to_string(frame)?);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn is_connected(&self) -> bool {
        *self.link.state.borrow()
    }

    /// Watch the connected flag.
    pub fn subscribe_state(&self) -> watch::Receiver<bool> {
        self.link.state.subscribe()
    }

    /// Register the inbound handler, replacing any previous one.
    pub async fn set_inbound_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write().await = Some(handler);
    }

    /// Drop the inbound handler. Frames received afterwards are discarded.
    pub async fn clear_inbound_handler(&self) {
        *self.handler.write().await = None;
    }

    /// Make one connection attempt.
    ///
    /// On success the manager is connected, the handshake (if any) has been
    /// sent, and a read task runs until the peer closes, a read fails, or
    /// `shutdown` becomes `true`. A previous connection is closed first.
    pub async fn connect(&self, shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        let name = &self.endpoint.name;
        tracing::info!(transport = %name, url = %self.endpoint.url, "Connecting");

        let (mut writer, reader) = self.connector.connect(&self.endpoint).await?;

        if let Some(frame) = &self.handshake {
            tracing::debug!(transport = %name, "Sending handshake frame");
            if let Err(e) = writer.send_text(frame.clone()).await {
                if let Err(close_err) = writer.close().await {
                    tracing::debug!(
                        transport = %name,
                        error = %close_err,
                        "Close after failed handshake"
                    );
                }
                return Err(e);
            }
        }

        let mut task_slot = self.reader_task.lock().await;
        if let Some(previous) = task_slot.take() {
            previous.abort();
        }
        let (generation, previous) = self.link.install(writer).await;
        if let Some(mut previous) = previous {
            if let Err(e) = previous.close().await {
                tracing::debug!(transport = %name, error = %e, "Close of replaced connection");
            }
        }

        *task_slot = Some(tokio::spawn(read_loop(
            name.clone(),
            reader,
            Arc::clone(&self.handler),
            Arc::clone(&self.link),
            generation,
            shutdown,
        )));

        tracing::info!(transport = %name, generation, "Connected");
        Ok(())
    }

    /// Serialize `payload` as JSON and send it.
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(payload)?;
        self.send_text(text).await
    }

    /// Send a pre-encoded text frame.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return self.not_connected();
        }
        let mut guard = self.link.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => writer.send_text(text).await,
            None => self.not_connected(),
        }
    }

    fn not_connected(&self) -> Result<(), TransportError> {
        match self.role {
            ConnectionRole::Primary => Err(TransportError::NotConnected {
                name: self.endpoint.name.clone(),
            }),
            ConnectionRole::Secondary => {
                tracing::debug!(
                    transport = %self.endpoint.name,
                    "Not connected, dropping outbound frame"
                );
                Ok(())
            }
        }
    }

    /// Close the connection. Safe to call when never connected or already
    /// closed.
    pub async fn close(&self) -> Result<(), TransportError> {
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        self.link.release(None).await.map(|_| ())
    }
}

/// Resolves once `shutdown` holds `true` or its sender is gone. Unlike
/// `changed()`, a signal sent before the call is not missed.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn read_loop(
    name: String,
    mut reader: Box<dyn FrameReader>,
    handler: SharedHandler,
    link: Arc<Link>,
    generation: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => {
                tracing::debug!(transport = %name, "Read task stopping on shutdown");
                break;
            }
            frame = reader.recv() => match frame {
                Some(Ok(frame)) => {
                    let current = handler.read().await.clone();
                    match current {
                        Some(h) => h.handle_frame(frame).await,
                        None => tracing::trace!(transport = %name, "No handler, frame dropped"),
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(transport = %name, error = %e, "Read failed, marking down");
                    break;
                }
                None => {
                    tracing::warn!(transport = %name, "Connection closed by peer");
                    break;
                }
            }
        }
    }

    match link.release(Some(generation)).await {
        Ok(true) => {}
        Ok(false) => tracing::debug!(transport = %name, generation, "Stale read task exited"),
        Err(e) => tracing::debug!(transport = %name, error = %e, "Close after read task exit"),
    }
}
