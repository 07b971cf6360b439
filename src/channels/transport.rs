//! Socket transport.
//!
//! The connection manager only sees the three traits below. The production
//! implementation is a thin wrapper around `tokio-tungstenite`; tests plug
//! in in-memory transports.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::TransportError;

/// Default bound on the opening handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Human-readable transport name used in logs and errors.
    pub name: String,
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub bearer_token: Option<SecretString>,
    pub handshake_timeout: Duration,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            bearer_token: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<SecretString>) -> Self {
        self.bearer_token = token;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Opens a connection and returns its two halves.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), TransportError>;
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameWriter: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame and flush. Closing an already-closed connection
    /// may return an error; callers treat that as informational.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of an open connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Next data frame, `None` once the peer has closed the stream.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// `tokio-tungstenite` client connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Box<dyn FrameWriter>, Box<dyn FrameReader>), TransportError> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            name: endpoint.name.clone(),
            reason,
        };

        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_failed(format!("invalid URL {}: {e}", endpoint.url)))?;

        if let Some(token) = &endpoint.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|e| connect_failed(format!("invalid access token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio::time::timeout(
            endpoint.handshake_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| TransportError::HandshakeTimeout {
            name: endpoint.name.clone(),
            timeout: endpoint.handshake_timeout,
        })?
        .map_err(|e| connect_failed(e.to_string()))?;

        let (sink, stream) = stream.split();
        Ok((
            Box::new(WsWriter {
                name: endpoint.name.clone(),
                sink,
            }),
            Box::new(WsReader {
                name: endpoint.name.clone(),
                stream,
            }),
        ))
    }
}

struct WsWriter {
    name: String,
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::SendFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::CloseFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

struct WsReader {
    name: String,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        tracing::debug!(
                            transport = %self.name,
                            code = u16::from(frame.code),
                            reason = %frame.reason,
                            "Peer closed connection"
                        );
                    }
                    return None;
                }
                // Pings are answered by tungstenite on the next read or write.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => {
                    return Some(Err(TransportError::ReadFailed {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }
}
