//! Socket channels.
//!
//! Each side of the bridge is one [`ConnectionManager`] over a
//! [`Connector`]. The manager owns the socket and runs the read task; the
//! rest of the crate only sees the contracts in [`sender`].
//!
//! ```text
//!   ┌──────────────┐   frames   ┌───────────────────┐
//!   │  Connector   │ ─────────► │ ConnectionManager │ ──► FrameHandler
//!   │ (WsConnector)│ ◄───────── │   (read task)     │
//!   └──────────────┘   send()   └───────────────────┘
//!                                        ▲
//!                          OneBotSender / HubPublisher
//! ```

pub mod connection;
pub mod sender;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionRole, FrameHandler, shutdown_requested};
pub use sender::{GroupSender, HubPublisher, OneBotSender};
pub use transport::{Connector, Endpoint, FrameReader, FrameWriter, WsConnector};
