//! hubbridge: relays chat between OneBot group chats and a GRUniChat hub.
//!
//! Group messages become hub `chat` messages, `!!command` lines become hub
//! `command` messages, and hub chat and events are rendered back into the
//! configured groups. Commands aimed at every hub client need an explicit
//! confirmation from the sender first.

pub mod bridge;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod safety;

pub use bridge::Bridge;
pub use config::Config;
pub use error::{Error, Result};
