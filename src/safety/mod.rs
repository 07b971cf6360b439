//! Access control for inbound IM traffic.
//!
//! - [`MessageFilter`] decides which events the bridge looks at at all.
//! - [`CommandPermissions`] decides who may issue `!!command` messages.

mod filter;
mod permissions;

pub use filter::{DropReason, MessageFilter};
pub use permissions::CommandPermissions;
