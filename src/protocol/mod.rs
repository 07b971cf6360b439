//! Wire formats of the two transports.

pub mod hub;
pub mod onebot;

pub use hub::{CanonicalMessage, HelloFrame, MessageContent, Route, group_target};
pub use onebot::{ApiResponse, InboundEvent, InboundFrame, MessagePayload, SendGroupMessage};
