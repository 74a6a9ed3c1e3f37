//! Protocol module - wire definitions for the mode switch and PING exchange.

pub mod constants;
pub mod ping;
pub mod request;

pub use constants::*;
pub use ping::{PingError, PingPacket};
pub use request::{ModeSwitchRequest, RequestDirection, RequestKind, RequestRecipient};
