// Companion channel: an origin-restricted, newline-delimited JSON link
// between the host UI and an external companion that drives it.

pub mod bridge;
pub mod client;
pub mod protocol;
pub mod server;

pub use bridge::{CommandBridge, CommandHandler};
pub use client::CompanionClient;
pub use protocol::{Command, Envelope, InboundMessage, OutboundMessage};
pub use server::{CompanionServer, ConnectionId};
