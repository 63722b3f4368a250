use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by host-UI actions and the companion bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The selector matched nothing before the wait budget ran out
    #[error("timed out after {}ms waiting for '{selector}'", timeout.as_millis())]
    Timeout { selector: String, timeout: Duration },

    /// The wait was cancelled through its handle before it finished
    #[error("wait for '{selector}' was cancelled")]
    Cancelled { selector: String },

    #[error("companion bridge is already hooked")]
    AlreadyHooked,

    #[error("invalid prompt parameter: {0}")]
    InvalidPrompt(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}

/// Failures talking to the backend over HTTP.
///
/// These never propagate past the call site: callers degrade them to a
/// neutral result and log.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("could not decode response: {0}")]
    Decode(String),
}
