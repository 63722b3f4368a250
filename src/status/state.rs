use serde::{Deserialize, Serialize};

/// Both link flags as reported by `/civitai/v1/link-status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    #[serde(rename = "connected", default)]
    pub primary_connected: bool,
    #[serde(default)]
    pub alpha_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl From<bool> for LinkState {
    fn from(connected: bool) -> Self {
        if connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }
}

/// Last observed state of one link. Transitions only on change, so feeding
/// the same value twice is a no-op.
#[derive(Debug, Default)]
pub struct LinkTracker {
    state: LinkState,
}

impl LinkTracker {
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Record an observation; returns the new value if it differs from the
    /// previous one.
    pub fn observe(&mut self, connected: bool) -> Option<bool> {
        let next = LinkState::from(connected);
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(connected)
    }
}
