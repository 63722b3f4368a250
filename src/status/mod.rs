// Backend link status: HTTP access to the status endpoints, the per-link
// state machine, and the poller that mirrors it into the host UI.

pub mod backend;
pub mod poller;
pub mod state;

pub use backend::{HttpBackend, LinkBackend, RECONNECT_SUCCESS};
pub use poller::{StatusIndicators, StatusPoller};
pub use state::{ConnectionStatus, LinkState, LinkTracker};
