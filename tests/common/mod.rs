#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use civitai_link_bridge::companion::{CompanionClient, OutboundMessage};
use civitai_link_bridge::config::Config;
use civitai_link_bridge::error::FetchError;
use civitai_link_bridge::status::{ConnectionStatus, LinkBackend, RECONNECT_SUCCESS};

pub const ORIGIN: &str = "http://localhost:3000";

/// Backend that replays queued link statuses (repeating the last one) and
/// counts requests
pub struct ScriptedBackend {
    statuses: Mutex<VecDeque<ConnectionStatus>>,
    reconnect_message: Mutex<String>,
    pages: HashMap<String, String>,
    status_calls: Mutex<usize>,
    reconnect_calls: Mutex<usize>,
}

impl ScriptedBackend {
    pub fn new(statuses: Vec<ConnectionStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            reconnect_message: Mutex::new(RECONNECT_SUCCESS.to_string()),
            pages: HashMap::new(),
            status_calls: Mutex::new(0),
            reconnect_calls: Mutex::new(0),
        }
    }

    pub fn with_pages(mut self, pages: &[(&str, &str)]) -> Self {
        self.pages = pages
            .iter()
            .map(|(model, page)| (model.to_string(), page.to_string()))
            .collect();
        self
    }

    pub fn set_reconnect_message(&self, message: &str) {
        *self.reconnect_message.lock().unwrap() = message.to_string();
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }

    pub fn reconnect_calls(&self) -> usize {
        *self.reconnect_calls.lock().unwrap()
    }
}

impl LinkBackend for ScriptedBackend {
    fn link_status(&self) -> Result<ConnectionStatus, FetchError> {
        *self.status_calls.lock().unwrap() += 1;
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        next.ok_or(FetchError::Status(503))
    }

    fn alpha_link_status(&self) -> Result<bool, FetchError> {
        Ok(false)
    }

    fn reconnect_link(&self) -> Result<String, FetchError> {
        *self.reconnect_calls.lock().unwrap() += 1;
        Ok(self.reconnect_message.lock().unwrap().clone())
    }

    fn page_index(&self) -> Result<HashMap<String, String>, FetchError> {
        Ok(self.pages.clone())
    }
}

pub fn status(primary: bool, alpha: bool) -> ConnectionStatus {
    ConnectionStatus {
        primary_connected: primary,
        alpha_connected: alpha,
    }
}

/// Config with short timings and a socket inside `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.bridge.socket_path = dir.join("companion.sock");
    config.bridge.origin = ORIGIN.to_string();
    config.bridge.pump_interval_ms = 10;
    config.timing.element_timeout_ms = 300;
    config.timing.poll_tick_ms = 10;
    config.timing.settle_delay_ms = 300;
    config.timing.remote_settle_delay_ms = 20;
    config.timing.status_interval_ms = 50;
    config.status.enabled = false;
    config.decorate.enabled = false;
    config
}

/// Connect as the companion and wait until the host trusts the connection
pub async fn trusted_companion(config: &Config) -> CompanionClient {
    let mut client = CompanionClient::connect(&config.bridge.socket_path, ORIGIN)
        .await
        .unwrap();
    client.hello().await.unwrap();
    // Let the pump accept the connection and read the hello
    tokio::time::sleep(Duration::from_millis(100)).await;
    client
}

/// Next notice from the host, or None if nothing arrives in `wait`
pub async fn recv_within(client: &mut CompanionClient, wait: Duration) -> Option<OutboundMessage> {
    tokio::time::timeout(wait, client.recv())
        .await
        .ok()
        .map(|reply| reply.unwrap())
}

/// Poll `condition` until it holds or `wait` runs out
pub async fn eventually(wait: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn shared(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Arc<dyn LinkBackend>) {
    let backend = Arc::new(backend);
    let dyn_backend: Arc<dyn LinkBackend> = backend.clone();
    (backend, dyn_backend)
}
