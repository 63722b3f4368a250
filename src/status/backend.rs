use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::state::ConnectionStatus;
use crate::error::FetchError;

/// Message the reconnect endpoint returns when the link came back
pub const RECONNECT_SUCCESS: &str = "Civitai Link active";

pub const LINK_STATUS_PATH: &str = "civitai/v1/link-status";
pub const ALPHA_LINK_STATUS_PATH: &str = "civitai/v1/alpha-link-status";
pub const RECONNECT_PATH: &str = "civitai/v1/reconnect-link";
pub const PAGE_INDEX_PATH: &str = "civitai/get-mhtml_dict";

/// The backend endpoints the bridge reads. Calls block; async callers go
/// through [`call`].
pub trait LinkBackend: Send + Sync + 'static {
    fn link_status(&self) -> Result<ConnectionStatus, FetchError>;

    fn alpha_link_status(&self) -> Result<bool, FetchError>;

    /// Ask the backend to re-establish the link; returns its message
    fn reconnect_link(&self) -> Result<String, FetchError>;

    /// Saved-page lookup: model path without extension -> saved page filename
    fn page_index(&self) -> Result<HashMap<String, String>, FetchError>;
}

/// Run a blocking backend call off the async threads
pub async fn call<T, F>(backend: &Arc<dyn LinkBackend>, request: F) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnOnce(&dyn LinkBackend) -> Result<T, FetchError> + Send + 'static,
{
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || request(backend.as_ref()))
        .await
        .map_err(|e| FetchError::Transport(format!("backend call aborted: {e}")))?
}

#[derive(Deserialize)]
struct AlphaLinkStatus {
    #[serde(default)]
    connected: bool,
}

#[derive(Deserialize)]
struct ReconnectReply {
    #[serde(default)]
    message: String,
}

/// [`LinkBackend`] over HTTP against the host application
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| FetchError::Transport(format!("invalid base url '{base_url}': {e}")))?;
        // Relative joins would otherwise replace the last path segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent("civlink")
            .build();

        Ok(Self { agent, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::Transport(format!("invalid endpoint '{path}': {e}")))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.endpoint(path)?;
        let response = self.agent.get(url.as_str()).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => FetchError::Status(code),
            ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
        })?;

        response
            .into_json::<T>()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

impl LinkBackend for HttpBackend {
    fn link_status(&self) -> Result<ConnectionStatus, FetchError> {
        self.get_json(LINK_STATUS_PATH)
    }

    fn alpha_link_status(&self) -> Result<bool, FetchError> {
        let reply: AlphaLinkStatus = self.get_json(ALPHA_LINK_STATUS_PATH)?;
        Ok(reply.connected)
    }

    fn reconnect_link(&self) -> Result<String, FetchError> {
        let reply: ReconnectReply = self.get_json(RECONNECT_PATH)?;
        Ok(reply.message)
    }

    fn page_index(&self) -> Result<HashMap<String, String>, FetchError> {
        self.get_json(PAGE_INDEX_PATH)
    }
}
