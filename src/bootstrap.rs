// Startup wiring: reads the one-shot launch parameters from the page
// address, runs what they ask for, clears them, and starts the long-lived
// pieces.

use std::sync::Arc;

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use futures::future::join_all;
use url::Url;

use crate::companion::CommandBridge;
use crate::config::Config;
use crate::controller::Controller;
use crate::decorate::CardDecorator;
use crate::error::BridgeError;
use crate::host::HostRoot;
use crate::injector::{ModelRefresher, PromptInjector};
use crate::status::{LinkBackend, StatusPoller};
use crate::timer::TaskHandle;
use crate::waiter::ElementWaiter;

pub const PROMPT_PARAM: &str = "civitai_prompt";
pub const GENERATE_PARAM: &str = "civitai_generate";
pub const REFRESH_MODELS_PARAM: &str = "civitai_refresh_models";
pub const HOOK_CHILD_PARAM: &str = "civitai_hook_child";

const LAUNCH_PARAMS: [&str; 4] = [PROMPT_PARAM, GENERATE_PARAM, REFRESH_MODELS_PARAM, HOOK_CHILD_PARAM];

/// What the page address asked for at load time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub prompt: Option<String>,
    pub generate: bool,
    pub refresh_models: bool,
    pub hook_child: bool,
}

impl LaunchParams {
    pub fn from_url(url: &Url) -> Result<Self, BridgeError> {
        let mut params = LaunchParams::default();
        for (key, value) in url.query_pairs() {
            match &*key {
                PROMPT_PARAM => params.prompt = Some(decode_prompt(&value)?),
                GENERATE_PARAM => params.generate = true,
                REFRESH_MODELS_PARAM => params.refresh_models = true,
                HOOK_CHILD_PARAM => params.hook_child = true,
                _ => {}
            }
        }
        Ok(params)
    }

    pub fn is_empty(&self) -> bool {
        *self == LaunchParams::default()
    }
}

/// Lenient decoder for prompt parameters: padding is optional and stray
/// trailing bits are ignored
const FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a base64 prompt parameter.
///
/// Form decoding turns an unescaped `+` into a space, so spaces are mapped
/// back before decoding. Other ASCII whitespace is ignored.
pub fn decode_prompt(encoded: &str) -> Result<String, BridgeError> {
    let normalized: String = encoded
        .chars()
        .filter(|c| !matches!(c, '\t' | '\n' | '\x0c' | '\r'))
        .map(|c| if c == ' ' { '+' } else { c })
        .collect();
    let bytes = FORGIVING
        .decode(normalized.as_bytes())
        .map_err(|e| BridgeError::InvalidPrompt(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| BridgeError::InvalidPrompt(e.to_string()))
}

/// Encode a prompt the way [`decode_prompt`] expects it
pub fn encode_prompt(prompt: &str) -> String {
    STANDARD.encode(prompt.as_bytes())
}

/// `url` with the launch parameters removed; other parameters survive
pub fn strip_launch_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !LAUNCH_PARAMS.contains(&&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Everything needed to bring the bridge up inside a host page
pub struct Bootstrap {
    config: Config,
    root: Arc<dyn HostRoot>,
    backend: Arc<dyn LinkBackend>,
    bridge: CommandBridge,
}

impl Bootstrap {
    pub fn new(config: Config, root: Arc<dyn HostRoot>, backend: Arc<dyn LinkBackend>) -> Self {
        Self {
            config,
            root,
            backend,
            bridge: CommandBridge::new(),
        }
    }

    pub fn bridge(&self) -> &CommandBridge {
        &self.bridge
    }

    /// Run the launch parameters found in the host's current location, clear
    /// them from the address bar and start the status poller.
    ///
    /// Launch actions run as independent tasks; their failures are logged.
    pub fn launch(self) -> Session {
        let waiter = ElementWaiter::with_tick(Arc::clone(&self.root), self.config.timing.poll_tick());
        let timeout = self.config.timing.element_timeout();
        let injector = PromptInjector::new(
            waiter.clone(),
            self.config.selectors.clone(),
            timeout,
            self.bridge.clone(),
        );
        let refresher = ModelRefresher::new(waiter.clone(), &self.config.selectors.refresh_models, timeout);
        let controller = Arc::new(Controller::new(
            injector.clone(),
            refresher.clone(),
            self.bridge.clone(),
            self.config.timing.remote_settle_delay(),
        ));
        self.bridge.on_command(controller.into_handler());

        let mut tasks = Vec::new();
        let location = self.root.location();
        match Url::parse(&location) {
            Ok(url) => {
                let params = LaunchParams::from_url(&url).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "ignoring launch prompt");
                    launch_flags(&url)
                });
                tracing::debug!(?params, "launch parameters");

                if let Some(prompt) = params.prompt {
                    let settle = self.config.timing.settle_delay();
                    let generate = params.generate;
                    let injector = injector.clone();
                    tasks.push(TaskHandle::spawn(async move {
                        if let Err(e) = injector.inject(&prompt, generate, settle).await {
                            tracing::error!(error = %e, "launch prompt injection failed");
                        }
                    }));
                }
                if params.refresh_models {
                    let refresher = refresher.clone();
                    tasks.push(TaskHandle::spawn(async move {
                        if let Err(e) = refresher.refresh().await {
                            tracing::error!(error = %e, "launch model refresh failed");
                        }
                    }));
                }
                if params.hook_child {
                    if let Err(e) = self.bridge.connect(&self.config.bridge) {
                        tracing::error!(error = %e, "could not hook companion");
                    }
                }

                let stripped = strip_launch_params(&url);
                if stripped != url {
                    self.root.replace_location(stripped.as_str());
                }
            }
            Err(e) => tracing::warn!(location = %location, error = %e, "host location is not a URL"),
        }

        if self.config.decorate.enabled {
            let decorator = CardDecorator::new(
                Arc::clone(&self.root),
                Arc::clone(&self.backend),
                &self.config.selectors.card_button,
            );
            tasks.push(TaskHandle::spawn(async move {
                decorator.decorate().await;
            }));
        }

        let poller = Arc::new(
            StatusPoller::new(
                Arc::clone(&self.backend),
                waiter,
                &self.config.selectors.container,
                timeout,
                self.config.timing.status_interval(),
            )
            .with_alpha_poll(self.config.status.alpha_poll),
        );
        let status = self
            .config
            .status
            .enabled
            .then(|| Arc::clone(&poller).start());

        Session {
            bridge: self.bridge,
            poller,
            status,
            tasks,
        }
    }
}

/// Flag parameters only, for when the prompt could not be decoded
fn launch_flags(url: &Url) -> LaunchParams {
    let has = |name: &str| url.query_pairs().any(|(key, _)| key == name);
    LaunchParams {
        prompt: None,
        generate: has(GENERATE_PARAM),
        refresh_models: has(REFRESH_MODELS_PARAM),
        hook_child: has(HOOK_CHILD_PARAM),
    }
}

/// The running bridge. Dropping it, or calling [`Session::shutdown`], stops
/// every task it started.
pub struct Session {
    bridge: CommandBridge,
    poller: Arc<StatusPoller>,
    status: Option<TaskHandle>,
    tasks: Vec<TaskHandle>,
}

impl Session {
    pub fn bridge(&self) -> &CommandBridge {
        &self.bridge
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    /// Wait until the one-shot launch actions have finished. Dropping the
    /// returned future early cancels whatever is still running.
    pub async fn settled(&mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        join_all(tasks.into_iter().map(TaskHandle::join)).await;
    }

    pub fn shutdown(self) {
        if let Some(status) = &self.status {
            status.cancel();
        }
        for task in &self.tasks {
            task.cancel();
        }
        self.bridge.shutdown();
    }
}
