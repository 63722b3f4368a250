// Host-UI actions: pushing a prompt into the generation form and clicking
// the host's controls. Each action waits for its controls to render first.

use std::time::Duration;

use crate::companion::{CommandBridge, OutboundMessage};
use crate::config::Selectors;
use crate::error::BridgeError;
use crate::waiter::ElementWaiter;

#[derive(Clone)]
pub struct PromptInjector {
    waiter: ElementWaiter,
    selectors: Selectors,
    timeout: Duration,
    bridge: CommandBridge,
}

impl PromptInjector {
    pub fn new(
        waiter: ElementWaiter,
        selectors: Selectors,
        timeout: Duration,
        bridge: CommandBridge,
    ) -> Self {
        Self {
            waiter,
            selectors,
            timeout,
            bridge,
        }
    }

    /// Write `prompt` into the prompt field and apply it to the form.
    ///
    /// With `generate_after`, waits `settle_delay` and then starts generation,
    /// telling the companion once the generate control was clicked. Steps run
    /// strictly in order and the first timeout aborts the rest.
    pub async fn inject(
        &self,
        prompt: &str,
        generate_after: bool,
        settle_delay: Duration,
    ) -> Result<(), BridgeError> {
        tracing::info!(prompt, "injecting prompt");

        let field = self.waiter.wait(&self.selectors.prompt, self.timeout).await?;
        field.set_value(prompt);
        // Setting the value alone is invisible to the host's reactive bindings
        field.dispatch_input();

        let paste = self.waiter.wait(&self.selectors.paste, self.timeout).await?;
        paste.click();
        tracing::info!("applying prompt");

        if generate_after {
            tokio::time::sleep(settle_delay).await;
            self.generate().await?;
            self.bridge.send(OutboundMessage::generation_started());
        }

        Ok(())
    }

    pub async fn generate(&self) -> Result<(), BridgeError> {
        let button = self.waiter.wait(&self.selectors.generate, self.timeout).await?;
        button.click();
        tracing::info!("generating image");
        Ok(())
    }
}

/// Clicks the host's checkpoint refresh control
#[derive(Clone)]
pub struct ModelRefresher {
    waiter: ElementWaiter,
    selector: String,
    timeout: Duration,
}

impl ModelRefresher {
    pub fn new(waiter: ElementWaiter, selector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            waiter,
            selector: selector.into(),
            timeout,
        }
    }

    pub async fn refresh(&self) -> Result<(), BridgeError> {
        let button = self.waiter.wait(&self.selector, self.timeout).await?;
        button.click();
        tracing::info!("refreshing model list");
        Ok(())
    }
}
