use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::companion::{Command, CommandBridge, CommandHandler, OutboundMessage};
use crate::error::BridgeError;
use crate::injector::{ModelRefresher, PromptInjector};

/// Executes companion commands against the host UI and reports back.
pub struct Controller {
    injector: PromptInjector,
    refresher: ModelRefresher,
    bridge: CommandBridge,
    remote_settle_delay: Duration,
}

impl Controller {
    pub fn new(
        injector: PromptInjector,
        refresher: ModelRefresher,
        bridge: CommandBridge,
        remote_settle_delay: Duration,
    ) -> Self {
        Self {
            injector,
            refresher,
            bridge,
            remote_settle_delay,
        }
    }

    pub async fn execute(&self, command: Command) -> Result<(), BridgeError> {
        match command {
            Command::Generate { prompt } => {
                self.injector
                    .inject(&prompt, true, self.remote_settle_delay)
                    .await
            }
            Command::RefreshModels => {
                self.refresher.refresh().await?;
                self.bridge.send(OutboundMessage::ModelsRefreshed);
                Ok(())
            }
            Command::Unrecognized { .. } => Ok(()),
        }
    }

    /// Run `command`, logging and reporting a failure instead of returning it
    pub async fn dispatch(&self, command: Command) {
        let kind = command.kind().to_string();
        if let Err(e) = self.execute(command).await {
            tracing::error!(command = %kind, error = %e, "companion command failed");
            self.bridge.send(OutboundMessage::CommandFailed {
                command: kind,
                error: e.to_string(),
            });
        }
    }

    /// Wrap the controller as a bridge command handler
    pub fn into_handler(self: Arc<Self>) -> CommandHandler {
        Arc::new(move |command: Command| {
            let controller = Arc::clone(&self);
            async move { controller.dispatch(command).await }.boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::InboundMessage;
    use crate::config::Selectors;
    use crate::dom::Document;
    use crate::host::HostRoot;
    use crate::waiter::ElementWaiter;

    fn controller(doc: &Document, bridge: &CommandBridge) -> Arc<Controller> {
        let selectors = Selectors::default();
        let waiter = ElementWaiter::new(Arc::new(doc.clone()));
        let timeout = Duration::from_secs(1);
        Arc::new(Controller::new(
            PromptInjector::new(waiter.clone(), selectors.clone(), timeout, bridge.clone()),
            ModelRefresher::new(waiter, selectors.refresh_models, timeout),
            bridge.clone(),
            Duration::from_millis(500),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn generate_command_fills_prompt_and_generates() {
        let doc = Document::gradio_replica(&Selectors::default(), "http://localhost/");
        let bridge = CommandBridge::new();
        bridge.on_command(controller(&doc, &bridge).into_handler());

        bridge.handle(InboundMessage::generate("a lighthouse")).await;

        let selectors = Selectors::default();
        let prompt = doc.query_selector(&selectors.prompt).unwrap();
        assert_eq!(prompt.value(), "a lighthouse");
        assert_eq!(doc.clicks(&selectors.paste), 1);
        assert_eq!(doc.clicks(&selectors.generate), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_command_clicks_refresh() {
        let doc = Document::gradio_replica(&Selectors::default(), "http://localhost/");
        let bridge = CommandBridge::new();
        bridge.on_command(controller(&doc, &bridge).into_handler());

        bridge.handle(InboundMessage::refresh_models()).await;

        assert_eq!(doc.clicks(&Selectors::default().refresh_models), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bogus_command_changes_nothing() {
        let doc = Document::gradio_replica(&Selectors::default(), "http://localhost/");
        let bridge = CommandBridge::new();
        bridge.on_command(controller(&doc, &bridge).into_handler());

        bridge.handle(InboundMessage::new("bogus")).await;

        assert!(doc.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_is_swallowed() {
        let doc = Document::new("http://localhost/");
        let bridge = CommandBridge::new();
        let controller = controller(&doc, &bridge);

        assert!(controller.execute(Command::RefreshModels).await.is_err());
        controller.dispatch(Command::RefreshModels).await;
    }
}
