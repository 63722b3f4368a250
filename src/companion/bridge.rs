use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use super::protocol::{Command, InboundMessage, OutboundMessage};
use super::server::CompanionServer;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::timer::TaskHandle;

/// Registered dispatcher for inbound commands
pub type CommandHandler = Arc<dyn Fn(Command) -> BoxFuture<'static, ()> + Send + Sync>;

/// Live channel to the companion. Exists at most once per bridge.
struct BridgeHandle {
    origin: String,
    socket_path: PathBuf,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    _pump: TaskHandle,
}

enum HookState {
    Unhooked,
    Hooked(BridgeHandle),
    Closed,
}

struct BridgeInner {
    state: Mutex<HookState>,
    handler: Mutex<Option<CommandHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Host side of the companion relationship.
///
/// Cheap to clone; all clones share one handle. The relationship is
/// optional: [`CommandBridge::send`] without a hooked companion does nothing.
#[derive(Clone)]
pub struct CommandBridge {
    inner: Arc<BridgeInner>,
}

impl Default for CommandBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBridge {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                state: Mutex::new(HookState::Unhooked),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Open the companion channel, accepting only messages from
    /// `config.origin`. A bridge is hooked at most once; later calls fail
    /// with [`BridgeError::AlreadyHooked`], even after a shutdown.
    pub fn connect(&self, config: &BridgeConfig) -> Result<(), BridgeError> {
        let mut state = lock(&self.inner.state);
        if !matches!(*state, HookState::Unhooked) {
            return Err(BridgeError::AlreadyHooked);
        }

        let server = CompanionServer::bind(&config.socket_path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = TaskHandle::spawn(pump(
            server,
            rx,
            config.origin.clone(),
            config.pump_interval(),
            Arc::downgrade(&self.inner),
        ));

        tracing::info!(
            origin = %config.origin,
            socket = %config.socket_path.display(),
            "companion bridge hooked"
        );

        *state = HookState::Hooked(BridgeHandle {
            origin: config.origin.clone(),
            socket_path: config.socket_path.clone(),
            outbound: tx,
            _pump: pump,
        });
        Ok(())
    }

    pub fn on_command(&self, handler: CommandHandler) {
        *lock(&self.inner.handler) = Some(handler);
    }

    pub fn is_hooked(&self) -> bool {
        matches!(*lock(&self.inner.state), HookState::Hooked(_))
    }

    /// Origin and socket of the live handle, if any
    pub fn endpoint(&self) -> Option<(String, PathBuf)> {
        match &*lock(&self.inner.state) {
            HookState::Hooked(handle) => Some((handle.origin.clone(), handle.socket_path.clone())),
            _ => None,
        }
    }

    /// Deliver a notice to the companion if one is hooked
    pub fn send(&self, message: OutboundMessage) {
        match &*lock(&self.inner.state) {
            HookState::Hooked(handle) => {
                if handle.outbound.send(message).is_err() {
                    tracing::debug!("companion pump has stopped; notice dropped");
                }
            }
            _ => tracing::trace!(?message, "no companion hooked; notice dropped"),
        }
    }

    /// Log and run the registered handler for `message` to completion.
    pub async fn handle(&self, message: InboundMessage) {
        let payload = serde_json::Value::Object(message.payload.clone());
        tracing::info!(
            kind = %message.kind,
            payload = %payload,
            "companion command"
        );

        let command = Command::from_message(&message);
        if let Command::Unrecognized { kind } = &command {
            tracing::debug!(kind = %kind, "ignoring unrecognized command");
            return;
        }

        let handler = lock(&self.inner.handler).clone();
        match handler {
            Some(handler) => handler(command).await,
            None => tracing::debug!("no command handler registered"),
        }
    }

    /// Run [`CommandBridge::handle`] as its own task
    pub fn dispatch(&self, message: InboundMessage) -> tokio::task::JoinHandle<()> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.handle(message).await })
    }

    /// Close the channel and remove the socket
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *lock(&self.inner.state), HookState::Closed);
        if let HookState::Hooked(handle) = previous {
            tracing::info!(socket = %handle.socket_path.display(), "companion bridge closed");
        }
    }
}

async fn pump(
    mut server: CompanionServer,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    origin: String,
    period: Duration,
    bridge: Weak<BridgeInner>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(message) = outbound.recv() => {
                match server.broadcast(&message).await {
                    Ok(0) => tracing::debug!(?message, "no trusted companion connected"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "failed to send companion notice"),
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = server.accept_pending() {
                    tracing::warn!(error = %e, "failed to accept companion connection");
                }
                let envelopes = match server.poll_envelopes(&origin) {
                    Ok(envelopes) => envelopes,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read companion messages");
                        continue;
                    }
                };
                if envelopes.is_empty() {
                    continue;
                }
                let Some(inner) = bridge.upgrade() else {
                    return;
                };
                let host = CommandBridge { inner };
                for (_conn_id, envelope) in envelopes {
                    host.dispatch(envelope.message);
                }
            }
        }
    }
}
