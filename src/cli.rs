use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use civitai_link_bridge::bootstrap::{self, Bootstrap};
use civitai_link_bridge::companion::{CompanionClient, InboundMessage, OutboundMessage};
use civitai_link_bridge::config::{Config, DEFAULT_CONFIG_PATH};
use civitai_link_bridge::dom::Document;
use civitai_link_bridge::status::backend;
use civitai_link_bridge::status::{HttpBackend, LinkBackend, RECONNECT_SUCCESS};

/// civlink - Civitai Link bridge for the image generation web UI
#[derive(Parser, Debug)]
#[command(name = "civlink")]
#[command(version)]
#[command(about = "Civitai Link bridge for the image generation web UI")]
#[command(long_about = "civlink runs the Civitai Link bridge headless against a replica of the web UI,
and talks to a running bridge or backend from the command line.

Quick start:
  1. Run 'civlink --init' to write a default .civitai-link.toml
  2. Point base_url at the web UI and bridge.origin at the companion's origin
  3. Run 'civlink run --url \"$(civlink launch-url --hook-child)\"' to start a hooked bridge
  4. Drive it with 'civlink send --wait generate \"a cat\"'")]
pub struct Cli {
    /// Path to config file (defaults to .civitai-link.toml)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Write a default config file and exit
    #[arg(long)]
    pub init: bool,

    /// Increase log output (-v debug, -vv trace); RUST_LOG wins when set
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the bridge against an in-memory replica of the web UI (the default)
    Run {
        /// Page address the bridge starts on, launch parameters included
        #[arg(long)]
        url: Option<String>,
    },
    /// Send a command to a running bridge as the companion would
    Send {
        #[command(subcommand)]
        message: SendMessage,
        /// Origin to stamp on the envelope (defaults to bridge.origin)
        #[arg(long)]
        origin: Option<String>,
        /// Wait for the bridge's reply notice and print it
        #[arg(long)]
        wait: bool,
        /// Seconds to wait for the reply (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Build a page address carrying launch parameters
    LaunchUrl {
        /// Prompt to inject on load
        #[arg(long)]
        prompt: Option<String>,
        /// Click generate after injecting the prompt
        #[arg(long)]
        generate: bool,
        /// Refresh the checkpoint list on load
        #[arg(long)]
        refresh_models: bool,
        /// Open the companion channel on load
        #[arg(long)]
        hook_child: bool,
    },
    /// Print the backend's link status
    Status,
    /// Ask the backend to re-establish the link
    Reconnect,
    /// Print the saved model page index
    Pages,
}

/// Messages `civlink send` knows how to build
#[derive(Subcommand, Debug, Clone)]
pub enum SendMessage {
    /// Inject a prompt and generate
    Generate { prompt: String },
    /// Refresh the checkpoint list
    RefreshModels,
    /// Send a raw message object, e.g. '{"kind":"generate","generationParams":"a cat"}'
    Raw { json: String },
}

impl SendMessage {
    pub fn into_message(self) -> anyhow::Result<InboundMessage> {
        match self {
            SendMessage::Generate { prompt } => Ok(InboundMessage::generate(prompt)),
            SendMessage::RefreshModels => Ok(InboundMessage::refresh_models()),
            SendMessage::Raw { json } => serde_json::from_str(&json)
                .with_context(|| format!("'{}' is not a message object with a kind", json)),
        }
    }
}

pub fn init_config(config_path: &str) -> anyhow::Result<()> {
    if Path::new(config_path).exists() {
        println!("Config file '{}' already exists.", config_path);
        return Ok(());
    }

    Config::default()
        .save(config_path)
        .with_context(|| format!("Failed to write config to '{}'", config_path))?;

    println!("Created {} with default settings.", config_path);
    println!("\nNext steps:");
    println!("  1. Set base_url to the web UI address");
    println!("  2. Set bridge.origin to the companion's origin");
    println!("  3. Run 'civlink run' to start the bridge");
    Ok(())
}

fn http_backend(config: &Config) -> anyhow::Result<Arc<dyn LinkBackend>> {
    let backend = HttpBackend::new(&config.base_url, config.timing.request_timeout())
        .with_context(|| format!("Invalid base_url '{}'", config.base_url))?;
    Ok(Arc::new(backend))
}

/// Run the bridge headless until ctrl-c
pub async fn run_bridge(config: Config, url: Option<String>) -> anyhow::Result<()> {
    let location = url.unwrap_or_else(|| config.base_url.clone());
    url::Url::parse(&location).with_context(|| format!("'{}' is not a page address", location))?;

    let backend = http_backend(&config)?;
    let doc = Document::gradio_replica(&config.selectors, location);
    let session = Bootstrap::new(config, Arc::new(doc.clone()), backend).launch();

    if let Some((origin, socket)) = session.bridge().endpoint() {
        println!("Companion channel open at {} for origin {}", socket.display(), origin);
    }
    println!("Bridge running. Press ctrl-c to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    session.shutdown();
    tracing::info!(events = doc.events().len(), "bridge stopped");
    Ok(())
}

/// Send one message to a running bridge, optionally printing its reply
pub async fn run_send_command(config: &Config, command: &Commands) -> anyhow::Result<()> {
    let Commands::Send {
        message,
        origin,
        wait,
        timeout,
    } = command
    else {
        return Err(anyhow!("not a send command"));
    };

    let socket_path = &config.bridge.socket_path;
    let origin = origin.clone().unwrap_or_else(|| config.bridge.origin.clone());
    let mut client = CompanionClient::connect(socket_path, origin)
        .await
        .with_context(|| {
            format!(
                "Could not connect to bridge at {:?}. Is it running with civitai_hook_child?",
                socket_path
            )
        })?;

    let message = message.clone().into_message()?;
    client
        .send(message)
        .await
        .with_context(|| format!("Failed to send to bridge at {:?}", socket_path))?;

    if !wait {
        return Ok(());
    }

    let reply = tokio::time::timeout(Duration::from_secs(*timeout), client.recv())
        .await
        .map_err(|_| anyhow!("No reply from bridge within {}s", timeout))?
        .context("Failed to read reply from bridge")?;

    let json = serde_json::to_string_pretty(&reply).context("Failed to serialize reply")?;
    println!("{}", json);

    if matches!(reply, OutboundMessage::CommandFailed { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

/// Page address with launch parameters appended to `base_url`
pub fn launch_url(
    base_url: &str,
    prompt: Option<&str>,
    generate: bool,
    refresh_models: bool,
    hook_child: bool,
) -> anyhow::Result<String> {
    let mut url = url::Url::parse(base_url)
        .with_context(|| format!("'{}' is not a valid URL", base_url))?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(prompt) = prompt {
            query.append_pair(bootstrap::PROMPT_PARAM, &bootstrap::encode_prompt(prompt));
        }
        if generate {
            query.append_key_only(bootstrap::GENERATE_PARAM);
        }
        if refresh_models {
            query.append_key_only(bootstrap::REFRESH_MODELS_PARAM);
        }
        if hook_child {
            query.append_key_only(bootstrap::HOOK_CHILD_PARAM);
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url.into())
}

/// One-shot backend requests: status, reconnect, pages
pub async fn run_backend_command(config: &Config, command: &Commands) -> anyhow::Result<()> {
    let link = http_backend(config)?;

    match command {
        Commands::Status => {
            let status = backend::call(&link, |b| b.link_status()).await?;
            let json = serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
            println!("{}", json);
        }
        Commands::Reconnect => {
            let message = backend::call(&link, |b| b.reconnect_link()).await?;
            println!("{}", message);
            if message != RECONNECT_SUCCESS {
                std::process::exit(1);
            }
        }
        Commands::Pages => {
            let index = backend::call(&link, |b| b.page_index()).await?;
            let mut entries: Vec<_> = index.into_iter().collect();
            entries.sort();
            for (model, page) in entries {
                println!("{}\t{}", model, page);
            }
        }
        _ => return Err(anyhow!("not a backend command")),
    }

    Ok(())
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
