mod cli;

use cli::{Cli, Commands, init_config};
use civitai_link_bridge::config::Config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    let config_path = &cli.config;

    init_logging(cli.verbose);

    // Handle --init flag
    if cli.init {
        return init_config(config_path);
    }

    let config = Config::load_or_default(config_path)?;

    match cli.command {
        None => cli::run_bridge(config, None).await,
        Some(Commands::Run { url }) => cli::run_bridge(config, url).await,
        Some(Commands::LaunchUrl {
            prompt,
            generate,
            refresh_models,
            hook_child,
        }) => {
            let url = cli::launch_url(
                &config.base_url,
                prompt.as_deref(),
                generate,
                refresh_models,
                hook_child,
            )?;
            println!("{}", url);
            Ok(())
        }
        Some(command @ Commands::Send { .. }) => cli::run_send_command(&config, &command).await,
        Some(command) => cli::run_backend_command(&config, &command).await,
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr so command output stays pipeable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
