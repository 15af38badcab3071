//! Parley - streaming LLM chat
//!
//! Main entry point for the `parley` binary.

use anyhow::Result;

use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use parley::cli::{Cli, Commands};
use parley::commands;
use parley::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    let log_format = init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    if config.logging.json && !cli.json_logs {
        log_format.reload(fmt_layer(true))?;
    }

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!("Starting server");
            if let Some(b) = &bind {
                tracing::debug!("Using bind override: {}", b);
            }
            commands::serve::run_serve(config, bind).await?;
            Ok(())
        }
        Commands::Chat {
            provider,
            new,
            conversation,
        } => {
            tracing::info!("Starting interactive chat mode");
            if let Some(p) = &provider {
                tracing::debug!("Using provider override: {}", p);
            }
            if let Some(c) = &conversation {
                tracing::debug!("Continuing conversation: {}", c);
            }
            commands::chat::run_chat(config, provider, new, conversation).await?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::debug!("Starting history command");
            commands::history::handle_history(&config, command).await?;
            Ok(())
        }
    }
}

type FmtLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over the defaults. Logs go to stderr so streamed replies
/// on stdout stay clean. The returned handle switches the output format once
/// the configuration is loaded.
fn init_tracing(verbose: bool, json: bool) -> reload::Handle<FmtLayer, Registry> {
    let default_filter = if verbose { "parley=debug" } else { "parley=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (format_layer, handle) = reload::Layer::new(fmt_layer(json));
    tracing_subscriber::registry()
        .with(format_layer)
        .with(env_filter)
        .init();
    handle
}

fn fmt_layer(json: bool) -> FmtLayer {
    let layer = tracing_subscriber::fmt::layer::<Registry>().with_writer(std::io::stderr);
    if json {
        Box::new(layer.json())
    } else {
        Box::new(layer)
    }
}
