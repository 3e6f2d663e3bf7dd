//! Leafscan - potato leaf disease classification CLI
//!
#![doc = "Main entry point for the Leafscan client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use leafscan::cli::{Cli, Commands};
use leafscan::commands;
use leafscan::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Login { email, password } => {
            tracing::info!("Starting login");
            commands::auth::login(&config, &email, password).await
        }
        Commands::Signup {
            email,
            password,
            confirm,
        } => {
            tracing::info!("Starting signup");
            commands::auth::signup(&config, &email, password, confirm).await
        }
        Commands::Logout => commands::auth::logout(&config),
        Commands::Whoami => commands::auth::whoami(&config).await,
        Commands::Classify { files, no_save } => {
            tracing::info!("Starting classification");
            if no_save {
                tracing::debug!("Scan history recording disabled");
            }
            commands::classify::run_classify(&config, files, no_save).await
        }
        Commands::History { command } => {
            tracing::info!("Starting history command");
            commands::history::handle_history(&config, command).await
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output.
fn init_tracing(verbose: bool, json_logs: bool) {
    let default_level = if verbose { "leafscan=debug" } else { "leafscan=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
