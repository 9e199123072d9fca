//! Trellis administrative CLI.
//!
//! Boots the extension manager against the configured extensions directory
//! and state store, then runs one command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use trellis_kernel::config::Config;
use trellis_kernel::menu::NavigationManager;
use trellis_kernel::plugin::{ExtensionLoader, PgStore, PluginManager, cli};
use trellis_kernel::registry::Registries;

/// Trellis extension manager.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover and activate every eligible extension.
    Boot,

    /// Inspect or change extension state.
    Extension {
        #[command(subcommand)]
        action: ExtensionCommand,
    },

    /// Render a content entity (JSON file) and print the markup.
    Render {
        content: PathBuf,
        /// Template id to use instead of the entity's own.
        #[arg(long)]
        template: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ExtensionCommand {
    /// List discovered extensions and their status.
    List,
    /// Show extension, registry and navigation counts.
    Stats,
    /// Install a discovered extension.
    Install { id: String },
    /// Enable an installed extension.
    Enable { id: String },
    /// Disable an enabled extension.
    Disable { id: String },
    /// Uninstall an extension and roll back its migrations.
    Uninstall { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        extensions_dir = %config.extensions_dir.display(),
        environment = %config.environment,
        strict = config.strict_registration,
        "Configuration loaded"
    );

    let mut manager = build_manager(&config).await?;

    // Ctrl-C stops the activation pass between extensions.
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current extension");
            signal.cancel();
        }
    });

    match args.command {
        Command::Boot => cli::cmd_boot(&mut manager, &cancel).await,
        Command::Render { content, template } => {
            manager
                .boot(&cancel)
                .await
                .context("failed to boot extensions")?;
            cli::cmd_render(&manager, &config, &content, template.as_deref())
        }
        Command::Extension { action } => {
            manager
                .boot(&cancel)
                .await
                .context("failed to boot extensions")?;

            match action {
                ExtensionCommand::List => cli::cmd_extension_list(&manager),
                ExtensionCommand::Stats => cli::cmd_extension_stats(&manager),
                ExtensionCommand::Install { id } => {
                    cli::cmd_extension_install(&mut manager, &id).await
                }
                ExtensionCommand::Enable { id } => {
                    cli::cmd_extension_enable(&mut manager, &id).await
                }
                ExtensionCommand::Disable { id } => {
                    cli::cmd_extension_disable(&mut manager, &id).await
                }
                ExtensionCommand::Uninstall { id } => {
                    cli::cmd_extension_uninstall(&mut manager, &id).await
                }
            }
        }
    }
}

/// Wire the registries, navigation and stores into a manager.
async fn build_manager(config: &Config) -> Result<PluginManager> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set, extension state will not persist between runs");
        return Ok(PluginManager::in_memory(
            config.manager_config(),
            ExtensionLoader::new(),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    store
        .ensure_schema()
        .await
        .context("failed to create extension state tables")?;
    info!("Database connection established");

    Ok(PluginManager::new(
        config.manager_config(),
        Arc::new(Registries::new()),
        Arc::new(NavigationManager::new()),
        store.clone(),
        store,
        ExtensionLoader::new().with_pool(pool),
    ))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
