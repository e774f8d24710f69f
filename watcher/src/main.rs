//! Discord watcher - relays Discord DMs and @-mentions to a notification sink.
//!
//! # Commands
//!
//! - `discord-watcher run`: Start the watcher daemon (the default)
//! - `discord-watcher status`: Show resolved paths, token source and state size
//!
//! # Environment Variables
//!
//! See the [`config`](discord_watcher::config) module for available
//! configuration options.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use discord_watcher::config::Config;
use discord_watcher::credential::Credential;
use discord_watcher::dedup::DedupStore;
use discord_watcher::logging::init_logging;
use discord_watcher::notifier::Notifier;
use discord_watcher::transport::{GatewayConfig, GatewayTransport};
use discord_watcher::watcher::Watcher;

/// Discord watcher - relays DMs and @-mentions to a notification sink.
///
/// Connects to the Discord gateway as a bot and runs the notification
/// command once for every new direct message or mention.
#[derive(Parser, Debug)]
#[command(name = "discord-watcher")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    DISCORD_TOKEN                        Bot token (falls back to .mcp.json)
    DISCORD_WATCHER_STATE_FILE           State file (default: daemon/discord_watcher_state.json)
    DISCORD_WATCHER_LOG_FILE             Log file (default: daemon/discord_watcher.log)
    DISCORD_WATCHER_MCP_CONFIG           MCP config with a discord server entry (default: .mcp.json)
    DISCORD_WATCHER_STATE_CAPACITY       Processed ids retained (default: 1000)
    DISCORD_WATCHER_NOTIFY_CMD           Notification command (default: gt mail send)
    DISCORD_WATCHER_NOTIFY_TARGET        Notification target (default: mayor/)
    DISCORD_WATCHER_NOTIFY_TIMEOUT_SECS  Notification timeout (default: 30)
    DISCORD_WATCHER_RECORD_POLICY        attempt or success (default: attempt)
    DISCORD_GATEWAY_URL                  Fixed gateway URL (default: discovered)
    DISCORD_API_BASE                     REST API base (default: https://discord.com/api/v10)

EXAMPLES:
    # Start the watcher
    export DISCORD_TOKEN=...
    discord-watcher run

    # Inspect configuration and state
    discord-watcher status
")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the watcher daemon.
    ///
    /// Runs until SIGINT or SIGTERM, then saves state and exits.
    Run,

    /// Show resolved configuration, token source and state size.
    ///
    /// The token itself is never printed.
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Status => run_status(),
        Command::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime
                .block_on(run_watcher())
                .context("Discord watcher stopped")
        }
    }
}

/// Runs the watcher daemon.
async fn run_watcher() -> discord_watcher::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = init_logging(&config.log_file)?;

    info!("Starting Discord watcher");
    info!(
        state_file = %config.state_file.display(),
        log_file = %config.log_file.display(),
        notify_program = %config.notifier.program,
        notify_target = %config.notifier.target,
        record_policy = ?config.record_policy,
        "Configuration loaded"
    );

    let credential = Credential::resolve(&config.mcp_config)
        .inspect_err(|e| error!(error = %e, "No Discord token available"))?;
    info!(source = %credential.source(), "Discord token loaded");

    let store = DedupStore::load(&config.state_file, config.state_capacity);
    let transport = GatewayTransport::new(GatewayConfig::from(&config));
    let notifier = Notifier::new(config.notifier.clone());

    let mut watcher =
        Watcher::new(transport, notifier, store).with_record_policy(config.record_policy);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = shutdown_tx.send(true);
    });

    watcher.run(&credential, shutdown_rx).await
}

/// Prints configuration and state without connecting.
fn run_status() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    println!("State file:   {}", config.state_file.display());
    println!("Log file:     {}", config.log_file.display());
    println!("MCP config:   {}", config.mcp_config.display());

    match Credential::resolve(&config.mcp_config) {
        Ok(credential) => println!("Token:        found ({})", credential.source()),
        Err(e) => println!("Token:        missing ({e})"),
    }

    let store = DedupStore::load(&config.state_file, config.state_capacity);
    println!(
        "Processed:    {} of {} message ids",
        store.len(),
        store.capacity()
    );

    let mut command = vec![config.notifier.program.clone()];
    command.extend(config.notifier.args.iter().cloned());
    command.push(config.notifier.target.clone());
    println!("Notify via:   {}", command.join(" "));
    println!("Record after: {:?}", config.record_policy);

    Ok(())
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// If a handler cannot be installed the error is logged and that signal is
/// never reported.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
