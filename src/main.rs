//! # DoseWatch — dose tracker with due-dose push notifications
//!
//! Runs the HTTP API and the notification monitor side by side over one
//! SQLite dose store. Several instances may share the database file; the
//! store's claim makes sure each due dose is announced at most once.
//!
//! Usage:
//!   dosewatch                              # ~/.dosewatch/config.toml
//!   dosewatch --config ./dosewatch.toml    # Custom config
//!   dosewatch --listen 0.0.0.0:8375 -v     # Override listen address, debug logs

use anyhow::{Context, Result};
use clap::Parser;
use dosewatch_core::DoseWatchConfig;
use dosewatch_gateway::AppState;
use dosewatch_scheduler::{DoseStore, GotifyTransport, Monitor, NotificationTemplates, Schedule};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dosewatch", version, about = "💉 DoseWatch — dose tracker with push reminders")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides listen_address)
    #[arg(short, long)]
    listen: Option<String>,

    /// SQLite database path (overrides database_path)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "dosewatch=debug,dosewatch_scheduler=debug,dosewatch_gateway=debug,tower_http=debug"
    } else {
        "dosewatch=info,dosewatch_scheduler=info,dosewatch_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false);
    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config_path = cli.config.clone().unwrap_or_else(DoseWatchConfig::default_path);
    let config = DoseWatchConfig::load_from(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    // Bad templates abort startup; the monitor never runs with them.
    let notification = &config.gotify.notification;
    let templates = NotificationTemplates::parse(
        &notification.title,
        &notification.message,
        config.monitor.time_format.as_deref(),
    )
    .context("invalid notification template")?;

    let db_path = expand_path(cli.db.as_deref().unwrap_or(&config.database_path));
    let store = Arc::new(
        DoseStore::open(&db_path).with_context(|| format!("failed to open database {}", db_path.display()))?,
    );

    let delivery_timeout = Duration::from_secs(config.monitor.delivery_timeout_secs);
    let transport = Arc::new(GotifyTransport::new(
        &config.gotify.endpoint,
        &config.gotify.token,
        delivery_timeout,
    )?);

    let schedule = Schedule {
        treatment_type: config.treatment.treatment_type,
        interval: config.treatment.interval,
        extras: notification.extras.clone(),
        tick: Duration::from_secs(config.monitor.tick_secs),
        delivery_timeout,
    };
    let monitor = Monitor::new(store.clone(), schedule, templates, transport.clone());

    let state = AppState {
        store,
        treatment_type: config.treatment.treatment_type,
        interval: config.treatment.interval,
        allow_delete_notified: config.monitor.allow_delete_notified,
        transport,
        extras: notification.extras.clone(),
        start_time: std::time::Instant::now(),
    };

    tracing::info!("💉 DoseWatch v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("   🗄️  Database:  {}", db_path.display());
    tracing::info!("   🩹 Treatment: {} every {}", config.treatment.treatment_type, config.treatment.interval);
    tracing::info!("   📡 Push:      {}", config.gotify.endpoint);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Shutting down...");
        }
        shutdown_tx.send(true).ok();
    });

    let listen = cli.listen.clone().unwrap_or_else(|| config.listen_address.clone());
    let monitor_task = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    let served = dosewatch_gateway::serve(state, &listen, shutdown_rx).await;
    if served.is_err() {
        // The monitor has no reason to outlive a failed server.
        monitor_task.abort();
    } else {
        monitor_task.await.ok();
    }
    served
}
