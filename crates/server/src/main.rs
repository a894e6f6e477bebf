mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use mockops_core::config::{AppConfig, LoadOptions, LogFormat};
use mockops_core::TicketStatus;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the config before anything else can report.
    let config = AppConfig::load(LoadOptions { require_slack: true, ..LoadOptions::default() })?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let readiness = health::Readiness::new(
        app.db_pool.clone(),
        app.slack_runner.session_state(),
        app.config.tracker.key_prefix.clone(),
    );
    health::spawn(&app.config.server.bind_address, app.config.server.health_check_port, readiness)
        .await?;

    let open_tickets = app.tracker.list(Some(TicketStatus::Open), 1_000).await?.len();
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        open_tickets,
        "mockops-server started"
    );

    tokio::select! {
        result = app.slack_runner.start() => result?,
        signal = tokio::signal::ctrl_c() => signal?,
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "mockops-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = app.config.server.graceful_shutdown_secs,
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}
