use std::sync::Arc;

use mockops_core::{
    audit::TracingAuditSink,
    chat::ChatError,
    config::{AppConfig, ConfigError, LoadOptions},
    keys::RandomKeyGenerator,
    ChatHistory, TicketTracker, UserDirectory,
};
use mockops_db::{connect_with_config, migrations, DbPool, SqlTicketStore};
use mockops_slack::{
    socket::{ReconnectPolicy, SocketModeRunner, WebSocketTransport},
    ticket_dispatcher, SlackWebClient, TicketWorkflow,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub tracker: Arc<TicketTracker>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack client setup failed: {0}")]
    SlackClient(#[source] ChatError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(LoadOptions { require_slack: true, ..options })?;
    bootstrap_with_config(config).await
}

/// Wires storage, the Slack clients and the ticket workflow for an already-validated config.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let web = Arc::new(SlackWebClient::new(&config.slack).map_err(BootstrapError::SlackClient)?);
    let history: Arc<dyn ChatHistory> = web.clone();
    let directory =
        Arc::new(UserDirectory::new(history.clone(), config.tracker.user_cache_capacity));

    let tracker = Arc::new(
        TicketTracker::new(Arc::new(SqlTicketStore::new(db_pool.clone())), history.clone(), directory)
            .with_keys(Arc::new(RandomKeyGenerator::new(config.tracker.key_prefix.clone())))
            .with_audit(Arc::new(TracingAuditSink))
            .with_settings(config.tracker.settings()),
    );

    let workflow = Arc::new(TicketWorkflow::new(tracker.clone(), history, config.tracker.clone()));
    let slack_runner = SocketModeRunner::new(
        Arc::new(WebSocketTransport::new(web.clone())),
        ticket_dispatcher(workflow),
        web,
        ReconnectPolicy::from(&config.slack.retry),
    );
    info!(
        event_name = "system.bootstrap.slack_ready",
        correlation_id = "bootstrap",
        key_prefix = %config.tracker.key_prefix,
        summary_form = config.tracker.summary_form,
        "ticket workflow wired to socket mode runner"
    );

    Ok(Application { config, db_pool, tracker, slack_runner })
}
