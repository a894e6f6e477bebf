use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use mockops_db::{migrations, DbPool};
use mockops_slack::SessionState;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

/// Readiness inputs: the ticket database and the Socket Mode session.
#[derive(Clone)]
pub struct Readiness {
    db_pool: DbPool,
    session: watch::Receiver<SessionState>,
    key_prefix: String,
}

impl Readiness {
    pub fn new(
        db_pool: DbPool,
        session: watch::Receiver<SessionState>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self { db_pool, session, key_prefix: key_prefix.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Check {
    pub ok: bool,
    pub state: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub key_prefix: String,
    pub ticket_store: Check,
    pub slack_session: Check,
    pub checked_at: String,
}

pub fn router(readiness: Readiness) -> Router {
    Router::new().route("/health", get(report)).with_state(readiness)
}

pub async fn spawn(bind_address: &str, port: u16, readiness: Readiness) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "readiness endpoint listening"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(readiness)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "readiness endpoint stopped"
            );
        }
    });
    Ok(())
}

pub async fn report(State(readiness): State<Readiness>) -> (StatusCode, Json<ReadinessReport>) {
    let ticket_store = ticket_store_state(&readiness.db_pool).await;
    let slack_session = session_state(*readiness.session.borrow());
    let ready = ticket_store.ok && slack_session.ok;

    let body = ReadinessReport {
        ready,
        key_prefix: readiness.key_prefix.clone(),
        ticket_store,
        slack_session,
        checked_at: Utc::now().to_rfc3339(),
    };
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}

async fn ticket_store_state(pool: &DbPool) -> Check {
    match migrations::schema_ready(pool).await {
        Ok(true) => Check { ok: true, state: "migrated".to_string() },
        Ok(false) => Check { ok: false, state: "migrations pending".to_string() },
        Err(error) => Check { ok: false, state: format!("unreachable: {error}") },
    }
}

fn session_state(state: SessionState) -> Check {
    let state = match state {
        SessionState::Connecting { attempt } => format!("connecting (attempt {attempt})"),
        SessionState::Reconnecting { failures } => format!("reconnecting after {failures} failures"),
        other => other.as_str().to_string(),
    };
    Check { ok: state == "connected", state }
}
