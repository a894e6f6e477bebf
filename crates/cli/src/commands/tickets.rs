use mockops_core::config::{AppConfig, LoadOptions, TrackerConfig};
use mockops_core::{Ticket, TicketKey, TicketStatus, TicketStore};
use mockops_db::{connect_with_config, SqlTicketStore};
use serde::Serialize;
use serde_json::json;

use crate::commands::{block_on, CommandResult};

#[derive(Debug, Serialize)]
struct TicketRow {
    key: String,
    status: &'static str,
    title: String,
    created_by: String,
    created_at: String,
    comment_count: usize,
    url: String,
}

impl TicketRow {
    fn from_ticket(ticket: &Ticket, tracker: &TrackerConfig) -> Self {
        Self {
            key: ticket.key.0.clone(),
            status: ticket.status.label(),
            title: ticket.title.clone(),
            created_by: ticket.created_by.clone(),
            created_at: ticket.created_at.to_rfc3339(),
            comment_count: ticket.comments.len(),
            url: tracker.browse_url(&ticket.key.0),
        }
    }
}

pub fn list(status: Option<&str>, limit: usize) -> CommandResult {
    let status = match status.map(str::parse::<TicketStatus>).transpose() {
        Ok(status) => status,
        Err(error) => {
            return CommandResult::failure("tickets.list", "invalid_argument", error.to_string(), 2);
        }
    };

    with_store("tickets.list", |store, config| async move {
        let tickets = store
            .list(status, limit.max(1))
            .await
            .map_err(|error| ("storage", error.to_string(), 4u8))?;
        let rows: Vec<TicketRow> =
            tickets.iter().map(|ticket| TicketRow::from_ticket(ticket, &config.tracker)).collect();
        let scope = status.map(|status| status.label()).unwrap_or("All");
        Ok::<_, Failure>(CommandResult::success_with_data(
            "tickets.list",
            format!("{scope} tickets: {}", rows.len()),
            Some(json!({ "tickets": rows })),
        ))
    })
}

pub fn show(key: &str) -> CommandResult {
    let key = TicketKey(key.trim().to_ascii_uppercase());

    with_store("tickets.show", |store, config| async move {
        let ticket = store
            .find_by_key(&key)
            .await
            .map_err(|error| ("storage", error.to_string(), 4u8))?
            .ok_or_else(|| ("not_found", format!("no ticket with key {key}"), 6u8))?;
        let message = format!("{} [{}] {}", ticket.key, ticket.status.label(), ticket.title);
        let data = json!({
            "url": config.tracker.browse_url(&ticket.key.0),
            "ticket": ticket,
        });
        Ok::<_, Failure>(CommandResult::success_with_data("tickets.show", message, Some(data)))
    })
}

type Failure = (&'static str, String, u8);

fn with_store<F, Fut>(command: &str, body: F) -> CommandResult
where
    F: FnOnce(SqlTicketStore, AppConfig) -> Fut,
    Fut: std::future::Future<Output = Result<CommandResult, Failure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let outcome = block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let result = body(SqlTicketStore::new(pool.clone()), config).await;
        pool.close().await;
        result
    });

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err((error_class, message, exit_code))) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
        Err(message) => CommandResult::failure(command, "runtime_init", message, 3),
    }
}
