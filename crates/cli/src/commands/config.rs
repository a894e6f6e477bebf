use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use mockops_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let app_token = redact_token(config.slack.app_token.expose_secret());
    let bot_token = redact_token(config.slack.bot_token.expose_secret());
    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "MOCKOPS_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "MOCKOPS_DATABASE_MAX_CONNECTIONS",
        ),
        ("slack.app_token", app_token, "MOCKOPS_SLACK_APP_TOKEN"),
        ("slack.bot_token", bot_token, "MOCKOPS_SLACK_BOT_TOKEN"),
        ("slack.api_base_url", config.slack.api_base_url.clone(), "MOCKOPS_SLACK_API_BASE_URL"),
        (
            "slack.retry.max_attempts",
            config.slack.retry.max_attempts.to_string(),
            "MOCKOPS_SLACK_RETRY_MAX_ATTEMPTS",
        ),
        ("tracker.key_prefix", config.tracker.key_prefix.clone(), "MOCKOPS_TRACKER_KEY_PREFIX"),
        (
            "tracker.browse_base_url",
            config.tracker.browse_base_url.clone(),
            "MOCKOPS_TRACKER_BROWSE_BASE_URL",
        ),
        (
            "tracker.summary_form",
            config.tracker.summary_form.to_string(),
            "MOCKOPS_TRACKER_SUMMARY_FORM",
        ),
        (
            "tracker.reactions",
            format!(
                "create=:{}: review=:{}: close=:{}: comment=:{}:",
                config.tracker.reactions.create,
                config.tracker.reactions.review,
                config.tracker.reactions.close,
                config.tracker.reactions.comment
            ),
            "",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "MOCKOPS_SERVER_BIND_ADDRESS"),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "MOCKOPS_SERVER_HEALTH_CHECK_PORT",
        ),
        ("logging.level", config.logging.level.clone(), "MOCKOPS_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "MOCKOPS_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source = field_source(
            key,
            (!env_key.is_empty()).then_some(env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("mockops.toml"), PathBuf::from("config/mockops.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
