use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use ticketdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut line = |key: &str, value: String, env_keys: &[&str]| {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    };

    line("database.url", config.database.url.clone(), &["TICKETDESK_DATABASE_URL"]);
    line(
        "database.max_connections",
        config.database.max_connections.to_string(),
        &["TICKETDESK_DATABASE_MAX_CONNECTIONS"],
    );
    line(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        &["TICKETDESK_DATABASE_TIMEOUT_SECS"],
    );
    line(
        "gateway.token",
        redact_token(config.gateway.token.expose_secret()),
        &["TICKETDESK_GATEWAY_TOKEN", "DISCORD_TOKEN"],
    );
    line(
        "gateway.max_reconnect_attempts",
        config.gateway.max_reconnect_attempts.to_string(),
        &["TICKETDESK_GATEWAY_MAX_RECONNECT_ATTEMPTS"],
    );
    line("guild.id", config.guild.id.to_string(), &["TICKETDESK_GUILD_ID", "GUILD_ID"]);
    line(
        "guild.default_category",
        config.guild.default_category.clone(),
        &["TICKETDESK_GUILD_DEFAULT_CATEGORY"],
    );
    line(
        "guild.archive_channel_id",
        config.guild.archive_channel_id.to_string(),
        &["TICKETDESK_GUILD_ARCHIVE_CHANNEL_ID"],
    );
    line(
        "tickets.history_page_size",
        config.tickets.history_page_size.to_string(),
        &["TICKETDESK_TICKETS_HISTORY_PAGE_SIZE"],
    );
    line(
        "tickets.max_open_per_user",
        config
            .tickets
            .max_open_per_user
            .map(|cap| cap.to_string())
            .unwrap_or_else(|| "<unlimited>".to_string()),
        &["TICKETDESK_TICKETS_MAX_OPEN_PER_USER"],
    );
    line(
        "tickets.transcript_dir",
        config
            .tickets
            .transcript_dir
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<unset>".to_string()),
        &["TICKETDESK_TICKETS_TRANSCRIPT_DIR"],
    );
    line(
        "tickets.types",
        config
            .tickets
            .types
            .iter()
            .map(|descriptor| descriptor.identifier.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        &[],
    );
    line(
        "server.bind_address",
        config.server.bind_address.clone(),
        &["TICKETDESK_SERVER_BIND_ADDRESS"],
    );
    line(
        "server.health_check_port",
        config.server.health_check_port.to_string(),
        &["TICKETDESK_SERVER_HEALTH_CHECK_PORT"],
    );
    line(
        "logging.level",
        config.logging.level.clone(),
        &["TICKETDESK_LOGGING_LEVEL", "TICKETDESK_LOG_LEVEL"],
    );
    line(
        "logging.format",
        format!("{:?}", config.logging.format),
        &["TICKETDESK_LOGGING_FORMAT", "TICKETDESK_LOG_FORMAT"],
    );

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("ticketdesk.toml"), PathBuf::from("config/ticketdesk.toml")]
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
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
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

/// Keeps the first four characters of tokens long enough to identify.
pub(crate) fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.char_indices().nth(4) {
        Some((cut, _)) if trimmed.len() >= 16 => format!("{}***", &trimmed[..cut]),
        _ => "<redacted>".to_string(),
    }
}
