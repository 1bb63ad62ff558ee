use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ids::{ChannelId, GuildId};
use crate::system::{TicketSettings, DEFAULT_HISTORY_PAGE_SIZE};
use crate::ticket_type::TicketTypeDescriptor;

/// Largest history page the platform serves in one request.
pub const MAX_HISTORY_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub guild: GuildConfig,
    pub tickets: TicketsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub token: SecretString,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct GuildConfig {
    pub id: GuildId,
    pub default_category: String,
    pub archive_channel_id: ChannelId,
}

#[derive(Clone, Debug)]
pub struct TicketsConfig {
    pub history_page_size: usize,
    pub max_open_per_user: Option<usize>,
    /// Directory for JSON transcript files; the file handler is off when unset.
    pub transcript_dir: Option<PathBuf>,
    pub types: Vec<TicketTypeDescriptor>,
}

impl TicketsConfig {
    pub fn settings(&self) -> TicketSettings {
        TicketSettings {
            history_page_size: self.history_page_size,
            max_open_per_user: self.max_open_per_user,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub gateway_token: Option<String>,
    pub guild_id: Option<u64>,
    pub archive_channel_id: Option<u64>,
    pub transcript_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://ticketdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            gateway: GatewayConfig {
                token: String::new().into(),
                reconnect_base_delay_ms: 1_000,
                reconnect_max_delay_ms: 60_000,
                max_reconnect_attempts: 10,
            },
            guild: GuildConfig {
                id: GuildId(0),
                default_category: "Tickets".to_string(),
                archive_channel_id: ChannelId::UNPROVISIONED,
            },
            tickets: TicketsConfig {
                history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
                max_open_per_user: None,
                transcript_dir: None,
                types: Vec::new(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("ticketdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(token) = gateway.token {
                self.gateway.token = secret_value(token);
            }
            if let Some(base) = gateway.reconnect_base_delay_ms {
                self.gateway.reconnect_base_delay_ms = base;
            }
            if let Some(max) = gateway.reconnect_max_delay_ms {
                self.gateway.reconnect_max_delay_ms = max;
            }
            if let Some(attempts) = gateway.max_reconnect_attempts {
                self.gateway.max_reconnect_attempts = attempts;
            }
        }

        if let Some(guild) = patch.guild {
            if let Some(id) = guild.id {
                self.guild.id = GuildId(id);
            }
            if let Some(default_category) = guild.default_category {
                self.guild.default_category = default_category;
            }
            if let Some(archive_channel_id) = guild.archive_channel_id {
                self.guild.archive_channel_id = ChannelId(archive_channel_id);
            }
        }

        if let Some(tickets) = patch.tickets {
            if let Some(history_page_size) = tickets.history_page_size {
                self.tickets.history_page_size = history_page_size;
            }
            if let Some(max_open_per_user) = tickets.max_open_per_user {
                self.tickets.max_open_per_user = Some(max_open_per_user);
            }
            if let Some(transcript_dir) = tickets.transcript_dir {
                self.tickets.transcript_dir = Some(transcript_dir);
            }
            if let Some(types) = tickets.types {
                self.tickets.types = types;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TICKETDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TICKETDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TICKETDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TICKETDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TICKETDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let token = read_env("TICKETDESK_GATEWAY_TOKEN").or_else(|| read_env("DISCORD_TOKEN"));
        if let Some(value) = token {
            self.gateway.token = secret_value(value);
        }
        if let Some(value) = read_env("TICKETDESK_GATEWAY_MAX_RECONNECT_ATTEMPTS") {
            self.gateway.max_reconnect_attempts =
                parse_u32("TICKETDESK_GATEWAY_MAX_RECONNECT_ATTEMPTS", &value)?;
        }

        if let Some(value) = read_env("TICKETDESK_GUILD_ID") {
            self.guild.id = GuildId(parse_u64("TICKETDESK_GUILD_ID", &value)?);
        } else if let Some(value) = read_env("GUILD_ID") {
            self.guild.id = GuildId(parse_u64("GUILD_ID", &value)?);
        }
        if let Some(value) = read_env("TICKETDESK_GUILD_DEFAULT_CATEGORY") {
            self.guild.default_category = value;
        }
        if let Some(value) = read_env("TICKETDESK_GUILD_ARCHIVE_CHANNEL_ID") {
            self.guild.archive_channel_id =
                ChannelId(parse_u64("TICKETDESK_GUILD_ARCHIVE_CHANNEL_ID", &value)?);
        }

        if let Some(value) = read_env("TICKETDESK_TICKETS_HISTORY_PAGE_SIZE") {
            self.tickets.history_page_size =
                parse_usize("TICKETDESK_TICKETS_HISTORY_PAGE_SIZE", &value)?;
        }
        if let Some(value) = read_env("TICKETDESK_TICKETS_MAX_OPEN_PER_USER") {
            self.tickets.max_open_per_user =
                Some(parse_usize("TICKETDESK_TICKETS_MAX_OPEN_PER_USER", &value)?);
        }
        if let Some(value) = read_env("TICKETDESK_TICKETS_TRANSCRIPT_DIR") {
            self.tickets.transcript_dir = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("TICKETDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TICKETDESK_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("TICKETDESK_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("TICKETDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TICKETDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("DEBUG_MODE") {
            if parse_flag("DEBUG_MODE", &value)? {
                self.logging.level = "debug".to_string();
            }
        }
        let log_level =
            read_env("TICKETDESK_LOGGING_LEVEL").or_else(|| read_env("TICKETDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TICKETDESK_LOGGING_FORMAT").or_else(|| read_env("TICKETDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(gateway_token) = overrides.gateway_token {
            self.gateway.token = secret_value(gateway_token);
        }
        if let Some(guild_id) = overrides.guild_id {
            self.guild.id = GuildId(guild_id);
        }
        if let Some(archive_channel_id) = overrides.archive_channel_id {
            self.guild.archive_channel_id = ChannelId(archive_channel_id);
        }
        if let Some(transcript_dir) = overrides.transcript_dir {
            self.tickets.transcript_dir = Some(transcript_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_gateway(&self.gateway)?;
        validate_guild(&self.guild)?;
        validate_tickets(&self.tickets)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ticketdesk.toml"), PathBuf::from("config/ticketdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    let token = gateway.token.expose_secret();
    if token.trim().is_empty() {
        return Err(ConfigError::Validation(
            "gateway.token is required (set TICKETDESK_GATEWAY_TOKEN or DISCORD_TOKEN)"
                .to_string(),
        ));
    }
    if token.starts_with("Bot ") {
        return Err(ConfigError::Validation(
            "gateway.token must be the raw bot token without the `Bot ` prefix".to_string(),
        ));
    }

    if gateway.reconnect_base_delay_ms == 0
        || gateway.reconnect_base_delay_ms > gateway.reconnect_max_delay_ms
    {
        return Err(ConfigError::Validation(
            "gateway.reconnect_base_delay_ms must be positive and not exceed reconnect_max_delay_ms"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_guild(guild: &GuildConfig) -> Result<(), ConfigError> {
    if guild.id.get() == 0 {
        return Err(ConfigError::Validation(
            "guild.id is required (set TICKETDESK_GUILD_ID or GUILD_ID)".to_string(),
        ));
    }
    if guild.default_category.trim().is_empty() {
        return Err(ConfigError::Validation(
            "guild.default_category must not be empty".to_string(),
        ));
    }
    if !guild.archive_channel_id.is_provisioned() {
        return Err(ConfigError::Validation(
            "guild.archive_channel_id is required (set TICKETDESK_GUILD_ARCHIVE_CHANNEL_ID)"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_tickets(tickets: &TicketsConfig) -> Result<(), ConfigError> {
    if tickets.history_page_size == 0 || tickets.history_page_size > MAX_HISTORY_PAGE_SIZE {
        return Err(ConfigError::Validation(format!(
            "tickets.history_page_size must be in range 1..={MAX_HISTORY_PAGE_SIZE}"
        )));
    }

    if tickets.max_open_per_user == Some(0) {
        return Err(ConfigError::Validation(
            "tickets.max_open_per_user must be greater than zero; omit it for no limit"
                .to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for descriptor in &tickets.types {
        let identifier = descriptor.identifier.trim();
        if identifier.is_empty() {
            return Err(ConfigError::Validation(
                "tickets.types entries need a non-empty identifier".to_string(),
            ));
        }
        if identifier.contains(char::is_whitespace) {
            return Err(ConfigError::Validation(format!(
                "ticket type `{identifier}` must not contain whitespace"
            )));
        }
        if !seen.insert(identifier) {
            return Err(ConfigError::Validation(format!(
                "ticket type `{identifier}` is declared more than once"
            )));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_override(key, value)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    gateway: Option<GatewayPatch>,
    guild: Option<GuildPatch>,
    tickets: Option<TicketsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    token: Option<String>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GuildPatch {
    id: Option<u64>,
    default_category: Option<String>,
    archive_channel_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TicketsPatch {
    history_page_size: Option<usize>,
    max_open_per_user: Option<usize>,
    transcript_dir: Option<PathBuf>,
    types: Option<Vec<TicketTypeDescriptor>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
