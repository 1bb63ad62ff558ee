use std::sync::Arc;

use ticketdesk_core::config::{AppConfig, ConfigError};
use ticketdesk_core::platform::InMemoryPlatform;
use ticketdesk_db::{
    connect_with_settings, migrations, DbPool, JsonFileTranscriptStore, SqlAuditSink,
    SqlTranscriptStore,
};
use ticketdesk_gateway::{
    register_ticket_commands, CommandRegistry, GatewayRunner, NoopGatewayTransport,
    ReconnectPolicy, TicketDesk, TicketDeskSettings,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub desk: TicketDesk,
    pub gateway_runner: GatewayRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        guild_id = %config.guild.id,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    // The wire protocol is not part of this service; channels live in memory
    // until a platform transport is plugged in.
    let platform = Arc::new(InMemoryPlatform::default());
    let mut desk = TicketDesk::new(TicketDeskSettings::from(&config), platform)
        .with_transcript_handler(Arc::new(SqlTranscriptStore::new(db_pool.clone())))
        .with_audit_sink(Arc::new(SqlAuditSink::new(db_pool.clone())));
    if let Some(directory) = &config.tickets.transcript_dir {
        desk = desk.with_transcript_handler(Arc::new(JsonFileTranscriptStore::new(directory)));
    }

    let mut registry = CommandRegistry::new();
    register_ticket_commands(&mut registry, &desk);
    let registry = Arc::new(registry);

    let gateway_runner = GatewayRunner::new(
        Arc::new(NoopGatewayTransport),
        desk.dispatcher(Arc::clone(&registry)),
        ReconnectPolicy::from(&config.gateway),
    )
    .with_commands(config.guild.id, registry.definitions());

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        commands = registry.len(),
        transcript_handlers = ?desk.transcript_handler_names(),
        "application bootstrap complete"
    );

    Ok(Application { config, db_pool, desk, gateway_runner })
}
