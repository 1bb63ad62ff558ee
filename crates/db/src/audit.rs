use ticketdesk_core::audit::{AuditEvent, AuditSink};
use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::DbPool;

/// Appends audit events to the `audit_event` table.
///
/// `emit` is synchronous, so each insert runs as a detached task on the
/// current runtime; write failures are logged and otherwise dropped.
#[derive(Clone)]
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, event: &AuditEvent) -> Result<(), sqlx::Error> {
        let metadata_json = serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".into());
        let ticket_id = event.ticket_id.and_then(|id| i64::try_from(id.get()).ok());

        sqlx::query(
            "INSERT INTO audit_event (event_id, ticket_id, channel_id, event_type, category, actor,
                                      outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(ticket_id)
        .bind(event.channel_id.map(|id| id.to_string()))
        .bind(&event.event_type)
        .bind(format!("{:?}", event.category).to_ascii_lowercase())
        .bind(&event.actor)
        .bind(format!("{:?}", event.outcome).to_ascii_lowercase())
        .bind(metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl AuditSink for SqlAuditSink {
    fn emit(&self, event: AuditEvent) {
        let Ok(handle) = Handle::try_current() else {
            warn!(event_type = %event.event_type, "no async runtime; audit event dropped");
            return;
        };

        let sink = self.clone();
        handle.spawn(async move {
            if let Err(e) = sink.record(&event).await {
                error!(
                    event_name = "audit.write_failed",
                    event_type = %event.event_type,
                    error = %e,
                    "failed to write audit event"
                );
            }
        });
    }
}
