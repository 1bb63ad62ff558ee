use chrono::{DateTime, Utc};
use serde::Serialize;
use ticketdesk_core::TicketId;
use ticketdesk_db::{SqlTranscriptStore, TranscriptSummary};

use crate::commands::{with_database, CommandResult};

#[derive(Debug, Serialize)]
struct SummaryRow {
    ticket_id: String,
    ticket_type: String,
    creator_id: String,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    messages: i64,
}

impl From<TranscriptSummary> for SummaryRow {
    fn from(summary: TranscriptSummary) -> Self {
        Self {
            ticket_id: format!("#{}", summary.ticket_id.padded()),
            ticket_type: summary.ticket_type,
            creator_id: summary.creator_id.to_string(),
            created_at: summary.created_at,
            closed_at: summary.closed_at,
            messages: summary.message_count,
        }
    }
}

/// Prints the stored transcript as JSON. Exit code 6 when the id is not a
/// ticket reference, 7 when nothing is stored for it.
pub fn show(raw_id: &str) -> CommandResult {
    let Some(ticket_id) = TicketId::parse_reference(raw_id) else {
        return CommandResult::failure(
            "transcript",
            "invalid_ticket_id",
            format!("`{raw_id}` is not a ticket id"),
            6,
        );
    };

    with_database("transcript", |pool| async move {
        match SqlTranscriptStore::new(pool).find(ticket_id).await {
            Ok(Some(transcript)) => match serde_json::to_string_pretty(&transcript) {
                Ok(output) => CommandResult { exit_code: 0, output },
                Err(error) => {
                    CommandResult::failure("transcript", "serialization", error.to_string(), 8)
                }
            },
            Ok(None) => CommandResult::failure(
                "transcript",
                "not_found",
                format!("no transcript stored for ticket #{}", ticket_id.padded()),
                7,
            ),
            Err(error) => CommandResult::failure("transcript", "repository", error.to_string(), 8),
        }
    })
}

pub fn list(limit: u32) -> CommandResult {
    with_database("transcript", |pool| async move {
        let summaries = match SqlTranscriptStore::new(pool).list_recent(limit).await {
            Ok(summaries) => summaries,
            Err(error) => {
                return CommandResult::failure("transcript", "repository", error.to_string(), 8);
            }
        };

        let rows: Vec<SummaryRow> = summaries.into_iter().map(SummaryRow::from).collect();
        match serde_json::to_string_pretty(&rows) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("transcript", "serialization", error.to_string(), 8),
        }
    })
}
