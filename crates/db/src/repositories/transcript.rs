use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use ticketdesk_core::domain::ids::{ChannelId, MessageId, TicketId, UserId};
use ticketdesk_core::domain::message::Author;
use ticketdesk_core::domain::transcript::{Transcript, TranscriptEntry};
use ticketdesk_core::transcripts::{TranscriptHandler, TranscriptHandlerError};
use tracing::debug;

use super::RepositoryError;
use crate::DbPool;

/// Row of the transcript listing, without entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptSummary {
    pub ticket_id: TicketId,
    pub ticket_type: String,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub message_count: i64,
}

pub struct SqlTranscriptStore {
    pool: DbPool,
}

impl SqlTranscriptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Writes `transcript` and replaces any entries stored for the same
    /// ticket, in one transaction.
    pub async fn save(&self, transcript: &Transcript) -> Result<(), RepositoryError> {
        let ticket_key = ticket_key(transcript.ticket_id)?;
        let metadata_json = serde_json::to_string(&transcript.metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO ticket_transcript (ticket_id, channel_id, creator_id, ticket_type, reason,
                                            created_at, closed_at, metadata_json, saved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(ticket_id) DO UPDATE SET
                 channel_id = excluded.channel_id,
                 creator_id = excluded.creator_id,
                 ticket_type = excluded.ticket_type,
                 reason = excluded.reason,
                 created_at = excluded.created_at,
                 closed_at = excluded.closed_at,
                 metadata_json = excluded.metadata_json,
                 saved_at = excluded.saved_at",
        )
        .bind(ticket_key)
        .bind(transcript.channel_id.to_string())
        .bind(transcript.creator_id.to_string())
        .bind(&transcript.ticket_type)
        .bind(&transcript.reason)
        .bind(transcript.created_at.to_rfc3339())
        .bind(transcript.closed_at.map(|closed_at| closed_at.to_rfc3339()))
        .bind(metadata_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM transcript_entry WHERE ticket_id = ?")
            .bind(ticket_key)
            .execute(&mut *tx)
            .await?;

        for (position, entry) in transcript.entries().iter().enumerate() {
            sqlx::query(
                "INSERT INTO transcript_entry (ticket_id, position, message_id, author_id,
                                               author_name, author_display_name, author_avatar_url,
                                               content, sent_at, attachments_json, embeds_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(ticket_key)
            .bind(position as i64)
            .bind(entry.message_id.map(|message_id| message_id.to_string()))
            .bind(entry.author.id.to_string())
            .bind(&entry.author.name)
            .bind(&entry.author.display_name)
            .bind(&entry.author.avatar_url)
            .bind(&entry.content)
            .bind(entry.timestamp.to_rfc3339())
            .bind(serde_json::to_string(&entry.attachments)?)
            .bind(serde_json::to_string(&entry.embeds)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            ticket_id = %transcript.ticket_id,
            entries = transcript.message_count(),
            "transcript stored in sqlite"
        );
        Ok(())
    }

    pub async fn find(&self, ticket_id: TicketId) -> Result<Option<Transcript>, RepositoryError> {
        let ticket_key = ticket_key(ticket_id)?;
        let row = sqlx::query(
            "SELECT ticket_id, channel_id, creator_id, ticket_type, reason, created_at, closed_at,
                    metadata_json
             FROM ticket_transcript WHERE ticket_id = ?",
        )
        .bind(ticket_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut transcript = row_to_transcript(&row)?;

        let entries = sqlx::query(
            "SELECT message_id, author_id, author_name, author_display_name, author_avatar_url,
                    content, sent_at, attachments_json, embeds_json
             FROM transcript_entry WHERE ticket_id = ? ORDER BY position ASC",
        )
        .bind(ticket_key)
        .fetch_all(&self.pool)
        .await?;
        for entry in &entries {
            transcript.add_entry(row_to_entry(entry)?);
        }

        Ok(Some(transcript))
    }

    /// Most recently created transcripts first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<TranscriptSummary>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT t.ticket_id, t.ticket_type, t.creator_id, t.created_at, t.closed_at,
                    (SELECT COUNT(*) FROM transcript_entry e WHERE e.ticket_id = t.ticket_id)
                        AS message_count
             FROM ticket_transcript t
             ORDER BY t.ticket_id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TranscriptSummary, RepositoryError> {
                Ok(TranscriptSummary {
                    ticket_id: TicketId(ticket_from_key(decode(row, "ticket_id")?)?),
                    ticket_type: decode(row, "ticket_type")?,
                    creator_id: UserId(parse_snowflake(
                        "creator_id",
                        &decode::<String>(row, "creator_id")?,
                    )?),
                    created_at: parse_timestamp(
                        "created_at",
                        &decode::<String>(row, "created_at")?,
                    )?,
                    closed_at: decode::<Option<String>>(row, "closed_at")?
                        .map(|value| parse_timestamp("closed_at", &value))
                        .transpose()?,
                    message_count: decode(row, "message_count")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TranscriptHandler for SqlTranscriptStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_transcript(&self, transcript: &Transcript) -> Result<(), TranscriptHandlerError> {
        self.save(transcript).await.map_err(TranscriptHandlerError::from)
    }

    async fn get_transcript(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<Transcript>, TranscriptHandlerError> {
        self.find(ticket_id).await.map_err(TranscriptHandlerError::from)
    }
}

fn ticket_key(ticket_id: TicketId) -> Result<i64, RepositoryError> {
    i64::try_from(ticket_id.get())
        .map_err(|_| RepositoryError::Decode(format!("ticket id {ticket_id} exceeds sqlite range")))
}

fn ticket_from_key(key: i64) -> Result<u64, RepositoryError> {
    u64::try_from(key).map_err(|_| RepositoryError::Decode(format!("negative ticket id {key}")))
}

fn decode<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn parse_snowflake(column: &str, value: &str) -> Result<u64, RepositoryError> {
    value
        .parse::<u64>()
        .map_err(|_| RepositoryError::Decode(format!("{column}: `{value}` is not a snowflake")))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_transcript(row: &SqliteRow) -> Result<Transcript, RepositoryError> {
    let ticket_id = TicketId(ticket_from_key(decode(row, "ticket_id")?)?);
    let channel_id = ChannelId(parse_snowflake("channel_id", &decode::<String>(row, "channel_id")?)?);
    let creator_id = UserId(parse_snowflake("creator_id", &decode::<String>(row, "creator_id")?)?);
    let ticket_type: String = decode(row, "ticket_type")?;
    let created_at = parse_timestamp("created_at", &decode::<String>(row, "created_at")?)?;

    let mut transcript = Transcript::new(ticket_id, channel_id, creator_id, ticket_type, created_at);
    transcript.reason = decode(row, "reason")?;
    transcript.closed_at = decode::<Option<String>>(row, "closed_at")?
        .map(|value| parse_timestamp("closed_at", &value))
        .transpose()?;
    transcript.metadata =
        serde_json::from_str::<BTreeMap<String, Value>>(&decode::<String>(row, "metadata_json")?)?;
    Ok(transcript)
}

fn row_to_entry(row: &SqliteRow) -> Result<TranscriptEntry, RepositoryError> {
    let author = Author {
        id: UserId(parse_snowflake("author_id", &decode::<String>(row, "author_id")?)?),
        name: decode(row, "author_name")?,
        display_name: decode(row, "author_display_name")?,
        avatar_url: decode(row, "author_avatar_url")?,
    };
    let message_id = decode::<Option<String>>(row, "message_id")?
        .map(|value| parse_snowflake("message_id", &value).map(MessageId))
        .transpose()?;

    Ok(TranscriptEntry {
        author,
        content: decode(row, "content")?,
        timestamp: parse_timestamp("sent_at", &decode::<String>(row, "sent_at")?)?,
        attachments: serde_json::from_str(&decode::<String>(row, "attachments_json")?)?,
        embeds: serde_json::from_str(&decode::<String>(row, "embeds_json")?)?,
        message_id,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use ticketdesk_core::domain::ids::{ChannelId, MessageId, TicketId, UserId};
    use ticketdesk_core::domain::message::Author;
    use ticketdesk_core::domain::transcript::{Transcript, TranscriptEntry};
    use ticketdesk_core::transcripts::TranscriptHandler;

    use super::SqlTranscriptStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlTranscriptStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlTranscriptStore::new(pool)
    }

    fn sample_transcript(ticket_id: u64) -> Transcript {
        let created_at = Utc::now() - Duration::minutes(90);
        let mut transcript = Transcript::new(
            TicketId(ticket_id),
            ChannelId(5_000 + ticket_id),
            UserId(123),
            "support",
            created_at,
        );
        transcript.reason = "printer on fire".to_owned();
        transcript.metadata.insert("priority".to_owned(), json!("high"));
        transcript.add_entry(
            TranscriptEntry::new(Author::new(UserId(123), "requester"), "help", created_at)
                .with_message_id(MessageId(9_001))
                .with_attachment("photo.png"),
        );
        transcript.add_entry(
            TranscriptEntry::new(
                Author::new(UserId(1), "admin"),
                "",
                created_at + Duration::minutes(1),
            )
            .with_embed(json!({ "title": "🎫 Support #0001" })),
        );
        transcript.close(created_at + Duration::minutes(90));
        transcript
    }

    #[tokio::test]
    async fn save_and_find_preserves_entries_in_order() {
        let store = setup().await;
        let transcript = sample_transcript(1);

        store.save_transcript(&transcript).await.expect("save");
        let found = store.get_transcript(TicketId(1)).await.expect("find").expect("stored");

        assert_eq!(found, transcript);
        assert_eq!(found.entries()[0].attachments, vec!["photo.png".to_owned()]);
        assert_eq!(found.entries()[1].embeds[0]["title"], "🎫 Support #0001");
    }

    #[tokio::test]
    async fn saving_twice_replaces_entries() {
        let store = setup().await;
        let mut transcript = sample_transcript(2);
        store.save(&transcript).await.expect("first save");

        transcript.add_entry(TranscriptEntry::new(Author::new(UserId(7), "late"), "bye", Utc::now()));
        store.save(&transcript).await.expect("second save");

        let found = store.find(TicketId(2)).await.expect("find").expect("stored");
        assert_eq!(found.message_count(), 3);
    }

    #[tokio::test]
    async fn missing_transcript_is_none() {
        let store = setup().await;
        assert!(store.find(TicketId(404)).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn list_recent_counts_entries() {
        let store = setup().await;
        store.save(&sample_transcript(1)).await.expect("save 1");
        store.save(&sample_transcript(2)).await.expect("save 2");

        let summaries = store.list_recent(10).await.expect("list");

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].ticket_id, TicketId(2));
        assert_eq!(summaries[0].message_count, 2);
        assert!(summaries[1].closed_at.is_some());
    }
}
