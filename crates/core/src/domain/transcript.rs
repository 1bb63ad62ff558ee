use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ids::{ChannelId, MessageId, TicketId, UserId};
use crate::domain::message::{Author, ChannelMessage};

/// One captured message. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub author: Author,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

impl TranscriptEntry {
    pub fn new(author: Author, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            author,
            content: content.into(),
            timestamp,
            attachments: Vec::new(),
            embeds: Vec::new(),
            message_id: None,
        }
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachments.push(attachment.into());
        self
    }

    pub fn with_embed(mut self, embed: Value) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

impl From<&ChannelMessage> for TranscriptEntry {
    fn from(message: &ChannelMessage) -> Self {
        Self {
            author: message.author.clone(),
            content: message.content.clone(),
            timestamp: message.timestamp,
            attachments: message
                .attachments
                .iter()
                .map(|attachment| attachment.filename.clone())
                .collect(),
            embeds: message.embeds.clone(),
            message_id: Some(message.id),
        }
    }
}

/// Chronological record of a ticket's channel.
///
/// Entries are append-only: insertion order is chronological order and
/// nothing is reordered or removed once added.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub ticket_id: TicketId,
    pub channel_id: ChannelId,
    pub creator_id: UserId,
    pub ticket_type: String,
    #[serde(default)]
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: Vec<TranscriptEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Transcript {
    pub fn new(
        ticket_id: TicketId,
        channel_id: ChannelId,
        creator_id: UserId,
        ticket_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket_id,
            channel_id,
            creator_id,
            ticket_type: ticket_type.into(),
            reason: String::new(),
            created_at,
            closed_at: None,
            entries: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn add_entry(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn close(&mut self, closed_at: DateTime<Utc>) {
        self.closed_at = Some(closed_at);
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    /// Time between creation and closure, or until `now` while still open.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        self.closed_at.unwrap_or(now) - self.created_at
    }

    pub fn duration(&self) -> Duration {
        self.duration_at(Utc::now())
    }

    /// `"{hours}h {minutes}m"`, e.g. `"26h 5m"`.
    pub fn formatted_duration_at(&self, now: DateTime<Utc>) -> String {
        let total_minutes = self.duration_at(now).num_minutes().max(0);
        format!("{}h {}m", total_minutes / 60, total_minutes % 60)
    }

    pub fn formatted_duration(&self) -> String {
        self.formatted_duration_at(Utc::now())
    }

    pub fn message_count(&self) -> usize {
        self.entries.len()
    }

    pub fn unique_participants(&self) -> BTreeSet<UserId> {
        self.entries.iter().map(|entry| entry.author.id).collect()
    }
}
