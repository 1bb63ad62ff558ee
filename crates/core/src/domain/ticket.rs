use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::guild::{Member, TextChannel};
use crate::domain::ids::{ChannelId, MessageId, TicketId, UserId};
use crate::domain::transcript::{Transcript, TranscriptEntry};
use crate::errors::DomainError;
use crate::platform::{ChannelProvisioning, PlatformError};
use crate::ticket_type::TicketType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Closed,
    Archived,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent description of one ticket.
///
/// `closed_at` is set exactly when `status` is not [`TicketStatus::Open`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketConfig {
    pub ticket_id: TicketId,
    channel_id: ChannelId,
    pub creator_id: UserId,
    pub ticket_type: String,
    status: TicketStatus,
    pub created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl TicketConfig {
    pub fn new(
        ticket_id: TicketId,
        creator_id: UserId,
        ticket_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticket_id,
            channel_id: ChannelId::UNPROVISIONED,
            creator_id,
            ticket_type: ticket_type.into(),
            status: TicketStatus::Open,
            created_at,
            closed_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn status(&self) -> TicketStatus {
        self.status
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Stamps the channel created for this ticket.
    pub fn provision(&mut self, channel_id: ChannelId) {
        self.channel_id = channel_id;
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self.status, next),
            (TicketStatus::Open, TicketStatus::Closed)
                | (TicketStatus::Open, TicketStatus::Archived)
                | (TicketStatus::Closed, TicketStatus::Archived)
        )
    }

    /// Moves to `next`. Leaving `Open` stamps `closed_at`; archiving an
    /// already closed ticket keeps the original closure time.
    pub fn transition_to(
        &mut self,
        next: TicketStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTicketTransition { from: self.status, to: next });
        }

        if self.closed_at.is_none() {
            self.closed_at = Some(at);
        }
        self.status = next;
        Ok(())
    }

    pub fn close(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(TicketStatus::Closed, at)
    }

    pub fn archive(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(TicketStatus::Archived, at)
    }
}

/// A live ticket: its config, the channel it lives in, who opened it and
/// the transcript it exclusively owns.
pub struct Ticket {
    config: TicketConfig,
    channel: TextChannel,
    creator: Member,
    ticket_type: Arc<dyn TicketType>,
    transcript: Transcript,
}

impl Ticket {
    pub fn new(
        config: TicketConfig,
        channel: TextChannel,
        creator: Member,
        ticket_type: Arc<dyn TicketType>,
    ) -> Self {
        let transcript = Transcript::new(
            config.ticket_id,
            config.channel_id,
            config.creator_id,
            ticket_type.identifier(),
            config.created_at,
        );
        Self { config, channel, creator, ticket_type, transcript }
    }

    pub fn ticket_id(&self) -> TicketId {
        self.config.ticket_id
    }

    pub fn status(&self) -> TicketStatus {
        self.config.status
    }

    pub fn config(&self) -> &TicketConfig {
        &self.config
    }

    pub fn channel(&self) -> &TextChannel {
        &self.channel
    }

    pub fn creator(&self) -> &Member {
        &self.creator
    }

    pub fn ticket_type(&self) -> &Arc<dyn TicketType> {
        &self.ticket_type
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Appends the channel's whole history to the transcript, oldest first,
    /// paging `page_size` messages at a time.
    ///
    /// On a failed page the entries gathered so far stay in the transcript
    /// and the error is returned.
    pub async fn collect_messages(
        &mut self,
        platform: &dyn ChannelProvisioning,
        page_size: usize,
    ) -> Result<usize, PlatformError> {
        let page_size = page_size.max(1);
        let mut cursor: Option<MessageId> = None;
        let mut collected = 0;

        loop {
            let page = platform.fetch_history(self.channel.id, cursor, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.id);

            let full_page = page.len() >= page_size;
            for message in &page {
                self.transcript.add_entry(TranscriptEntry::from(message));
            }
            collected += page.len();

            if !full_page {
                break;
            }
        }

        debug!(
            event_name = "ticket.history_collected",
            ticket_id = %self.config.ticket_id,
            channel_id = %self.channel.id,
            collected,
            "collected ticket channel history"
        );
        Ok(collected)
    }

    /// Closes config and transcript with the same timestamp.
    pub fn close(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.config.close(at)?;
        self.transcript.close(at);
        Ok(())
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("config", &self.config)
            .field("channel", &self.channel)
            .field("creator", &self.creator.id)
            .field("ticket_type", &self.ticket_type.identifier())
            .field("entries", &self.transcript.message_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::{Ticket, TicketConfig, TicketStatus};
    use crate::domain::guild::{Member, TextChannel};
    use crate::domain::ids::{ChannelId, GuildId, TicketId, UserId};
    use crate::domain::message::Author;
    use crate::errors::DomainError;
    use crate::platform::{InMemoryPlatform, PlatformError, PlatformOperation};
    use crate::ticket_type::{StandardTicketType, TicketTypeDescriptor};

    fn config() -> TicketConfig {
        TicketConfig::new(TicketId(1), UserId(123), "support", Utc::now())
    }

    fn ticket(platform: &InMemoryPlatform) -> Ticket {
        let channel = platform.seed_text_channel(GuildId(1), "sup-0001");
        let mut config = config();
        config.provision(channel.id);
        Ticket::new(
            config,
            TextChannel { category_id: None, ..channel },
            Member::new(UserId(123), "requester"),
            Arc::new(StandardTicketType::new(TicketTypeDescriptor::new("support", "Support"))),
        )
    }

    #[test]
    fn new_config_is_open_and_unprovisioned() {
        let config = config();

        assert_eq!(config.status(), TicketStatus::Open);
        assert_eq!(config.channel_id(), ChannelId::UNPROVISIONED);
        assert!(config.closed_at().is_none());
    }

    #[test]
    fn provisioning_stamps_only_the_channel() {
        let mut config = config();
        config.provision(ChannelId(981));

        assert_eq!(config.channel_id(), ChannelId(981));
        assert_eq!(config.status(), TicketStatus::Open);
        assert!(config.closed_at().is_none());
    }

    #[test]
    fn closing_stamps_closed_at() {
        let mut config = config();
        let at = config.created_at + Duration::minutes(5);
        config.close(at).expect("open -> closed");

        assert_eq!(config.status(), TicketStatus::Closed);
        assert_eq!(config.closed_at(), Some(at));
    }

    #[test]
    fn archiving_closed_ticket_keeps_original_closure_time() {
        let mut config = config();
        let closed_at = config.created_at + Duration::minutes(5);
        config.close(closed_at).expect("open -> closed");
        config.archive(closed_at + Duration::days(1)).expect("closed -> archived");

        assert_eq!(config.status(), TicketStatus::Archived);
        assert_eq!(config.closed_at(), Some(closed_at));
    }

    #[test]
    fn closing_twice_is_rejected() {
        let mut config = config();
        config.close(Utc::now()).expect("first close");
        let error = config.close(Utc::now()).expect_err("second close should fail");

        assert_eq!(
            error,
            DomainError::InvalidTicketTransition {
                from: TicketStatus::Closed,
                to: TicketStatus::Closed
            }
        );
    }

    #[tokio::test]
    async fn collect_messages_pages_through_full_history() {
        let platform = InMemoryPlatform::default();
        let mut ticket = ticket(&platform);
        for index in 0..7 {
            platform
                .seed_message(ticket.channel().id, Author::new(UserId(123), "requester"), &format!("m{index}"))
                .expect("seed");
        }

        let collected = ticket.collect_messages(&platform, 3).await.expect("collect");

        assert_eq!(collected, 7);
        assert_eq!(platform.history_requests(), 3);
        let contents: Vec<_> =
            ticket.transcript().entries().iter().map(|entry| entry.content.clone()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn collect_messages_surfaces_fetch_failure() {
        let platform = InMemoryPlatform::default();
        let mut ticket = ticket(&platform);
        platform
            .seed_message(ticket.channel().id, Author::new(UserId(9), "staff"), "hello")
            .expect("seed");
        platform.fail_next(PlatformOperation::FetchHistory, PlatformError::Request("reset".into()));

        let error = ticket.collect_messages(&platform, 2).await.expect_err("fetch should fail");

        assert_eq!(error, PlatformError::Request("reset".into()));
        assert_eq!(ticket.transcript().message_count(), 0);
    }

    #[test]
    fn ticket_close_updates_config_and_transcript_together() {
        let platform = InMemoryPlatform::default();
        let mut ticket = ticket(&platform);
        let at = ticket.config().created_at + Duration::seconds(30);

        ticket.close(at).expect("close");

        assert_eq!(ticket.status(), TicketStatus::Closed);
        assert_eq!(ticket.config().closed_at(), Some(at));
        assert_eq!(ticket.transcript().closed_at, Some(at));
        assert_eq!(ticket.transcript().ticket_type, "support");
    }
}
