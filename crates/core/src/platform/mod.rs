//! Channel provisioning capabilities the ticket system needs from the chat
//! platform. The wire protocol lives behind these traits.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::guild::{Category, TextChannel};
use crate::domain::ids::{ChannelId, GuildId, MessageId};
use crate::domain::message::ChannelMessage;
use crate::domain::permissions::PermissionOverwrite;
use crate::embed::OutgoingMessage;

pub use memory::{InMemoryPlatform, PlatformOperation, ProvisionedChannel};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform request forbidden: {0}")]
    Forbidden(String),
    #[error("platform resource not found: {0}")]
    NotFound(String),
    #[error("platform rate limited; retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("platform request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait ChannelProvisioning: Send + Sync {
    /// Looks up an existing category by exact name.
    async fn find_category(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Option<Category>, PlatformError>;

    async fn create_category(&self, guild_id: GuildId, name: &str)
        -> Result<Category, PlatformError>;

    async fn create_text_channel(
        &self,
        category: &Category,
        name: &str,
        overwrites: &[PermissionOverwrite],
    ) -> Result<TextChannel, PlatformError>;

    async fn send_message(
        &self,
        channel_id: ChannelId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, PlatformError>;

    /// Returns up to `limit` messages oldest-first, strictly after `after`
    /// when given. An empty page means the history is exhausted.
    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, PlatformError>;
}
