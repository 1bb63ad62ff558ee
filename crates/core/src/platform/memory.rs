use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{ChannelProvisioning, PlatformError};
use crate::domain::guild::{Category, TextChannel};
use crate::domain::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::domain::message::{Author, ChannelMessage};
use crate::domain::permissions::PermissionOverwrite;
use crate::embed::OutgoingMessage;

const FIRST_SNOWFLAKE: u64 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformOperation {
    FindCategory,
    CreateCategory,
    CreateTextChannel,
    SendMessage,
    FetchHistory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedChannel {
    pub channel: TextChannel,
    pub overwrites: Vec<PermissionOverwrite>,
}

/// Deterministic platform kept entirely in process memory.
///
/// Ids are allocated from one increasing counter, so message ids also order
/// history. Failures can be queued per operation with [`InMemoryPlatform::fail_next`].
pub struct InMemoryPlatform {
    bot: Author,
    state: Mutex<PlatformState>,
}

#[derive(Default)]
struct PlatformState {
    last_id: u64,
    categories: Vec<Category>,
    channels: Vec<ProvisionedChannel>,
    messages: BTreeMap<ChannelId, Vec<ChannelMessage>>,
    failures: HashMap<PlatformOperation, VecDeque<PlatformError>>,
    history_requests: usize,
}

impl PlatformState {
    fn allocate_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    fn take_failure(&mut self, operation: PlatformOperation) -> Result<(), PlatformError> {
        match self.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn push_message(
        &mut self,
        channel_id: ChannelId,
        author: Author,
        content: String,
        embeds: Vec<serde_json::Value>,
    ) -> Result<MessageId, PlatformError> {
        let id = MessageId(self.allocate_id());
        let history = self
            .messages
            .get_mut(&channel_id)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))?;
        history.push(ChannelMessage {
            id,
            channel_id,
            author,
            content,
            timestamp: Utc::now(),
            attachments: Vec::new(),
            embeds,
        });
        Ok(id)
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new(Author::new(UserId(1), "ticketdesk"))
    }
}

impl InMemoryPlatform {
    pub fn new(bot: Author) -> Self {
        Self {
            bot,
            state: Mutex::new(PlatformState { last_id: FIRST_SNOWFLAKE, ..PlatformState::default() }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PlatformState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn bot(&self) -> &Author {
        &self.bot
    }

    /// Makes the next call of `operation` fail with `error`. Queued failures
    /// are consumed in order.
    pub fn fail_next(&self, operation: PlatformOperation, error: PlatformError) {
        self.state().failures.entry(operation).or_default().push_back(error);
    }

    pub fn seed_category(&self, guild_id: GuildId, name: &str) -> Category {
        let mut state = self.state();
        let category =
            Category { id: ChannelId(state.allocate_id()), guild_id, name: name.to_owned() };
        state.categories.push(category.clone());
        category
    }

    pub fn seed_text_channel(&self, guild_id: GuildId, name: &str) -> TextChannel {
        let mut state = self.state();
        let channel = TextChannel {
            id: ChannelId(state.allocate_id()),
            guild_id,
            category_id: None,
            name: name.to_owned(),
        };
        state.messages.insert(channel.id, Vec::new());
        state.channels.push(ProvisionedChannel { channel: channel.clone(), overwrites: Vec::new() });
        channel
    }

    pub fn seed_message(
        &self,
        channel_id: ChannelId,
        author: Author,
        content: &str,
    ) -> Result<MessageId, PlatformError> {
        self.state().push_message(channel_id, author, content.to_owned(), Vec::new())
    }

    pub fn categories(&self) -> Vec<Category> {
        self.state().categories.clone()
    }

    pub fn channels(&self) -> Vec<ProvisionedChannel> {
        self.state().channels.clone()
    }

    pub fn channel_named(&self, name: &str) -> Option<ProvisionedChannel> {
        self.state().channels.iter().find(|provisioned| provisioned.channel.name == name).cloned()
    }

    pub fn messages(&self, channel_id: ChannelId) -> Vec<ChannelMessage> {
        self.state().messages.get(&channel_id).cloned().unwrap_or_default()
    }

    pub fn history_requests(&self) -> usize {
        self.state().history_requests
    }
}

#[async_trait]
impl ChannelProvisioning for InMemoryPlatform {
    async fn find_category(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Option<Category>, PlatformError> {
        let mut state = self.state();
        state.take_failure(PlatformOperation::FindCategory)?;
        Ok(state
            .categories
            .iter()
            .find(|category| category.guild_id == guild_id && category.name == name)
            .cloned())
    }

    async fn create_category(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Category, PlatformError> {
        let mut state = self.state();
        state.take_failure(PlatformOperation::CreateCategory)?;
        let category =
            Category { id: ChannelId(state.allocate_id()), guild_id, name: name.to_owned() };
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn create_text_channel(
        &self,
        category: &Category,
        name: &str,
        overwrites: &[PermissionOverwrite],
    ) -> Result<TextChannel, PlatformError> {
        let mut state = self.state();
        state.take_failure(PlatformOperation::CreateTextChannel)?;
        if !state.categories.iter().any(|known| known.id == category.id) {
            return Err(PlatformError::NotFound(format!("category {}", category.id)));
        }

        let channel = TextChannel {
            id: ChannelId(state.allocate_id()),
            guild_id: category.guild_id,
            category_id: Some(category.id),
            name: name.to_owned(),
        };
        state.messages.insert(channel.id, Vec::new());
        state
            .channels
            .push(ProvisionedChannel { channel: channel.clone(), overwrites: overwrites.to_vec() });
        Ok(channel)
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        message: &OutgoingMessage,
    ) -> Result<MessageId, PlatformError> {
        let mut state = self.state();
        state.take_failure(PlatformOperation::SendMessage)?;
        let embeds = message.embeds.iter().map(|embed| embed.to_value()).collect();
        state.push_message(
            channel_id,
            self.bot.clone(),
            message.content.clone().unwrap_or_default(),
            embeds,
        )
    }

    async fn fetch_history(
        &self,
        channel_id: ChannelId,
        after: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>, PlatformError> {
        let mut state = self.state();
        state.take_failure(PlatformOperation::FetchHistory)?;
        state.history_requests += 1;
        let history = state
            .messages
            .get(&channel_id)
            .ok_or_else(|| PlatformError::NotFound(format!("channel {channel_id}")))?;

        Ok(history
            .iter()
            .filter(|message| after.map_or(true, |after| message.id > after))
            .take(limit)
            .cloned()
            .collect())
    }
}
