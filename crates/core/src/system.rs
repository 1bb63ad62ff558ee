//! The ticket lifecycle manager.
//!
//! Owns every open ticket of one guild, allocates ids, provisions channels
//! through [`ChannelProvisioning`] and hands closed transcripts to every
//! registered [`TranscriptHandler`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use crate::domain::guild::{Category, Guild, Member};
use crate::domain::ids::{ChannelId, TicketId, UserId};
use crate::domain::ticket::{Ticket, TicketConfig, TicketStatus};
use crate::domain::transcript::Transcript;
use crate::embed::OutgoingMessage;
use crate::errors::{DomainError, HandlerFailure, ProvisioningStage, TicketError};
use crate::platform::{ChannelProvisioning, PlatformError};
use crate::ticket_type::{TicketType, TicketTypeRegistry};
use crate::transcripts::TranscriptHandler;

pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketSettings {
    pub history_page_size: usize,
    /// Open tickets one user may hold at once. `None` is unlimited.
    pub max_open_per_user: Option<usize>,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self { history_page_size: DEFAULT_HISTORY_PAGE_SIZE, max_open_per_user: None }
    }
}

/// Outcome of a close where every transcript handler succeeded.
#[derive(Clone, Debug)]
pub struct ClosedTicket {
    pub ticket_id: TicketId,
    pub channel_id: ChannelId,
    pub ticket_type: String,
    pub closed_by: UserId,
    pub closed_at: DateTime<Utc>,
    pub transcript: Transcript,
    /// False when the history fetch failed part way and the transcript only
    /// holds what was captured before the failure.
    pub history_complete: bool,
    pub archive_notified: bool,
    pub persisted_to: Vec<String>,
}

pub struct TicketSystem {
    guild: Guild,
    default_category: Category,
    archive_channel: ChannelId,
    platform: Arc<dyn ChannelProvisioning>,
    registry: TicketTypeRegistry,
    handlers: Vec<Arc<dyn TranscriptHandler>>,
    tickets: BTreeMap<TicketId, Ticket>,
    categories: HashMap<String, Category>,
    next_ticket_id: u64,
    settings: TicketSettings,
    audit: Arc<dyn AuditSink>,
}

impl TicketSystem {
    pub fn new(
        guild: Guild,
        default_category: Category,
        archive_channel: ChannelId,
        platform: Arc<dyn ChannelProvisioning>,
    ) -> Self {
        let mut categories = HashMap::new();
        categories.insert(default_category.name.clone(), default_category.clone());

        Self {
            guild,
            default_category,
            archive_channel,
            platform,
            registry: TicketTypeRegistry::new(),
            handlers: Vec::new(),
            tickets: BTreeMap::new(),
            categories,
            next_ticket_id: 1,
            settings: TicketSettings::default(),
            audit: Arc::new(NoopAuditSink),
        }
    }

    /// Finds the default category by name, creating it when the guild does
    /// not have one yet.
    pub async fn bootstrap(
        guild: Guild,
        default_category_name: &str,
        archive_channel: ChannelId,
        platform: Arc<dyn ChannelProvisioning>,
    ) -> Result<Self, PlatformError> {
        let category = match platform.find_category(guild.id, default_category_name).await? {
            Some(category) => category,
            None => {
                info!(
                    event_name = "ticket_system.category_created",
                    guild_id = %guild.id,
                    category = default_category_name,
                    "default ticket category missing; creating it"
                );
                platform.create_category(guild.id, default_category_name).await?
            }
        };

        info!(
            event_name = "ticket_system.ready",
            guild_id = %guild.id,
            category_id = %category.id,
            archive_channel_id = %archive_channel,
            "ticket system initialised"
        );
        Ok(Self::new(guild, category, archive_channel, platform))
    }

    pub fn with_settings(mut self, settings: TicketSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn register_ticket_type(&mut self, ticket_type: Arc<dyn TicketType>) {
        self.registry.register(ticket_type);
    }

    pub fn unregister_ticket_type(&mut self, identifier: &str) -> Option<Arc<dyn TicketType>> {
        self.registry.unregister(identifier)
    }

    pub fn add_transcript_handler(&mut self, handler: Arc<dyn TranscriptHandler>) {
        info!(handler = handler.name(), "registered transcript handler");
        self.handlers.push(handler);
    }

    pub fn guild(&self) -> &Guild {
        &self.guild
    }

    /// Swaps in a newer snapshot of the same guild so roles created since
    /// bootstrap resolve. Tickets, the id counter and cached categories are
    /// kept. A snapshot of another guild is ignored and reported as `false`.
    pub fn refresh_guild(&mut self, guild: Guild) -> bool {
        if guild.id != self.guild.id {
            warn!(
                guild_id = %self.guild.id,
                offered_guild_id = %guild.id,
                "ignoring snapshot of a different guild"
            );
            return false;
        }

        debug!(guild_id = %guild.id, roles = guild.roles.len(), "refreshed guild snapshot");
        self.guild = guild;
        true
    }

    pub fn default_category(&self) -> &Category {
        &self.default_category
    }

    pub fn archive_channel(&self) -> ChannelId {
        self.archive_channel
    }

    pub fn settings(&self) -> &TicketSettings {
        &self.settings
    }

    pub fn ticket_types(&self) -> &TicketTypeRegistry {
        &self.registry
    }

    pub fn transcript_handlers(&self) -> &[Arc<dyn TranscriptHandler>] {
        &self.handlers
    }

    /// Opens a ticket of `type_identifier` for `creator`.
    ///
    /// The id is consumed as soon as the type resolves, so failed creations
    /// leave gaps. Platform failures are not rolled back: a channel may exist
    /// without a registered ticket, and a registered ticket may be missing
    /// its creation embed.
    pub async fn create_ticket(
        &mut self,
        creator: &Member,
        type_identifier: &str,
    ) -> Result<&Ticket, TicketError> {
        let Some(ticket_type) = self.registry.get(type_identifier) else {
            warn!(
                event_name = "ticket.create_rejected",
                user_id = %creator.id,
                ticket_type = type_identifier,
                "unknown ticket type"
            );
            self.audit.emit(
                AuditEvent::new(
                    "ticket.create_failed",
                    AuditCategory::Lifecycle,
                    actor(creator.id),
                    AuditOutcome::Rejected,
                )
                .with_metadata("ticket_type", type_identifier)
                .with_metadata("reason", "unknown_ticket_type"),
            );
            return Err(TicketError::UnknownTicketType(type_identifier.to_owned()));
        };

        let ticket_id = TicketId(self.next_ticket_id);
        self.next_ticket_id += 1;

        if let Some(limit) = self.settings.max_open_per_user {
            let open = self.open_tickets_for(creator.id);
            if open >= limit {
                warn!(
                    event_name = "ticket.create_rejected",
                    ticket_id = %ticket_id,
                    user_id = %creator.id,
                    open,
                    limit,
                    "per-user open ticket limit reached"
                );
                self.audit.emit(
                    AuditEvent::new(
                        "ticket.create_failed",
                        AuditCategory::Lifecycle,
                        actor(creator.id),
                        AuditOutcome::Rejected,
                    )
                    .for_ticket(ticket_id)
                    .with_metadata("ticket_type", type_identifier)
                    .with_metadata("reason", "ticket_limit_reached"),
                );
                return Err(TicketError::TicketLimitReached { user_id: creator.id, limit });
            }
        }

        let platform = Arc::clone(&self.platform);
        let mut config = TicketConfig::new(ticket_id, creator.id, type_identifier, Utc::now());

        let descriptor = ticket_type.descriptor();
        let category = match self.resolve_category(descriptor.category_name.as_deref()).await {
            Ok(category) => category,
            Err(source) => {
                return Err(self.provisioning_failed(
                    ticket_id,
                    creator,
                    type_identifier,
                    ProvisioningStage::Category,
                    source,
                ))
            }
        };

        let channel_name = descriptor.channel_name(ticket_id);
        let overwrites = ticket_type.channel_permissions(&self.guild, creator);
        let channel =
            match platform.create_text_channel(&category, &channel_name, &overwrites).await {
                Ok(channel) => channel,
                Err(source) => {
                    return Err(self.provisioning_failed(
                        ticket_id,
                        creator,
                        type_identifier,
                        ProvisioningStage::Channel,
                        source,
                    ))
                }
            };

        config.provision(channel.id);
        let channel_id = channel.id;
        self.tickets.insert(
            ticket_id,
            Ticket::new(config, channel, creator.clone(), Arc::clone(&ticket_type)),
        );
        debug!(ticket_id = %ticket_id, channel_id = %channel_id, "ticket registered");

        let embed = ticket_type.build_create_embed(ticket_id, creator);
        if let Err(source) = platform.send_message(channel_id, &OutgoingMessage::embed(embed)).await {
            return Err(self.provisioning_failed(
                ticket_id,
                creator,
                type_identifier,
                ProvisioningStage::CreationMessage,
                source,
            ));
        }

        let Some(ticket) = self.tickets.get(&ticket_id) else {
            return Err(missing_ticket(ticket_id));
        };
        if let Err(source) = ticket_type.on_created(ticket, &self.guild, platform.as_ref()).await {
            return Err(self.provisioning_failed(
                ticket_id,
                creator,
                type_identifier,
                ProvisioningStage::CreatedHook,
                source,
            ));
        }

        info!(
            event_name = "ticket.created",
            ticket_id = %ticket_id,
            channel_id = %channel_id,
            user_id = %creator.id,
            ticket_type = type_identifier,
            channel = %channel_name,
            "ticket created"
        );
        self.audit.emit(
            AuditEvent::new(
                "ticket.created",
                AuditCategory::Lifecycle,
                actor(creator.id),
                AuditOutcome::Success,
            )
            .for_ticket(ticket_id)
            .in_channel(channel_id)
            .with_metadata("ticket_type", type_identifier)
            .with_metadata("channel_name", channel_name),
        );

        self.tickets.get(&ticket_id).ok_or_else(|| missing_ticket(ticket_id))
    }

    /// Closes ticket `ticket_id` on behalf of `closer`.
    ///
    /// The channel history is captured and the transcript closed before any
    /// handler sees it. Every handler is attempted, and the ticket leaves the
    /// map whatever they report.
    pub async fn close_ticket(
        &mut self,
        ticket_id: TicketId,
        closer: &Member,
    ) -> Result<ClosedTicket, TicketError> {
        let platform = Arc::clone(&self.platform);
        let page_size = self.settings.history_page_size;

        let Some(ticket) = self.tickets.get_mut(&ticket_id) else {
            warn!(
                event_name = "ticket.close_rejected",
                ticket_id = %ticket_id,
                user_id = %closer.id,
                "ticket not found"
            );
            return Err(TicketError::TicketNotFound(ticket_id));
        };

        let history_complete = match ticket.collect_messages(platform.as_ref(), page_size).await {
            Ok(_) => true,
            Err(error) => {
                warn!(
                    event_name = "ticket.history_incomplete",
                    ticket_id = %ticket_id,
                    channel_id = %ticket.channel().id,
                    error = %error,
                    captured = ticket.transcript().message_count(),
                    "history collection failed; closing with the messages captured so far"
                );
                false
            }
        };

        let closed_at = Utc::now().max(ticket.config().created_at);
        ticket.close(closed_at)?;

        let Some(ticket) = self.tickets.remove(&ticket_id) else {
            return Err(missing_ticket(ticket_id));
        };
        let channel_id = ticket.channel().id;
        let ticket_type = Arc::clone(ticket.ticket_type());
        let transcript = ticket.into_transcript();

        let archive_notified = self
            .notify_archive(ticket_type.as_ref(), ticket_id, closer, closed_at, platform.as_ref())
            .await;

        let mut failures = Vec::new();
        let mut persisted_to = Vec::new();
        for handler in &self.handlers {
            match handler.save_transcript(&transcript).await {
                Ok(()) => {
                    debug!(ticket_id = %ticket_id, handler = handler.name(), "transcript saved");
                    persisted_to.push(handler.name().to_owned());
                }
                Err(source) => {
                    error!(
                        event_name = "transcript.persist_failed",
                        ticket_id = %ticket_id,
                        handler = handler.name(),
                        error = %source,
                        "transcript handler failed"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            "transcript.persist_failed",
                            AuditCategory::Persistence,
                            actor(closer.id),
                            AuditOutcome::Failed,
                        )
                        .for_ticket(ticket_id)
                        .in_channel(channel_id)
                        .with_metadata("handler", handler.name())
                        .with_metadata("error", source.to_string()),
                    );
                    failures.push(HandlerFailure {
                        handler: handler.name().to_owned(),
                        message: source.to_string(),
                    });
                }
            }
        }

        info!(
            event_name = "ticket.closed",
            ticket_id = %ticket_id,
            channel_id = %channel_id,
            user_id = %closer.id,
            messages = transcript.message_count(),
            duration = %transcript.formatted_duration(),
            history_complete,
            archive_notified,
            handler_failures = failures.len(),
            "ticket closed"
        );
        self.audit.emit(
            AuditEvent::new(
                "ticket.closed",
                AuditCategory::Lifecycle,
                actor(closer.id),
                if failures.is_empty() { AuditOutcome::Success } else { AuditOutcome::Failed },
            )
            .for_ticket(ticket_id)
            .in_channel(channel_id)
            .with_metadata("ticket_type", transcript.ticket_type.clone())
            .with_metadata("messages", transcript.message_count().to_string()),
        );

        if !failures.is_empty() {
            return Err(TicketError::HandlerPersist { ticket_id, failures });
        }

        Ok(ClosedTicket {
            ticket_id,
            channel_id,
            ticket_type: transcript.ticket_type.clone(),
            closed_by: closer.id,
            closed_at,
            transcript,
            history_complete,
            archive_notified,
            persisted_to,
        })
    }

    pub fn get_ticket(&self, ticket_id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&ticket_id)
    }

    pub fn get_ticket_by_channel(&self, channel_id: ChannelId) -> Option<&Ticket> {
        self.tickets.values().find(|ticket| ticket.channel().id == channel_id)
    }

    pub fn get_tickets_by_type(&self, identifier: &str) -> Vec<&Ticket> {
        self.tickets.values().filter(|ticket| ticket.config().ticket_type == identifier).collect()
    }

    pub fn get_user_tickets(&self, user_id: UserId) -> Vec<&Ticket> {
        self.tickets.values().filter(|ticket| ticket.config().creator_id == user_id).collect()
    }

    pub fn open_ticket_count(&self) -> usize {
        self.tickets.len()
    }

    pub fn next_ticket_id(&self) -> TicketId {
        TicketId(self.next_ticket_id)
    }

    fn open_tickets_for(&self, user_id: UserId) -> usize {
        self.tickets
            .values()
            .filter(|ticket| {
                ticket.config().creator_id == user_id && ticket.status() == TicketStatus::Open
            })
            .count()
    }

    async fn resolve_category(&mut self, name: Option<&str>) -> Result<Category, PlatformError> {
        let name = name
            .filter(|name| !name.is_empty())
            .unwrap_or(self.default_category.name.as_str())
            .to_owned();

        if let Some(category) = self.categories.get(&name) {
            return Ok(category.clone());
        }

        let category = match self.platform.find_category(self.guild.id, &name).await? {
            Some(category) => category,
            None => {
                info!(
                    event_name = "ticket_system.category_created",
                    guild_id = %self.guild.id,
                    category = %name,
                    "ticket category missing; creating it"
                );
                self.platform.create_category(self.guild.id, &name).await?
            }
        };

        self.categories.insert(name, category.clone());
        Ok(category)
    }

    async fn notify_archive(
        &self,
        ticket_type: &dyn TicketType,
        ticket_id: TicketId,
        closer: &Member,
        closed_at: DateTime<Utc>,
        platform: &dyn ChannelProvisioning,
    ) -> bool {
        let embed = ticket_type.build_close_embed(ticket_id, closer, closed_at);
        match platform.send_message(self.archive_channel, &OutgoingMessage::embed(embed)).await {
            Ok(_) => true,
            Err(error) => {
                warn!(
                    event_name = "ticket.archive_notice_failed",
                    ticket_id = %ticket_id,
                    archive_channel_id = %self.archive_channel,
                    error = %error,
                    "could not post close notice to the archive channel"
                );
                false
            }
        }
    }

    fn provisioning_failed(
        &self,
        ticket_id: TicketId,
        creator: &Member,
        type_identifier: &str,
        stage: ProvisioningStage,
        source: PlatformError,
    ) -> TicketError {
        error!(
            event_name = "ticket.create_failed",
            ticket_id = %ticket_id,
            user_id = %creator.id,
            ticket_type = type_identifier,
            stage = %stage,
            error = %source,
            "ticket provisioning failed"
        );
        self.audit.emit(
            AuditEvent::new(
                "ticket.create_failed",
                AuditCategory::Provisioning,
                actor(creator.id),
                AuditOutcome::Failed,
            )
            .for_ticket(ticket_id)
            .with_metadata("ticket_type", type_identifier)
            .with_metadata("stage", stage.to_string())
            .with_metadata("error", source.to_string()),
        );
        TicketError::provisioning(ticket_id, stage, source)
    }
}

fn actor(user_id: UserId) -> String {
    format!("user:{user_id}")
}

fn missing_ticket(ticket_id: TicketId) -> TicketError {
    DomainError::InvariantViolation(format!("ticket #{ticket_id} vanished from the registry"))
        .into()
}
