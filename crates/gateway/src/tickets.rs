//! `/ticket` slash commands.
//!
//! The [`TicketSystem`] only exists once the configured guild has been
//! reported by the gateway; until then every ticket command answers that
//! tickets are not available yet. All commands share one mutex, which
//! serialises creation and closure.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use ticketdesk_core::audit::{AuditSink, NoopAuditSink};
use ticketdesk_core::config::AppConfig;
use ticketdesk_core::domain::guild::{Guild, Member};
use ticketdesk_core::domain::ids::{ChannelId, GuildId, TicketId};
use ticketdesk_core::domain::permissions::ChannelPermissions;
use ticketdesk_core::domain::ticket::Ticket;
use ticketdesk_core::embed::{colors, EmbedBuilder, OutgoingMessage};
use ticketdesk_core::errors::TicketError;
use ticketdesk_core::platform::ChannelProvisioning;
use ticketdesk_core::system::{TicketSettings, TicketSystem};
use ticketdesk_core::ticket_type::{StandardTicketType, TicketType, TicketTypeDescriptor};
use ticketdesk_core::transcripts::TranscriptHandler;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::commands::{
    CapabilityRequirement, CommandDefinition, CommandError, CommandHandler, CommandInvocation,
    CommandOption, CommandRegistry, CommandReply,
};
use crate::events::{
    CommandInvokedHandler, EventContext, EventDispatcher, EventHandlerError,
    GuildAvailableHandler, GuildSetupService,
};

pub const NOT_A_TICKET_MESSAGE: &str =
    "This channel is not a ticket. Pass a ticket id to close one from elsewhere.";
pub const CLOSE_FORBIDDEN_MESSAGE: &str =
    "Only the ticket creator or its responsible team can close this ticket.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketDeskSettings {
    pub guild_id: GuildId,
    pub default_category: String,
    pub archive_channel_id: ChannelId,
    pub ticket: TicketSettings,
    pub types: Vec<TicketTypeDescriptor>,
}

impl From<&AppConfig> for TicketDeskSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            guild_id: config.guild.id,
            default_category: config.guild.default_category.clone(),
            archive_channel_id: config.guild.archive_channel_id,
            ticket: config.tickets.settings(),
            types: config.tickets.types.clone(),
        }
    }
}

/// Shared handle to the guild's ticket system. Cloning is cheap; every
/// clone sees the same system.
#[derive(Clone)]
pub struct TicketDesk {
    settings: Arc<TicketDeskSettings>,
    platform: Arc<dyn ChannelProvisioning>,
    handlers: Vec<Arc<dyn TranscriptHandler>>,
    audit: Arc<dyn AuditSink>,
    system: Arc<Mutex<Option<TicketSystem>>>,
}

impl TicketDesk {
    pub fn new(settings: TicketDeskSettings, platform: Arc<dyn ChannelProvisioning>) -> Self {
        Self {
            settings: Arc::new(settings),
            platform,
            handlers: Vec::new(),
            audit: Arc::new(NoopAuditSink),
            system: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_transcript_handler(mut self, handler: Arc<dyn TranscriptHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &TicketDeskSettings {
        &self.settings
    }

    pub fn transcript_handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|handler| handler.name().to_owned()).collect()
    }

    pub async fn is_ready(&self) -> bool {
        self.system.lock().await.is_some()
    }

    /// Open tickets, or `None` before the guild is available.
    pub async fn open_ticket_count(&self) -> Option<usize> {
        self.system.lock().await.as_ref().map(TicketSystem::open_ticket_count)
    }

    /// Builds the ticket system for `guild`. When one already exists only
    /// its guild snapshot is refreshed.
    pub async fn initialise(&self, guild: &Guild) -> Result<(), EventHandlerError> {
        let mut slot = self.system.lock().await;
        if let Some(system) = slot.as_mut() {
            debug!(guild_id = %guild.id, "guild available again; refreshing snapshot");
            system.refresh_guild(guild.clone());
            return Ok(());
        }

        let mut system = TicketSystem::bootstrap(
            guild.clone(),
            &self.settings.default_category,
            self.settings.archive_channel_id,
            Arc::clone(&self.platform),
        )
        .await
        .map_err(|error| EventHandlerError::GuildSetup(error.to_string()))?
        .with_settings(self.settings.ticket.clone())
        .with_audit_sink(Arc::clone(&self.audit));

        for descriptor in &self.settings.types {
            system.register_ticket_type(Arc::new(StandardTicketType::new(descriptor.clone())));
        }
        for handler in &self.handlers {
            system.add_transcript_handler(Arc::clone(handler));
        }

        info!(
            event_name = "ticket_desk.ready",
            guild_id = %guild.id,
            ticket_types = system.ticket_types().len(),
            transcript_handlers = system.transcript_handlers().len(),
            "ticket desk ready"
        );
        *slot = Some(system);
        Ok(())
    }

    /// Dispatcher wired for this desk: guild availability plus `registry`.
    pub fn dispatcher(&self, registry: Arc<CommandRegistry>) -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(GuildAvailableHandler::new(self.clone()));
        dispatcher.register(CommandInvokedHandler::new(registry));
        dispatcher
    }

    async fn lock(&self) -> DeskGuard<'_> {
        DeskGuard { guild_id: self.settings.guild_id, guard: self.system.lock().await }
    }
}

struct DeskGuard<'a> {
    guild_id: GuildId,
    guard: MutexGuard<'a, Option<TicketSystem>>,
}

impl DeskGuard<'_> {
    fn system(&mut self) -> Result<&mut TicketSystem, CommandError> {
        let guild_id = self.guild_id;
        self.guard.as_mut().ok_or_else(|| {
            CommandError::NotReady(format!("guild {guild_id} has not been reported by the gateway"))
        })
    }
}

#[async_trait]
impl GuildSetupService for TicketDesk {
    async fn guild_available(
        &self,
        guild: &Guild,
        ctx: &EventContext,
    ) -> Result<bool, EventHandlerError> {
        if guild.id != self.settings.guild_id {
            debug!(
                guild_id = %guild.id,
                configured_guild_id = %self.settings.guild_id,
                correlation_id = %ctx.correlation_id,
                "ignoring guild that is not configured"
            );
            return Ok(false);
        }

        self.initialise(guild).await?;
        Ok(true)
    }
}

/// Adds `/ticket open|close|list|types` to `registry`.
pub fn register_ticket_commands(registry: &mut CommandRegistry, desk: &TicketDesk) {
    registry.register(
        CommandDefinition::new("ticket open", "Open a new support ticket")
            .with_option(CommandOption::required("type", "Kind of ticket to open"))
            .requiring(CapabilityRequirement::permissions(ChannelPermissions::SEND_MESSAGES)),
        Arc::new(OpenTicketCommand { desk: desk.clone() }),
    );
    registry.register(
        CommandDefinition::new("ticket close", "Close a ticket and archive its transcript")
            .with_option(CommandOption::optional("id", "Ticket number; defaults to this channel")),
        Arc::new(CloseTicketCommand { desk: desk.clone() }),
    );
    registry.register(
        CommandDefinition::new("ticket list", "List your open tickets"),
        Arc::new(ListTicketsCommand { desk: desk.clone() }),
    );
    registry.register(
        CommandDefinition::new("ticket types", "Show the kinds of tickets you can open"),
        Arc::new(TicketTypesCommand { desk: desk.clone() }),
    );
}

struct OpenTicketCommand {
    desk: TicketDesk,
}

#[async_trait]
impl CommandHandler for OpenTicketCommand {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
        ctx: &EventContext,
    ) -> Result<CommandReply, CommandError> {
        let type_identifier = invocation.required_option("type")?;
        let mut desk = self.desk.lock().await;
        let system = desk.system()?;

        Ok(match system.create_ticket(&invocation.member, type_identifier).await {
            Ok(ticket) => {
                info!(
                    event_name = "command.ticket_opened",
                    ticket_id = %ticket.ticket_id(),
                    correlation_id = %ctx.correlation_id,
                    "ticket opened from command"
                );
                CommandReply::ephemeral(format!(
                    "Your ticket has been created: {}",
                    ticket.channel().mention()
                ))
            }
            Err(error) => ticket_error_reply(&error, ctx),
        })
    }
}

struct CloseTicketCommand {
    desk: TicketDesk,
}

#[async_trait]
impl CommandHandler for CloseTicketCommand {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
        ctx: &EventContext,
    ) -> Result<CommandReply, CommandError> {
        let requested = invocation.option("id").map(parse_ticket_id).transpose()?;
        let mut desk = self.desk.lock().await;
        let system = desk.system()?;

        let ticket = match requested {
            Some(ticket_id) => system.get_ticket(ticket_id),
            None => system.get_ticket_by_channel(invocation.channel_id),
        };
        let ticket_id = match (ticket, requested) {
            (Some(ticket), _) => {
                if !may_close(ticket, &invocation.member) {
                    return Ok(CommandReply::ephemeral(CLOSE_FORBIDDEN_MESSAGE));
                }
                ticket.ticket_id()
            }
            (None, Some(ticket_id)) => {
                let message = TicketError::TicketNotFound(ticket_id).user_message();
                return Ok(CommandReply::ephemeral(message));
            }
            (None, None) => return Ok(CommandReply::ephemeral(NOT_A_TICKET_MESSAGE)),
        };

        Ok(match system.close_ticket(ticket_id, &invocation.member).await {
            Ok(closed) => {
                let summary = EmbedBuilder::new(format!("Ticket #{} closed", closed.ticket_id.padded()))
                    .color(colors::RED)
                    .field("Closed by", invocation.member.mention())
                    .inline_field("Messages", closed.transcript.message_count().to_string())
                    .inline_field("Saved to", persisted_summary(&closed.persisted_to))
                    .build();
                if !closed.history_complete {
                    warn!(
                        ticket_id = %closed.ticket_id,
                        correlation_id = %ctx.correlation_id,
                        "ticket closed with a partial transcript"
                    );
                }
                CommandReply::public(OutgoingMessage::embed(summary))
            }
            Err(error) => ticket_error_reply(&error, ctx),
        })
    }
}

struct ListTicketsCommand {
    desk: TicketDesk,
}

#[async_trait]
impl CommandHandler for ListTicketsCommand {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
        _ctx: &EventContext,
    ) -> Result<CommandReply, CommandError> {
        let mut desk = self.desk.lock().await;
        let tickets = desk.system()?.get_user_tickets(invocation.member.id);
        if tickets.is_empty() {
            return Ok(CommandReply::ephemeral("You have no open tickets."));
        }

        let mut listing = String::from("Your open tickets:");
        for ticket in tickets {
            let _ = write!(
                listing,
                "\n#{} · {} · {}",
                ticket.ticket_id().padded(),
                ticket.config().ticket_type,
                ticket.channel().mention()
            );
        }
        Ok(CommandReply::ephemeral(listing))
    }
}

struct TicketTypesCommand {
    desk: TicketDesk,
}

#[async_trait]
impl CommandHandler for TicketTypesCommand {
    async fn handle(
        &self,
        _invocation: &CommandInvocation,
        _ctx: &EventContext,
    ) -> Result<CommandReply, CommandError> {
        let descriptors: Vec<TicketTypeDescriptor> = match self.desk.system.lock().await.as_ref() {
            Some(system) => system
                .ticket_types()
                .get_all()
                .iter()
                .map(|ticket_type| ticket_type.descriptor().clone())
                .collect(),
            None => self.desk.settings.types.clone(),
        };
        if descriptors.is_empty() {
            return Ok(CommandReply::ephemeral("No ticket types are configured."));
        }

        let mut listing = String::from("Available ticket types:");
        for descriptor in &descriptors {
            let _ = write!(
                listing,
                "\n{} `{}` {}",
                descriptor.emoji, descriptor.identifier, descriptor.display_name
            );
            if !descriptor.description.is_empty() {
                let _ = write!(listing, " - {}", descriptor.description);
            }
        }
        Ok(CommandReply::ephemeral(listing))
    }
}

fn may_close(ticket: &Ticket, member: &Member) -> bool {
    ticket.config().creator_id == member.id
        || ticket.ticket_type().descriptor().teams.iter().any(|team| team.is_member(member))
}

/// Accepts `7`, `0007` and `#0007`.
fn parse_ticket_id(raw: &str) -> Result<TicketId, CommandError> {
    TicketId::parse_reference(raw)
        .ok_or_else(|| CommandError::InvalidOption { name: "id".to_owned(), value: raw.to_owned() })
}

fn persisted_summary(handlers: &[String]) -> String {
    if handlers.is_empty() {
        "nowhere".to_owned()
    } else {
        handlers.join(", ")
    }
}

fn ticket_error_reply(error: &TicketError, ctx: &EventContext) -> CommandReply {
    warn!(
        event_name = "command.ticket_failed",
        kind = error.kind(),
        correlation_id = %ctx.correlation_id,
        error = %error,
        "ticket command failed"
    );
    CommandReply::ephemeral(error.user_message())
}
