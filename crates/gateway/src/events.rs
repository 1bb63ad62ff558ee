use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use ticketdesk_core::domain::guild::Guild;
use tracing::warn;

use crate::commands::{CommandInvocation, CommandRegistry, CommandReply};

/// One event off the gateway plus its position in the session's stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayEnvelope {
    pub sequence: u64,
    pub event: GatewayEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    GuildAvailable(Guild),
    CommandInvoked(CommandInvocation),
    Unsupported { event_type: String },
}

impl GatewayEvent {
    pub fn event_type(&self) -> GatewayEventType {
        match self {
            Self::GuildAvailable(_) => GatewayEventType::GuildAvailable,
            Self::CommandInvoked(_) => GatewayEventType::CommandInvoked,
            Self::Unsupported { .. } => GatewayEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayEventType {
    GuildAvailable,
    CommandInvoked,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(CommandReply),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("guild setup failed: {0}")]
    GuildSetup(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> GatewayEventType;
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<GatewayEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Runs slash commands through the registry. Command failures become
/// ephemeral replies; they never fail the dispatch.
pub struct CommandInvokedHandler {
    registry: Arc<CommandRegistry>,
}

impl CommandInvokedHandler {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventHandler for CommandInvokedHandler {
    fn event_type(&self) -> GatewayEventType {
        GatewayEventType::CommandInvoked
    }

    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let GatewayEvent::CommandInvoked(invocation) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let reply = match self.registry.dispatch(invocation, ctx).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "command.failed",
                    command = %invocation.command,
                    user_id = %invocation.member.id,
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "command failed"
                );
                CommandReply::ephemeral(error.user_message())
            }
        };
        Ok(HandlerResult::Responded(reply))
    }
}

#[async_trait]
pub trait GuildSetupService: Send + Sync {
    /// Called for every guild the gateway reports; returns whether this
    /// guild is the one the service manages.
    async fn guild_available(
        &self,
        guild: &Guild,
        ctx: &EventContext,
    ) -> Result<bool, EventHandlerError>;
}

pub struct GuildAvailableHandler<S> {
    service: S,
}

impl<S> GuildAvailableHandler<S>
where
    S: GuildSetupService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for GuildAvailableHandler<S>
where
    S: GuildSetupService + 'static,
{
    fn event_type(&self) -> GatewayEventType {
        GatewayEventType::GuildAvailable
    }

    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let GatewayEvent::GuildAvailable(guild) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        Ok(if self.service.guild_available(guild, ctx).await? {
            HandlerResult::Processed
        } else {
            HandlerResult::Ignored
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use ticketdesk_core::domain::guild::{Guild, Member};
    use ticketdesk_core::domain::ids::{ChannelId, GuildId, RoleId, UserId};
    use ticketdesk_core::domain::permissions::ChannelPermissions;

    use super::{
        CommandInvokedHandler, DispatchError, EventContext, EventDispatcher, EventHandlerError,
        GatewayEnvelope, GatewayEvent, GuildAvailableHandler, GuildSetupService, HandlerResult,
    };
    use crate::commands::{CommandInvocation, CommandRegistry};

    struct RejectingSetup;

    #[async_trait]
    impl GuildSetupService for RejectingSetup {
        async fn guild_available(
            &self,
            guild: &Guild,
            _ctx: &EventContext,
        ) -> Result<bool, EventHandlerError> {
            Err(EventHandlerError::GuildSetup(format!("cannot set up {}", guild.id)))
        }
    }

    fn command(name: &str) -> GatewayEnvelope {
        GatewayEnvelope {
            sequence: 4,
            event: GatewayEvent::CommandInvoked(CommandInvocation {
                interaction_id: "int-4".to_owned(),
                guild_id: GuildId(1),
                channel_id: ChannelId(2),
                command: name.to_owned(),
                options: BTreeMap::new(),
                member: Member::new(UserId(3), "casey"),
                member_permissions: ChannelPermissions::NONE,
            }),
        }
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let envelope = GatewayEnvelope {
            sequence: 1,
            event: GatewayEvent::Unsupported { event_type: "TYPING_START".to_owned() },
        };

        let result =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }

    #[tokio::test]
    async fn unknown_command_is_answered_not_failed() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(CommandInvokedHandler::new(Arc::new(CommandRegistry::new())));

        let result = dispatcher
            .dispatch(&command("ticket reopen"), &EventContext::default())
            .await
            .expect("dispatch");

        let HandlerResult::Responded(reply) = result else {
            panic!("expected a reply, got {result:?}");
        };
        assert!(reply.ephemeral);
        assert_eq!(reply.content(), Some("Unknown command `/ticket reopen`."));
    }

    #[tokio::test]
    async fn guild_setup_failures_surface_as_dispatch_errors() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(GuildAvailableHandler::new(RejectingSetup));
        let envelope = GatewayEnvelope {
            sequence: 2,
            event: GatewayEvent::GuildAvailable(Guild {
                id: GuildId(7),
                name: "support".to_owned(),
                everyone_role: RoleId(7),
                bot_user_id: UserId(900),
                roles: Vec::new(),
            }),
        };

        let error =
            dispatcher.dispatch(&envelope, &EventContext::default()).await.expect_err("setup");

        assert_eq!(
            error,
            DispatchError::Handler(EventHandlerError::GuildSetup("cannot set up 7".to_owned()))
        );
        assert_eq!(dispatcher.handler_count(), 1);
    }
}
