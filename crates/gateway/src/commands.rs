use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use ticketdesk_core::domain::guild::Member;
use ticketdesk_core::domain::ids::{ChannelId, GuildId, RoleId};
use ticketdesk_core::domain::permissions::ChannelPermissions;
use ticketdesk_core::embed::OutgoingMessage;
use tracing::{debug, info, warn};

use crate::events::EventContext;

pub const MISSING_PERMISSION_MESSAGE: &str = "You don't have permission to use this command.";
pub const MISSING_ROLE_MESSAGE: &str = "You don't have the required role to use this command.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOption {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl CommandOption {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), required: true }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), required: false }
    }
}

/// Who may run a command. Both parts must hold; an empty part always holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityRequirement {
    pub permissions: ChannelPermissions,
    pub any_role: Vec<RoleId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityDenial {
    MissingPermissions,
    MissingRole,
}

impl CapabilityDenial {
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingPermissions => MISSING_PERMISSION_MESSAGE,
            Self::MissingRole => MISSING_ROLE_MESSAGE,
        }
    }
}

impl CapabilityRequirement {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn permissions(permissions: ChannelPermissions) -> Self {
        Self { permissions, any_role: Vec::new() }
    }

    pub fn any_role(role_ids: impl IntoIterator<Item = RoleId>) -> Self {
        Self { permissions: ChannelPermissions::NONE, any_role: role_ids.into_iter().collect() }
    }

    pub fn check(&self, invocation: &CommandInvocation) -> Result<(), CapabilityDenial> {
        if !self.permissions.is_empty() && !invocation.member_permissions.grants(self.permissions) {
            return Err(CapabilityDenial::MissingPermissions);
        }
        if !self.any_role.is_empty() && !invocation.member.has_any_role(&self.any_role) {
            return Err(CapabilityDenial::MissingRole);
        }
        Ok(())
    }
}

/// Declarative shape of one command as it is announced to the platform.
///
/// `name` is the full command path, subcommands separated by a space
/// (`"ticket open"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    pub options: Vec<CommandOption>,
    pub requirement: CapabilityRequirement,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            options: Vec::new(),
            requirement: CapabilityRequirement::open(),
        }
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn requiring(mut self, requirement: CapabilityRequirement) -> Self {
        self.requirement = requirement;
        self
    }
}

/// A slash command as delivered by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandInvocation {
    pub interaction_id: String,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub command: String,
    pub options: BTreeMap<String, String>,
    pub member: Member,
    /// Effective permissions of `member` in `channel_id`.
    pub member_permissions: ChannelPermissions,
}

impl CommandInvocation {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str).map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn required_option(&self, name: &str) -> Result<&str, CommandError> {
        self.option(name).ok_or_else(|| CommandError::MissingOption(name.to_owned()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandReply {
    pub message: OutgoingMessage,
    /// Only visible to the invoking member.
    pub ephemeral: bool,
}

impl CommandReply {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self { message: OutgoingMessage::text(content), ephemeral: true }
    }

    pub fn public(message: OutgoingMessage) -> Self {
        Self { message, ephemeral: false }
    }

    pub fn content(&self) -> Option<&str> {
        self.message.content.as_deref()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `/{0}`")]
    UnknownCommand(String),
    #[error("missing required option `{0}`")]
    MissingOption(String),
    #[error("invalid value `{value}` for option `{name}`")]
    InvalidOption { name: String, value: String },
    #[error("ticket system is not ready: {0}")]
    NotReady(String),
}

impl CommandError {
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownCommand(name) => format!("Unknown command `/{name}`."),
            Self::MissingOption(name) => format!("The `{name}` option is required."),
            Self::InvalidOption { name, value } => {
                format!("`{value}` is not a valid value for `{name}`.")
            }
            Self::NotReady(_) => {
                "Tickets are not available yet. Please try again in a moment.".to_owned()
            }
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
        ctx: &EventContext,
    ) -> Result<CommandReply, CommandError>;
}

struct RegisteredCommand {
    definition: CommandDefinition,
    handler: Arc<dyn CommandHandler>,
}

/// Commands known to this bot, in registration order.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `definition`; a command with the same name is replaced in place.
    pub fn register(&mut self, definition: CommandDefinition, handler: Arc<dyn CommandHandler>) {
        if let Some(existing) =
            self.commands.iter_mut().find(|command| command.definition.name == definition.name)
        {
            warn!(command = %definition.name, "command already registered; replacing handler");
            *existing = RegisteredCommand { definition, handler };
            return;
        }

        debug!(command = %definition.name, "registered command");
        self.commands.push(RegisteredCommand { definition, handler });
    }

    pub fn definitions(&self) -> Vec<CommandDefinition> {
        self.commands.iter().map(|command| command.definition.clone()).collect()
    }

    pub fn definition(&self, name: &str) -> Option<&CommandDefinition> {
        self.find(name).map(|command| &command.definition)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Checks the command's capability requirement and runs its handler.
    ///
    /// A failed check is not an error: the member gets an ephemeral denial.
    pub async fn dispatch(
        &self,
        invocation: &CommandInvocation,
        ctx: &EventContext,
    ) -> Result<CommandReply, CommandError> {
        let Some(command) = self.find(&invocation.command) else {
            return Err(CommandError::UnknownCommand(invocation.command.clone()));
        };

        if let Err(denial) = command.definition.requirement.check(invocation) {
            info!(
                event_name = "command.denied",
                command = %invocation.command,
                user_id = %invocation.member.id,
                correlation_id = %ctx.correlation_id,
                denial = ?denial,
                "command capability check failed"
            );
            return Ok(CommandReply::ephemeral(denial.message()));
        }

        command.handler.handle(invocation, ctx).await
    }

    fn find(&self, name: &str) -> Option<&RegisteredCommand> {
        self.commands.iter().find(|command| command.definition.name == name)
    }
}
