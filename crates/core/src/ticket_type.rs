//! Ticket types: the declarative descriptor, the behavior trait with its
//! shared default functions, and the registry.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::guild::{Guild, Member};
use crate::domain::ids::TicketId;
use crate::domain::permissions::{ChannelPermissions, OverwriteTarget, PermissionOverwrite};
use crate::domain::team::Team;
use crate::domain::ticket::Ticket;
use crate::embed::{colors, Embed, EmbedBuilder, OutgoingMessage};
use crate::platform::{ChannelProvisioning, PlatformError};

fn default_emoji() -> String {
    "🎫".to_owned()
}

fn default_color() -> u32 {
    colors::BLURPLE
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypeDescriptor {
    pub identifier: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_emoji")]
    pub emoji: String,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default = "default_color")]
    pub color: u32,
    #[serde(default)]
    pub channel_prefix: Option<String>,
    #[serde(default)]
    pub category_name: Option<String>,
}

impl TicketTypeDescriptor {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            description: String::new(),
            emoji: default_emoji(),
            teams: Vec::new(),
            color: default_color(),
            channel_prefix: None,
            category_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = emoji.into();
        self
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.teams.push(team);
        self
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    pub fn with_category(mut self, category_name: impl Into<String>) -> Self {
        self.category_name = Some(category_name.into());
        self
    }

    /// Channel name prefix; falls back to the identifier.
    pub fn channel_prefix(&self) -> &str {
        self.channel_prefix.as_deref().filter(|prefix| !prefix.is_empty()).unwrap_or(&self.identifier)
    }

    /// `{prefix}-{ticket_id:04}`
    pub fn channel_name(&self, ticket_id: TicketId) -> String {
        format!("{}-{}", self.channel_prefix(), ticket_id.padded())
    }
}

/// Behavior of one kind of ticket.
///
/// Only the descriptor and the creation embed are required; the remaining
/// capabilities default to the free functions in this module.
#[async_trait]
pub trait TicketType: Send + Sync {
    fn descriptor(&self) -> &TicketTypeDescriptor;

    fn build_create_embed(&self, ticket_id: TicketId, creator: &Member) -> Embed;

    fn identifier(&self) -> &str {
        &self.descriptor().identifier
    }

    fn build_close_embed(
        &self,
        ticket_id: TicketId,
        closer: &Member,
        closed_at: DateTime<Utc>,
    ) -> Embed {
        default_close_embed(self.descriptor(), ticket_id, closer, closed_at)
    }

    fn channel_permissions(&self, guild: &Guild, creator: &Member) -> Vec<PermissionOverwrite> {
        default_channel_permissions(guild, creator, &self.descriptor().teams)
    }

    async fn on_created(
        &self,
        ticket: &Ticket,
        guild: &Guild,
        platform: &dyn ChannelProvisioning,
    ) -> Result<(), PlatformError> {
        default_on_created(self.descriptor(), ticket, guild, platform).await
    }
}

pub fn default_close_embed(
    descriptor: &TicketTypeDescriptor,
    ticket_id: TicketId,
    closer: &Member,
    closed_at: DateTime<Utc>,
) -> Embed {
    EmbedBuilder::new(format!("{} #{}", descriptor.emoji, ticket_id))
        .description(format!("{} ticket closed.", descriptor.identifier))
        .color(colors::RED)
        .timestamp(closed_at)
        .field("Closed by", closer.mention())
        .build()
}

/// Everyone is denied; the creator and every resolvable team role become
/// participants; the bot's own member manages the channel. Teams whose role
/// no longer resolves are skipped.
pub fn default_channel_permissions(
    guild: &Guild,
    creator: &Member,
    teams: &[Team],
) -> Vec<PermissionOverwrite> {
    let mut overwrites = vec![
        PermissionOverwrite::deny(
            OverwriteTarget::Role(guild.everyone_role),
            ChannelPermissions::VIEW_CHANNEL,
        ),
        PermissionOverwrite::allow(
            OverwriteTarget::Member(creator.id),
            ChannelPermissions::PARTICIPANT,
        ),
        PermissionOverwrite::allow(
            OverwriteTarget::Member(guild.bot_user_id),
            ChannelPermissions::CHANNEL_MANAGER,
        ),
    ];

    for team in teams {
        match team.role(guild) {
            Some(role) => overwrites.push(PermissionOverwrite::allow(
                OverwriteTarget::Role(role.id),
                ChannelPermissions::PARTICIPANT,
            )),
            None => debug!(
                team = %team.name,
                role_id = %team.role_id,
                guild_id = %guild.id,
                "team role does not resolve; skipping channel overwrite"
            ),
        }
    }

    overwrites
}

/// Pings every resolvable team role in the new ticket channel.
pub async fn default_on_created(
    descriptor: &TicketTypeDescriptor,
    ticket: &Ticket,
    guild: &Guild,
    platform: &dyn ChannelProvisioning,
) -> Result<(), PlatformError> {
    let mentions: Vec<String> = descriptor
        .teams
        .iter()
        .map(|team| team.mention(guild))
        .filter(|mention| !mention.is_empty())
        .collect();

    if mentions.is_empty() {
        return Ok(());
    }

    let message = OutgoingMessage::text(format!("{} - New ticket opened!", mentions.join(" ")));
    platform.send_message(ticket.channel().id, &message).await?;
    Ok(())
}

/// Ticket type driven entirely by its descriptor, used for types declared
/// in configuration.
#[derive(Clone, Debug)]
pub struct StandardTicketType {
    descriptor: TicketTypeDescriptor,
}

impl StandardTicketType {
    pub fn new(descriptor: TicketTypeDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl TicketType for StandardTicketType {
    fn descriptor(&self) -> &TicketTypeDescriptor {
        &self.descriptor
    }

    fn build_create_embed(&self, ticket_id: TicketId, creator: &Member) -> Embed {
        let descriptor = &self.descriptor;
        let mut builder = EmbedBuilder::new(format!(
            "{} {} #{}",
            descriptor.emoji,
            descriptor.display_name,
            ticket_id.padded()
        ))
        .color(descriptor.color)
        .timestamp(Utc::now())
        .field("Opened by", creator.mention());

        if !descriptor.description.is_empty() {
            builder = builder.description(descriptor.description.clone());
        }
        if !descriptor.teams.is_empty() {
            let teams =
                descriptor.teams.iter().map(|team| team.name.as_str()).collect::<Vec<_>>();
            builder = builder.inline_field("Teams", teams.join(", "));
        }

        builder.footer("Use /ticket close when this is resolved.").build()
    }
}

/// Registered ticket types in registration order.
#[derive(Default)]
pub struct TicketTypeRegistry {
    types: Vec<Arc<dyn TicketType>>,
}

impl TicketTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `ticket_type`, replacing (in place) any type with the same
    /// identifier. The replaced type is returned.
    pub fn register(&mut self, ticket_type: Arc<dyn TicketType>) -> Option<Arc<dyn TicketType>> {
        let identifier = ticket_type.identifier().to_owned();
        let display_name = ticket_type.descriptor().display_name.clone();

        if let Some(slot) = self.types.iter_mut().find(|known| known.identifier() == identifier) {
            warn!(
                ticket_type = %identifier,
                "ticket type registered twice; replacing the earlier registration"
            );
            return Some(std::mem::replace(slot, ticket_type));
        }

        self.types.push(ticket_type);
        info!(ticket_type = %identifier, display_name = %display_name, "registered ticket type");
        None
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn TicketType>> {
        self.types.iter().find(|known| known.identifier() == identifier).cloned()
    }

    pub fn get_all(&self) -> &[Arc<dyn TicketType>] {
        &self.types
    }

    pub fn unregister(&mut self, identifier: &str) -> Option<Arc<dyn TicketType>> {
        let position = self.types.iter().position(|known| known.identifier() == identifier)?;
        info!(ticket_type = %identifier, "unregistered ticket type");
        Some(self.types.remove(position))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{
        default_channel_permissions, StandardTicketType, TicketType, TicketTypeDescriptor,
        TicketTypeRegistry,
    };
    use crate::domain::guild::{Guild, Member, Role};
    use crate::domain::ids::{GuildId, RoleId, TicketId, UserId};
    use crate::domain::permissions::{ChannelPermissions, OverwriteTarget};
    use crate::domain::team::Team;
    use crate::embed::colors;

    fn guild() -> Guild {
        Guild {
            id: GuildId(1),
            name: "support".to_owned(),
            everyone_role: RoleId(1),
            bot_user_id: UserId(900),
            roles: vec![Role::new(RoleId(50), "Support"), Role::new(RoleId(51), "Billing")],
        }
    }

    fn standard(identifier: &str, display_name: &str) -> Arc<dyn TicketType> {
        Arc::new(StandardTicketType::new(TicketTypeDescriptor::new(identifier, display_name)))
    }

    #[test]
    fn channel_name_pads_id_and_prefers_explicit_prefix() {
        let descriptor = TicketTypeDescriptor::new("support", "Support").with_channel_prefix("sup");
        assert_eq!(descriptor.channel_name(TicketId(1)), "sup-0001");

        let fallback = TicketTypeDescriptor::new("billing", "Billing");
        assert_eq!(fallback.channel_name(TicketId(27)), "billing-0027");
    }

    #[test]
    fn permissions_deny_everyone_and_grant_participants() {
        let guild = guild();
        let creator = Member::new(UserId(123), "requester");
        let teams = vec![Team::new("support", RoleId(50)), Team::new("ghost", RoleId(404))];

        let overwrites = default_channel_permissions(&guild, &creator, &teams);

        assert_eq!(overwrites.len(), 4, "unresolvable team role must be skipped");
        assert_eq!(overwrites[0].target, OverwriteTarget::Role(RoleId(1)));
        assert_eq!(overwrites[0].deny, ChannelPermissions::VIEW_CHANNEL);
        assert_eq!(overwrites[1].target, OverwriteTarget::Member(UserId(123)));
        assert_eq!(overwrites[1].allow, ChannelPermissions::PARTICIPANT);
        assert_eq!(overwrites[2].target, OverwriteTarget::Member(UserId(900)));
        assert!(overwrites[2].allow.contains(ChannelPermissions::MANAGE_CHANNELS));
        assert_eq!(overwrites[3].target, OverwriteTarget::Role(RoleId(50)));
        assert_eq!(overwrites[3].allow, ChannelPermissions::PARTICIPANT);
    }

    #[test]
    fn default_close_embed_names_the_closer() {
        let ticket_type = standard("support", "Support");
        let closer = Member::new(UserId(5), "admin");

        let embed = ticket_type.build_close_embed(TicketId(3), &closer, Utc::now());

        assert_eq!(embed.title.as_deref(), Some("🎫 #3"));
        assert_eq!(embed.description.as_deref(), Some("support ticket closed."));
        assert_eq!(embed.color, Some(colors::RED));
        assert_eq!(embed.field("Closed by").map(|field| field.value.as_str()), Some("<@5>"));
    }

    #[test]
    fn standard_create_embed_lists_teams() {
        let ticket_type = StandardTicketType::new(
            TicketTypeDescriptor::new("billing", "Billing")
                .with_description("Invoices and refunds")
                .with_team(Team::new("finance", RoleId(51))),
        );

        let embed = ticket_type.build_create_embed(TicketId(9), &Member::new(UserId(8), "payer"));

        assert_eq!(embed.title.as_deref(), Some("🎫 Billing #0009"));
        assert_eq!(embed.description.as_deref(), Some("Invoices and refunds"));
        assert_eq!(embed.field("Teams").map(|field| field.value.as_str()), Some("finance"));
        assert_eq!(embed.field("Opened by").map(|field| field.value.as_str()), Some("<@8>"));
    }

    #[test]
    fn registry_keeps_registration_order_and_overwrites_in_place() {
        let mut registry = TicketTypeRegistry::new();
        assert!(registry.register(standard("support", "Support")).is_none());
        assert!(registry.register(standard("billing", "Billing")).is_none());

        let replaced = registry.register(standard("support", "Support v2"));

        assert_eq!(replaced.map(|old| old.descriptor().display_name.clone()).as_deref(), Some("Support"));
        let names: Vec<_> =
            registry.get_all().iter().map(|known| known.descriptor().display_name.clone()).collect();
        assert_eq!(names, vec!["Support v2", "Billing"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregister_is_a_noop_for_unknown_types() {
        let mut registry = TicketTypeRegistry::new();
        registry.register(standard("support", "Support"));

        assert!(registry.unregister("bogus").is_none());
        assert!(registry.unregister("support").is_some());
        assert!(registry.get("support").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let descriptor: TicketTypeDescriptor = toml::from_str(
            r#"
identifier = "support"
display_name = "Support"
channel_prefix = "sup"

[[teams]]
name = "helpers"
role_id = 50
"#,
        )
        .expect("descriptor should parse");

        assert_eq!(descriptor.emoji, "🎫");
        assert_eq!(descriptor.color, colors::BLURPLE);
        assert_eq!(descriptor.teams, vec![Team::new("helpers", RoleId(50))]);
        assert_eq!(descriptor.channel_prefix(), "sup");
        assert!(descriptor.category_name.is_none());
    }
}
