use serde::{Deserialize, Serialize};

use crate::domain::ids::{ChannelId, GuildId, RoleId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

impl Role {
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    pub fn mention(&self) -> String {
        format!("<@&{}>", self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

impl Member {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self { id, display_name: name.clone(), name, avatar_url: None, role_ids: Vec::new() }
    }

    pub fn with_role(mut self, role_id: RoleId) -> Self {
        self.role_ids.push(role_id);
        self
    }

    pub fn has_role(&self, role_id: RoleId) -> bool {
        self.role_ids.contains(&role_id)
    }

    pub fn has_any_role(&self, role_ids: &[RoleId]) -> bool {
        role_ids.iter().any(|role_id| self.has_role(*role_id))
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// Snapshot of the guild the ticket system operates in.
///
/// `everyone_role` is the implicit role every member holds and `bot_user_id`
/// is the bot's own member, which always gets management rights on ticket
/// channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub everyone_role: RoleId,
    pub bot_user_id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Guild {
    pub fn role(&self, role_id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|role| role.id == role_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChannel {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub category_id: Option<ChannelId>,
    pub name: String,
}

impl TextChannel {
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}
