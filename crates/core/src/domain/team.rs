use serde::{Deserialize, Serialize};

use crate::domain::guild::{Guild, Member, Role};
use crate::domain::ids::RoleId;

/// A group of responsible staff, identified by a guild role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub role_id: RoleId,
}

impl Team {
    pub fn new(name: impl Into<String>, role_id: RoleId) -> Self {
        Self { name: name.into(), role_id }
    }

    /// Resolves the team role in `guild`; `None` when the role was deleted
    /// or never existed there.
    pub fn role<'g>(&self, guild: &'g Guild) -> Option<&'g Role> {
        guild.role(self.role_id)
    }

    pub fn is_member(&self, member: &Member) -> bool {
        member.has_role(self.role_id)
    }

    /// Role mention for `guild`, or an empty string when the role does not resolve.
    pub fn mention(&self, guild: &Guild) -> String {
        self.role(guild).map(Role::mention).unwrap_or_default()
    }
}
