use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::domain::ids::{RoleId, UserId};

/// Channel permission bitset. Bit positions follow the platform's
/// permission integer so values can be forwarded unchanged.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelPermissions(u64);

impl ChannelPermissions {
    pub const NONE: Self = Self(0);
    pub const ADMINISTRATOR: Self = Self(1 << 3);
    pub const MANAGE_CHANNELS: Self = Self(1 << 4);
    pub const VIEW_CHANNEL: Self = Self(1 << 10);
    pub const SEND_MESSAGES: Self = Self(1 << 11);
    pub const MANAGE_MESSAGES: Self = Self(1 << 13);
    pub const EMBED_LINKS: Self = Self(1 << 14);
    pub const ATTACH_FILES: Self = Self(1 << 15);

    /// What ticket creators and responsible teams get on a ticket channel.
    pub const PARTICIPANT: Self = Self::VIEW_CHANNEL
        .union(Self::SEND_MESSAGES)
        .union(Self::ATTACH_FILES)
        .union(Self::EMBED_LINKS);

    /// What the bot's own member gets on a ticket channel.
    pub const CHANNEL_MANAGER: Self = Self::VIEW_CHANNEL
        .union(Self::SEND_MESSAGES)
        .union(Self::MANAGE_CHANNELS)
        .union(Self::MANAGE_MESSAGES);

    const NAMED: [(Self, &'static str); 7] = [
        (Self::ADMINISTRATOR, "administrator"),
        (Self::MANAGE_CHANNELS, "manage_channels"),
        (Self::VIEW_CHANNEL, "view_channel"),
        (Self::SEND_MESSAGES, "send_messages"),
        (Self::MANAGE_MESSAGES, "manage_messages"),
        (Self::EMBED_LINKS, "embed_links"),
        (Self::ATTACH_FILES, "attach_files"),
    ];

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Administrators implicitly hold every permission.
    pub const fn grants(self, required: Self) -> bool {
        self.contains(Self::ADMINISTRATOR) || self.contains(required)
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for ChannelPermissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Debug for ChannelPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelPermissions({})", self.names().join(" | "))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum OverwriteTarget {
    Role(RoleId),
    Member(UserId),
}

/// Per-subject allow/deny pair attached to a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub allow: ChannelPermissions,
    pub deny: ChannelPermissions,
}

impl PermissionOverwrite {
    pub fn allow(target: OverwriteTarget, permissions: ChannelPermissions) -> Self {
        Self { target, allow: permissions, deny: ChannelPermissions::NONE }
    }

    pub fn deny(target: OverwriteTarget, permissions: ChannelPermissions) -> Self {
        Self { target, allow: ChannelPermissions::NONE, deny: permissions }
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelPermissions;

    #[test]
    fn participant_set_contains_expected_flags() {
        let participant = ChannelPermissions::PARTICIPANT;

        assert!(participant.contains(ChannelPermissions::VIEW_CHANNEL));
        assert!(participant.contains(ChannelPermissions::SEND_MESSAGES));
        assert!(participant.contains(ChannelPermissions::ATTACH_FILES));
        assert!(participant.contains(ChannelPermissions::EMBED_LINKS));
        assert!(!participant.contains(ChannelPermissions::MANAGE_CHANNELS));
    }

    #[test]
    fn administrator_grants_everything() {
        let admin = ChannelPermissions::ADMINISTRATOR;
        assert!(admin.grants(ChannelPermissions::MANAGE_MESSAGES | ChannelPermissions::VIEW_CHANNEL));
        assert!(!ChannelPermissions::VIEW_CHANNEL.grants(ChannelPermissions::MANAGE_MESSAGES));
    }

    #[test]
    fn names_list_flags_in_bit_order() {
        let names = ChannelPermissions::CHANNEL_MANAGER.names();
        assert_eq!(names, vec!["manage_channels", "view_channel", "send_messages", "manage_messages"]);
    }
}
