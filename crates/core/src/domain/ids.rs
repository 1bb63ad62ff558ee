use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake_id!(
    /// Platform identity of a user or guild member.
    UserId
);
snowflake_id!(RoleId);
snowflake_id!(GuildId);
snowflake_id!(
    /// Text channels and categories share one id space.
    ChannelId
);
snowflake_id!(MessageId);
snowflake_id!(
    /// Monotonically assigned by the ticket system, never reused.
    TicketId
);

impl ChannelId {
    /// Sentinel carried by a ticket config before its channel exists.
    pub const UNPROVISIONED: Self = Self(0);

    pub const fn is_provisioned(self) -> bool {
        self.0 != 0
    }
}

impl TicketId {
    /// Four-digit zero padded form used in channel names and embeds.
    pub fn padded(self) -> String {
        format!("{:04}", self.0)
    }

    /// Accepts `7`, `0007` and `#0007`. Zero is never a ticket.
    pub fn parse_reference(raw: &str) -> Option<Self> {
        raw.trim().trim_start_matches('#').parse::<u64>().ok().filter(|id| *id > 0).map(Self)
    }
}
