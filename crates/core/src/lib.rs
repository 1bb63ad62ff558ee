pub mod audit;
pub mod config;
pub mod domain;
pub mod embed;
pub mod errors;
pub mod platform;
pub mod system;
pub mod ticket_type;
pub mod transcripts;

pub use domain::guild::{Category, Guild, Member, Role, TextChannel};
pub use domain::ids::{ChannelId, GuildId, MessageId, RoleId, TicketId, UserId};
pub use domain::message::{Attachment, Author, ChannelMessage};
pub use domain::permissions::{ChannelPermissions, OverwriteTarget, PermissionOverwrite};
pub use domain::team::Team;
pub use domain::ticket::{Ticket, TicketConfig, TicketStatus};
pub use domain::transcript::{Transcript, TranscriptEntry};
pub use errors::{DomainError, HandlerFailure, ProvisioningStage, TicketError};
pub use platform::{ChannelProvisioning, InMemoryPlatform, PlatformError};
pub use system::{ClosedTicket, TicketSettings, TicketSystem};
pub use ticket_type::{StandardTicketType, TicketType, TicketTypeDescriptor, TicketTypeRegistry};
pub use transcripts::{InMemoryTranscriptStore, TranscriptHandler, TranscriptHandlerError};
