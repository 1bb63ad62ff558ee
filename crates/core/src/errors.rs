use std::fmt;

use thiserror::Error;

use crate::domain::ids::{TicketId, UserId};
use crate::domain::ticket::TicketStatus;
use crate::platform::PlatformError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid ticket transition from {from:?} to {to:?}")]
    InvalidTicketTransition { from: TicketStatus, to: TicketStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Step of ticket creation that talked to the platform when it failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningStage {
    Category,
    Channel,
    CreationMessage,
    CreatedHook,
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Category => "category",
            Self::Channel => "channel",
            Self::CreationMessage => "creation message",
            Self::CreatedHook => "post-creation hook",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub message: String,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.handler, self.message)
    }
}

/// Failure reported by the ticket system's create/close entry points.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TicketError {
    #[error("unknown ticket type `{0}`")]
    UnknownTicketType(String),
    #[error("ticket #{0} not found")]
    TicketNotFound(TicketId),
    #[error("user {user_id} already has {limit} open ticket(s)")]
    TicketLimitReached { user_id: UserId, limit: usize },
    #[error("channel provisioning failed for ticket #{ticket_id} at {stage}: {source}")]
    ChannelProvisioning {
        ticket_id: TicketId,
        stage: ProvisioningStage,
        #[source]
        source: PlatformError,
    },
    #[error("transcript persistence failed for ticket #{ticket_id}: {}", join_failures(.failures))]
    HandlerPersist { ticket_id: TicketId, failures: Vec<HandlerFailure> },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl TicketError {
    pub fn provisioning(ticket_id: TicketId, stage: ProvisioningStage, source: PlatformError) -> Self {
        Self::ChannelProvisioning { ticket_id, stage, source }
    }

    /// Short machine-readable kind, used as a log and audit field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTicketType(_) => "unknown_ticket_type",
            Self::TicketNotFound(_) => "ticket_not_found",
            Self::TicketLimitReached { .. } => "ticket_limit_reached",
            Self::ChannelProvisioning { .. } => "channel_provisioning_failure",
            Self::HandlerPersist { .. } => "handler_persist_failure",
            Self::Domain(_) => "domain",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownTicketType(identifier) => {
                format!("There is no ticket type called `{identifier}`.")
            }
            Self::TicketNotFound(ticket_id) => format!("Ticket #{} is not open.", ticket_id.padded()),
            Self::TicketLimitReached { limit, .. } => {
                format!("You already have {limit} open ticket(s). Close one before opening another.")
            }
            Self::ChannelProvisioning { .. } => {
                "The ticket channel could not be set up. Please try again shortly.".to_owned()
            }
            Self::HandlerPersist { ticket_id, .. } => format!(
                "Ticket #{} was closed, but its transcript could not be saved everywhere.",
                ticket_id.padded()
            ),
            Self::Domain(_) => "The ticket is not in a state that allows this action.".to_owned(),
        }
    }
}

fn join_failures(failures: &[HandlerFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
