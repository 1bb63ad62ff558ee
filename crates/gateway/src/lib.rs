//! Gateway adapter - the chat platform side of ticketdesk
//!
//! This crate connects the ticket system to a real-time platform gateway:
//! - **Gateway** (`gateway`) - transport trait and the reconnecting event loop
//! - **Events** (`events`) - envelopes, event types and the dispatcher
//! - **Commands** (`commands`) - explicit command registry with capability checks
//! - **Tickets** (`tickets`) - `/ticket open`, `/ticket close`, `/ticket list`, `/ticket types`
//!
//! # Architecture
//!
//! ```text
//! Gateway → GatewayRunner → EventDispatcher → CommandRegistry → TicketDesk
//!                ↑                                                 ↓
//!          respond(reply) ←──────────── CommandReply ←──── TicketSystem
//! ```
//!
//! # Key Types
//!
//! - `GatewayRunner` - event loop with exponential reconnect backoff
//! - `EventDispatcher` - routes envelopes to handlers by event type
//! - `CommandRegistry` - command definitions plus their permission predicates
//! - `TicketDesk` - lazily built, mutex-guarded `TicketSystem` for one guild

pub mod commands;
pub mod events;
pub mod gateway;
pub mod tickets;

pub use commands::{
    CapabilityDenial, CapabilityRequirement, CommandDefinition, CommandError, CommandHandler,
    CommandInvocation, CommandOption, CommandRegistry, CommandReply,
};
pub use events::{
    CommandInvokedHandler, DispatchError, EventContext, EventDispatcher, EventHandler,
    EventHandlerError, GatewayEnvelope, GatewayEvent, GatewayEventType, GuildAvailableHandler,
    GuildSetupService, HandlerResult,
};
pub use gateway::{
    GatewayRunner, GatewayTransport, NoopGatewayTransport, ReconnectPolicy, TransportError,
};
pub use tickets::{register_ticket_commands, TicketDesk, TicketDeskSettings};
