use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use ticketdesk_core::config::GatewayConfig;
use ticketdesk_core::domain::ids::GuildId;
use tracing::{debug, info, warn};

use crate::commands::{CommandDefinition, CommandReply};
use crate::events::{EventContext, EventDispatcher, GatewayEnvelope, GatewayEvent, HandlerResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport response failed: {0}")]
    Respond(String),
    #[error("command sync failed: {0}")]
    Sync(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 10, base_delay_ms: 1_000, max_delay_ms: 60_000 }
    }
}

impl From<&GatewayConfig> for ReconnectPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_reconnect_attempts,
            base_delay_ms: config.reconnect_base_delay_ms,
            max_delay_ms: config.reconnect_max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Opens a session. `resume_from` is the last sequence seen by the
    /// previous session, if any.
    async fn connect(&self, resume_from: Option<u64>) -> Result<(), TransportError>;
    /// `None` means the platform closed the stream cleanly.
    async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError>;
    async fn respond(&self, interaction_id: &str, reply: &CommandReply)
        -> Result<(), TransportError>;
    /// Announces the command set for `guild_id`; returns how many the
    /// platform accepted.
    async fn sync_commands(
        &self,
        guild_id: GuildId,
        definitions: &[CommandDefinition],
    ) -> Result<usize, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Connects instantly and never delivers an event.
#[derive(Default)]
pub struct NoopGatewayTransport;

#[async_trait]
impl GatewayTransport for NoopGatewayTransport {
    async fn connect(&self, _resume_from: Option<u64>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError> {
        Ok(None)
    }

    async fn respond(
        &self,
        _interaction_id: &str,
        _reply: &CommandReply,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn sync_commands(
        &self,
        _guild_id: GuildId,
        definitions: &[CommandDefinition],
    ) -> Result<usize, TransportError> {
        Ok(definitions.len())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct GatewayRunner {
    transport: Arc<dyn GatewayTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
    guild_id: GuildId,
    commands: Vec<CommandDefinition>,
    // 0 until the first envelope arrives; platform sequences start at 1.
    last_sequence: AtomicU64,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            reconnect_policy,
            guild_id: GuildId::default(),
            commands: Vec::new(),
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Commands announced to `guild_id` after every successful connect.
    pub fn with_commands(mut self, guild_id: GuildId, commands: Vec<CommandDefinition>) -> Self {
        self.guild_id = guild_id;
        self.commands = commands;
        self
    }

    pub fn last_sequence(&self) -> Option<u64> {
        match self.last_sequence.load(Ordering::SeqCst) {
            0 => None,
            sequence => Some(sequence),
        }
    }

    /// Runs until the stream closes cleanly or reconnects are exhausted.
    /// Exhaustion is logged, not returned, so the process keeps serving.
    /// A session that delivered at least one envelope resets the retry
    /// budget and the backoff exponent.
    pub async fn start(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            let mut received = 0;
            let Err(transport_error) = self.connect_and_pump(attempt, &mut received).await else {
                return Ok(());
            };

            if received > 0 {
                attempt = 0;
            }
            warn!(
                attempt,
                received,
                max_retries = self.reconnect_policy.max_retries,
                error = %transport_error,
                "gateway transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    max_retries = self.reconnect_policy.max_retries,
                    "gateway retries exhausted; continuing process without crash"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// Counts delivered envelopes into `received`, which survives a failed
    /// session so the caller can tell a healthy drop from a dead link.
    async fn connect_and_pump(
        &self,
        attempt: u32,
        received: &mut usize,
    ) -> Result<(), TransportError> {
        let resume_from = self.last_sequence();
        info!(attempt, resume_from = ?resume_from, "opening gateway connection");
        self.transport.connect(resume_from).await?;
        info!(attempt, "gateway connected");

        if !self.commands.is_empty() {
            match self.transport.sync_commands(self.guild_id, &self.commands).await {
                Ok(synced) => info!(
                    event_name = "gateway.commands_synced",
                    guild_id = %self.guild_id,
                    synced,
                    "synced application commands"
                ),
                Err(error) => warn!(
                    event_name = "gateway.commands_synced",
                    guild_id = %self.guild_id,
                    error = %error,
                    "command sync failed; existing commands stay active"
                ),
            }
        }

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "gateway stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            self.last_sequence.fetch_max(envelope.sequence, Ordering::SeqCst);
            *received += 1;

            let correlation_id = correlation_id(&envelope);
            info!(
                event_name = "ingress.gateway.envelope_received",
                sequence = envelope.sequence,
                event_type = ?envelope.event.event_type(),
                correlation_id = %correlation_id,
                "received gateway envelope"
            );

            let context = EventContext { correlation_id };
            match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(HandlerResult::Responded(reply)) => self.respond(&envelope, &reply, &context).await,
                Ok(_) => {}
                Err(error) => warn!(
                    sequence = envelope.sequence,
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "event dispatch failed; continuing gateway loop"
                ),
            }
        }
    }

    async fn respond(&self, envelope: &GatewayEnvelope, reply: &CommandReply, ctx: &EventContext) {
        let GatewayEvent::CommandInvoked(invocation) = &envelope.event else {
            debug!(correlation_id = %ctx.correlation_id, "reply without an interaction; dropped");
            return;
        };

        if let Err(error) = self.transport.respond(&invocation.interaction_id, reply).await {
            warn!(
                event_name = "egress.gateway.response_sent",
                correlation_id = %ctx.correlation_id,
                error = %error,
                "failed to answer interaction"
            );
        } else {
            debug!(
                event_name = "egress.gateway.response_sent",
                correlation_id = %ctx.correlation_id,
                ephemeral = reply.ephemeral,
                "answered interaction"
            );
        }
    }
}

fn correlation_id(envelope: &GatewayEnvelope) -> String {
    match &envelope.event {
        GatewayEvent::CommandInvoked(invocation) => invocation.interaction_id.clone(),
        _ => format!("seq-{}", envelope.sequence),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Arc;

    use async_trait::async_trait;
    use ticketdesk_core::domain::guild::Member;
    use ticketdesk_core::domain::ids::{ChannelId, GuildId, UserId};
    use ticketdesk_core::domain::permissions::ChannelPermissions;
    use tokio::sync::Mutex;

    use super::{GatewayRunner, GatewayTransport, ReconnectPolicy, TransportError};
    use crate::commands::{
        CommandDefinition, CommandInvocation, CommandRegistry, CommandReply,
    };
    use crate::events::{CommandInvokedHandler, EventDispatcher, GatewayEnvelope, GatewayEvent};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<GatewayEnvelope>, TransportError>>,
        resume_points: Vec<Option<u64>>,
        responses: Vec<(String, CommandReply)>,
        synced: Vec<usize>,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<GatewayEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn resume_points(&self) -> Vec<Option<u64>> {
            self.state.lock().await.resume_points.clone()
        }

        async fn responses(&self) -> Vec<(String, CommandReply)> {
            self.state.lock().await.responses.clone()
        }
    }

    #[async_trait]
    impl GatewayTransport for ScriptedTransport {
        async fn connect(&self, resume_from: Option<u64>) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.resume_points.push(resume_from);
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<GatewayEnvelope>, TransportError> {
            let mut state = self.state.lock().await;
            state.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn respond(
            &self,
            interaction_id: &str,
            reply: &CommandReply,
        ) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.responses.push((interaction_id.to_owned(), reply.clone()));
            Ok(())
        }

        async fn sync_commands(
            &self,
            _guild_id: GuildId,
            definitions: &[CommandDefinition],
        ) -> Result<usize, TransportError> {
            let mut state = self.state.lock().await;
            state.synced.push(definitions.len());
            Ok(definitions.len())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.lock().await.disconnect_calls += 1;
            Ok(())
        }
    }

    fn unsupported(sequence: u64) -> Result<Option<GatewayEnvelope>, TransportError> {
        Ok(Some(GatewayEnvelope {
            sequence,
            event: GatewayEvent::Unsupported { event_type: "PRESENCE_UPDATE".to_owned() },
        }))
    }

    fn instant(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![unsupported(1), Ok(None)],
        ));

        let runner = GatewayRunner::new(transport.clone(), EventDispatcher::default(), instant(2));

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.resume_points().await, vec![None, None]);
        assert_eq!(transport.state.lock().await.disconnect_calls, 1);
    }

    #[tokio::test]
    async fn resumes_from_last_sequence_after_read_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                unsupported(3),
                unsupported(4),
                Err(TransportError::Receive("reset by peer".to_owned())),
                unsupported(5),
                Ok(None),
            ],
        ));

        let runner = GatewayRunner::new(transport.clone(), EventDispatcher::default(), instant(3));

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.resume_points().await, vec![None, Some(4)]);
        assert_eq!(runner.last_sequence(), Some(5));
    }

    #[tokio::test]
    async fn healthy_sessions_reset_the_retry_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                unsupported(1),
                Err(TransportError::Receive("drop-1".to_owned())),
                unsupported(2),
                Err(TransportError::Receive("drop-2".to_owned())),
                unsupported(3),
                Ok(None),
            ],
        ));

        let runner = GatewayRunner::new(transport.clone(), EventDispatcher::default(), instant(1));

        runner.start().await.expect("runner should not fail");

        assert_eq!(runner.last_sequence(), Some(3));
        assert_eq!(transport.resume_points().await, vec![None, Some(1), Some(2)]);
        assert_eq!(transport.state.lock().await.disconnect_calls, 1);
    }

    #[tokio::test]
    async fn silent_sessions_still_count_against_the_budget() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                unsupported(1),
                Err(TransportError::Receive("drop-1".to_owned())),
                Err(TransportError::Receive("drop-2".to_owned())),
                unsupported(2),
                Ok(None),
            ],
        ));

        let runner = GatewayRunner::new(transport.clone(), EventDispatcher::default(), instant(1));

        runner.start().await.expect("runner should degrade gracefully");

        assert_eq!(runner.last_sequence(), Some(1));
        assert_eq!(transport.resume_points().await, vec![None, Some(1)]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = GatewayRunner::new(transport.clone(), EventDispatcher::default(), instant(2));

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.resume_points().await.len(), 3);
    }

    #[tokio::test]
    async fn command_replies_are_sent_to_the_interaction() {
        let invocation = CommandInvocation {
            interaction_id: "int-9".to_owned(),
            guild_id: GuildId(1),
            channel_id: ChannelId(2),
            command: "ticket missing".to_owned(),
            options: BTreeMap::new(),
            member: Member::new(UserId(3), "casey"),
            member_permissions: ChannelPermissions::NONE,
        };
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![
                Ok(Some(GatewayEnvelope { sequence: 1, event: GatewayEvent::CommandInvoked(invocation) })),
                Ok(None),
            ],
        ));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(CommandInvokedHandler::new(Arc::new(CommandRegistry::new())));
        let runner = GatewayRunner::new(transport.clone(), dispatcher, instant(0))
            .with_commands(GuildId(1), vec![CommandDefinition::new("ticket list", "List")]);

        runner.start().await.expect("runner");

        let responses = transport.responses().await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, "int-9");
        assert!(responses[0].1.ephemeral);
        assert_eq!(transport.state.lock().await.synced, vec![1]);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy { max_retries: 10, base_delay_ms: 1_000, max_delay_ms: 60_000 };

        assert_eq!(policy.backoff(0).as_millis(), 1_000);
        assert_eq!(policy.backoff(3).as_millis(), 8_000);
        assert_eq!(policy.backoff(9).as_millis(), 60_000);
        assert_eq!(policy.backoff(40).as_millis(), 60_000);
    }
}
