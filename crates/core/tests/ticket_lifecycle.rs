use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ticketdesk_core::audit::InMemoryAuditSink;
use ticketdesk_core::platform::PlatformOperation;
use ticketdesk_core::{
    Author, ChannelId, Guild, GuildId, InMemoryPlatform, InMemoryTranscriptStore, Member,
    PlatformError, ProvisioningStage, Role, RoleId, StandardTicketType, Team, TicketError,
    TicketId, TicketStatus, TicketSystem, TicketTypeDescriptor, Transcript, TranscriptHandler,
    TranscriptHandlerError, UserId,
};

const REQUESTER: UserId = UserId(123);
const ADMIN: UserId = UserId(1);
const SUPPORT_ROLE: RoleId = RoleId(50);

struct Harness {
    platform: Arc<InMemoryPlatform>,
    store: Arc<InMemoryTranscriptStore>,
    audit: InMemoryAuditSink,
    archive: ChannelId,
    system: TicketSystem,
}

async fn harness() -> Harness {
    let platform = Arc::new(InMemoryPlatform::default());
    let archive = platform.seed_text_channel(GuildId(10), "ticket-archive").id;
    let store = Arc::new(InMemoryTranscriptStore::new());
    let audit = InMemoryAuditSink::default();

    let guild = Guild {
        id: GuildId(10),
        name: "Support Guild".to_owned(),
        everyone_role: RoleId(10),
        bot_user_id: UserId(900),
        roles: vec![Role::new(SUPPORT_ROLE, "Support")],
    };
    let mut system = TicketSystem::bootstrap(guild, "Tickets", archive, platform.clone())
        .await
        .expect("bootstrap")
        .with_audit_sink(Arc::new(audit.clone()));

    system.register_ticket_type(Arc::new(StandardTicketType::new(
        TicketTypeDescriptor::new("support", "Support")
            .with_channel_prefix("sup")
            .with_team(Team::new("support", SUPPORT_ROLE)),
    )));
    system.register_ticket_type(Arc::new(StandardTicketType::new(TicketTypeDescriptor::new(
        "billing", "Billing",
    ))));
    system.add_transcript_handler(store.clone());

    Harness { platform, store, audit, archive, system }
}

fn requester() -> Member {
    Member::new(REQUESTER, "requester")
}

fn admin() -> Member {
    Member::new(ADMIN, "admin").with_role(SUPPORT_ROLE)
}

struct FailingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl TranscriptHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn save_transcript(&self, _transcript: &Transcript) -> Result<(), TranscriptHandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TranscriptHandlerError::Storage("disk full".to_owned()))
    }

    async fn get_transcript(
        &self,
        _ticket_id: TicketId,
    ) -> Result<Option<Transcript>, TranscriptHandlerError> {
        Ok(None)
    }
}

#[tokio::test]
async fn support_ticket_round_trip() {
    let mut h = harness().await;

    let ticket = h.system.create_ticket(&requester(), "support").await.expect("create");
    assert_eq!(ticket.ticket_id(), TicketId(1));
    assert_eq!(ticket.channel().name, "sup-0001");
    assert_eq!(ticket.status(), TicketStatus::Open);
    let channel_id = ticket.channel().id;
    assert_eq!(ticket.config().channel_id(), channel_id);

    h.platform.seed_message(channel_id, Author::new(REQUESTER, "requester"), "my printer is on fire")
        .expect("seed");
    h.platform.seed_message(channel_id, Author::new(ADMIN, "admin"), "have you tried water")
        .expect("seed");

    let closed = h.system.close_ticket(TicketId(1), &admin()).await.expect("close");

    assert_eq!(closed.closed_by, ADMIN);
    assert!(closed.archive_notified);
    assert!(h.system.get_ticket(TicketId(1)).is_none());
    assert_eq!(h.system.open_ticket_count(), 0);

    let persisted = h.store.get_transcript(TicketId(1)).await.expect("lookup").expect("saved");
    assert_eq!(persisted.creator_id, REQUESTER);
    assert_eq!(persisted.ticket_type, "support");
    assert!(persisted.is_closed());
    // creation embed, team ping, then the two seeded messages
    assert_eq!(persisted.message_count(), 4);
    assert_eq!(persisted.entries()[3].content, "have you tried water");
    assert!(persisted.unique_participants().contains(&REQUESTER));

    let archive = h.platform.messages(h.archive);
    assert_eq!(archive.len(), 1);
    assert_eq!(archive[0].embeds[0]["title"], "🎫 #1");
}

#[tokio::test]
async fn unknown_type_creates_nothing() {
    let mut h = harness().await;

    let error = h.system.create_ticket(&requester(), "bogus").await.expect_err("unknown type");

    assert_eq!(error, TicketError::UnknownTicketType("bogus".to_owned()));
    assert_eq!(h.system.next_ticket_id(), TicketId(1));
    assert_eq!(h.system.open_ticket_count(), 0);
    assert!(h.platform.channels().iter().all(|provisioned| provisioned.channel.id == h.archive));
    assert_eq!(h.audit.events_of_type("ticket.create_failed").len(), 1);
}

#[tokio::test]
async fn sequential_tickets_for_one_user_get_consecutive_ids() {
    let mut h = harness().await;

    let first = h.system.create_ticket(&requester(), "support").await.expect("first").ticket_id();
    let second = h.system.create_ticket(&requester(), "billing").await.expect("second").ticket_id();

    assert_eq!((first, second), (TicketId(1), TicketId(2)));
    assert_eq!(h.system.get_user_tickets(REQUESTER).len(), 2);
    assert!(h.platform.channel_named("billing-0002").is_some());
}

#[tokio::test]
async fn ids_keep_increasing_across_failed_creations() {
    let mut h = harness().await;
    h.platform.fail_next(PlatformOperation::CreateTextChannel, PlatformError::Forbidden("nope".into()));

    let failed = h.system.create_ticket(&requester(), "support").await.expect_err("channel fails");
    assert!(matches!(
        failed,
        TicketError::ChannelProvisioning { ticket_id: TicketId(1), stage: ProvisioningStage::Channel, .. }
    ));
    assert!(h.system.get_ticket(TicketId(1)).is_none());

    let created = h.system.create_ticket(&requester(), "support").await.expect("retry").ticket_id();
    assert_eq!(created, TicketId(2));
    assert!(h.platform.channel_named("sup-0002").is_some());
    assert_eq!(h.system.next_ticket_id(), TicketId(3));
}

#[tokio::test]
async fn closing_unknown_ticket_leaves_map_unchanged() {
    let mut h = harness().await;
    h.system.create_ticket(&requester(), "support").await.expect("create");

    let error = h.system.close_ticket(TicketId(42), &admin()).await.expect_err("unknown id");

    assert_eq!(error, TicketError::TicketNotFound(TicketId(42)));
    assert_eq!(h.system.open_ticket_count(), 1);
    assert!(h.system.get_ticket(TicketId(1)).is_some());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn closed_ticket_vanishes_from_every_query() {
    let mut h = harness().await;
    let channel_id = h.system.create_ticket(&requester(), "support").await.expect("create").channel().id;
    h.system.create_ticket(&requester(), "support").await.expect("second");

    h.system.close_ticket(TicketId(1), &admin()).await.expect("close");

    assert!(h.system.get_ticket_by_channel(channel_id).is_none());
    assert!(h.system.get_tickets_by_type("support").iter().all(|t| t.ticket_id() != TicketId(1)));
    assert!(h.system.get_user_tickets(REQUESTER).iter().all(|t| t.ticket_id() != TicketId(1)));
    assert_eq!(h.system.get_tickets_by_type("support").len(), 1);
}

#[tokio::test]
async fn closure_timestamps_never_precede_creation() {
    let mut h = harness().await;
    let created_at = h.system.create_ticket(&requester(), "billing").await.expect("create").config().created_at;

    let closed = h.system.close_ticket(TicketId(1), &requester()).await.expect("close");

    assert!(closed.closed_at >= created_at);
    assert_eq!(closed.transcript.closed_at, Some(closed.closed_at));
    assert!(closed.transcript.closed_at >= Some(closed.transcript.created_at));
}

#[tokio::test]
async fn every_handler_runs_and_failures_are_aggregated() {
    let mut h = harness().await;
    let failing = Arc::new(FailingHandler { calls: AtomicUsize::new(0) });
    let trailing = Arc::new(InMemoryTranscriptStore::new());
    h.system.add_transcript_handler(failing.clone());
    h.system.add_transcript_handler(trailing.clone());
    h.system.create_ticket(&requester(), "support").await.expect("create");

    let error = h.system.close_ticket(TicketId(1), &admin()).await.expect_err("handler fails");

    match error {
        TicketError::HandlerPersist { ticket_id, failures } => {
            assert_eq!(ticket_id, TicketId(1));
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].handler, "failing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.len(), 1, "handler before the failure saved");
    assert_eq!(trailing.len(), 1, "handler after the failure still ran");
    assert!(h.system.get_ticket(TicketId(1)).is_none(), "ticket is removed regardless");
    assert_eq!(h.audit.events_of_type("transcript.persist_failed").len(), 1);
}

#[tokio::test]
async fn history_failure_closes_with_partial_transcript() {
    let mut h = harness().await;
    h.system.create_ticket(&requester(), "billing").await.expect("create");
    h.platform.fail_next(PlatformOperation::FetchHistory, PlatformError::Request("reset".into()));

    let closed = h.system.close_ticket(TicketId(1), &requester()).await.expect("close");

    assert!(!closed.history_complete);
    assert_eq!(closed.transcript.message_count(), 0);
    assert!(h.store.get_transcript(TicketId(1)).await.expect("lookup").is_some());
}

#[tokio::test]
async fn history_is_paged_with_the_configured_size() {
    let mut h = harness().await;
    h.system = h.system.with_settings(ticketdesk_core::TicketSettings {
        history_page_size: 2,
        max_open_per_user: None,
    });
    let channel_id = h.system.create_ticket(&requester(), "billing").await.expect("create").channel().id;
    for index in 0..4 {
        h.platform
            .seed_message(channel_id, Author::new(REQUESTER, "requester"), &format!("line {index}"))
            .expect("seed");
    }

    let closed = h.system.close_ticket(TicketId(1), &requester()).await.expect("close");

    // creation embed plus four lines, fetched as 2 + 2 + 1
    assert_eq!(closed.transcript.message_count(), 5);
    assert_eq!(h.platform.history_requests(), 3);
    let contents: Vec<_> =
        closed.transcript.entries().iter().skip(1).map(|entry| entry.content.as_str()).collect();
    assert_eq!(contents, ["line 0", "line 1", "line 2", "line 3"]);
}

#[tokio::test]
async fn channel_overwrites_hide_ticket_from_everyone() {
    let mut h = harness().await;
    h.system.create_ticket(&requester(), "support").await.expect("create");

    let provisioned = h.platform.channel_named("sup-0001").expect("channel exists");

    assert_eq!(provisioned.overwrites.len(), 4);
    assert_eq!(provisioned.channel.category_id, Some(h.system.default_category().id));
}
