use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use ticketdesk_db::DbPool;
use ticketdesk_gateway::TicketDesk;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    desk: TicketDesk,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub ticket_system: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, desk: TicketDesk) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, desk })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    desk: TicketDesk,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, desk)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// The database decides the status code. A ticket system still waiting for
/// its guild is reported as `pending` without failing the check.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ticket_system = ticket_system_check(&state.desk).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: match (ready, ticket_system.status) {
            (false, _) => "degraded",
            (true, "ready") => "ready",
            (true, _) => "starting",
        },
        service: HealthCheck {
            status: "ready",
            detail: "ticketdesk-server runtime initialized".to_string(),
        },
        database,
        ticket_system,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn ticket_system_check(desk: &TicketDesk) -> HealthCheck {
    match desk.open_ticket_count().await {
        Some(open) => HealthCheck { status: "ready", detail: format!("{open} open ticket(s)") },
        None => HealthCheck {
            status: "pending",
            detail: format!("waiting for guild {}", desk.settings().guild_id),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::{extract::State, Json};
    use ticketdesk_core::{Guild, GuildId, InMemoryPlatform, RoleId, TicketSettings, UserId};
    use ticketdesk_db::connect_with_settings;
    use ticketdesk_gateway::{TicketDesk, TicketDeskSettings};
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    fn desk() -> TicketDesk {
        let platform = Arc::new(InMemoryPlatform::default());
        let archive = platform.seed_text_channel(GuildId(10), "archive").id;
        TicketDesk::new(
            TicketDeskSettings {
                guild_id: GuildId(10),
                default_category: "Tickets".to_string(),
                archive_channel_id: archive,
                ticket: TicketSettings::default(),
                types: Vec::new(),
            },
            platform,
        )
    }

    fn guild() -> Guild {
        Guild {
            id: GuildId(10),
            name: "support".to_string(),
            everyone_role: RoleId(10),
            bot_user_id: UserId(900),
            roles: Vec::new(),
        }
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_and_guild_are_up() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        let desk = desk();
        desk.initialise(&guild()).await.expect("initialise");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), desk })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.ticket_system.detail, "0 open ticket(s)");

        pool.close().await;
    }

    #[tokio::test]
    async fn pending_guild_reports_starting() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool, desk: desk() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "starting");
        assert_eq!(payload.ticket_system.status, "pending");
        assert_eq!(payload.ticket_system.detail, "waiting for guild 10");
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool, desk: desk() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn router_serves_health_as_json() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        let response = router(pool, desk())
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 64 * 1024).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["ticket_system"]["status"], "pending");
        assert_eq!(json["database"]["status"], "ready");
    }
}
