use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

#[derive(Clone)]
pub struct HealthState {
    pub pool: PgPool,
    pub redis: Option<redis::Client>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResp {
    pub status: &'static str,
    pub database: bool,
    /// Absent when running without Redis.
    pub redis: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, body = HealthResp))
)]
pub async fn health(State(state): State<HealthState>) -> Json<HealthResp> {
    let database = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    let redis = match &state.redis {
        Some(client) => Some(redis_ping(client).await),
        None => None,
    };
    let status = if database && redis.unwrap_or(true) {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResp {
        status,
        database,
        redis,
    })
}

async fn redis_ping(client: &redis::Client) -> bool {
    let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
        return false;
    };
    let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
    pong.is_ok()
}

pub fn routes(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}
