use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::MatchedPath;
use axum::{Router, routing::get};
use dotenvy::dotenv;
use http::HeaderValue;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use api::application::ports::delta_log_port::DeltaLogPort;
use api::application::ports::job_queue_port::JobQueuePort;
use api::application::ports::presence_port::PresencePort;
use api::application::services::realtime::assembler::DocumentAssembler;
use api::application::services::realtime::checkpoint::CheckpointScheduler;
use api::application::services::realtime::delta_log::DeltaLog;
use api::application::services::realtime::presence::PresenceBroadcaster;
use api::application::services::realtime::snapshot::SnapshotStore;
use api::application::session::{SessionDeps, SessionSettings};
use api::bootstrap::app_context::{AppContext, AppServices};
use api::bootstrap::config::{Config, StorageBackend};
use api::infrastructure::db::repositories::{
    access_repository_sqlx::SqlxAccessRepository, author_repository_sqlx::SqlxAuthorRepository,
    document_repository_sqlx::SqlxDocumentRepository,
    timeline_repository_sqlx::SqlxTimelineRepository, user_repository_sqlx::SqlxUserRepository,
};
use api::infrastructure::engine::YrsDocumentEngine;
use api::infrastructure::realtime::memory::{
    InMemoryDeltaLog, InMemoryJobQueue, InMemoryPresenceBus,
};
use api::infrastructure::realtime::redis::{
    JobStreamOptions, RedisDeltaLog, RedisJobQueue, RedisPresenceBus,
};
use api::infrastructure::realtime::worker::{WorkerOptions, spawn_checkpoint_worker};
use api::presentation::http::health::HealthState;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
        paths(
            api::presentation::ws::axum_ws_entry,
            api::presentation::http::documents::get_content,
            api::presentation::http::documents::checkpoint_document,
            api::presentation::http::documents::list_deltas,
            api::presentation::http::documents::delete_delta,
            api::presentation::http::documents::duplicate_document,
            api::presentation::http::documents::get_audit_log,
            api::presentation::http::health::health,
        ),
        components(schemas(
            api::presentation::http::documents::DocumentContentResponse,
            api::presentation::http::documents::CheckpointResponse,
            api::presentation::http::documents::DeltaItem,
            api::presentation::http::documents::DeltaListResponse,
            api::presentation::http::documents::DuplicateRequest,
            api::presentation::http::documents::DuplicateResponse,
            api::presentation::http::documents::AuditLogResponse,
            api::application::services::realtime::audit_log::AuditEntry,
            api::presentation::http::health::HealthResp,
        )),
        tags(
            (name = "Realtime", description = "Collaborative editing sessions"),
            (name = "Documents", description = "Document state and delta log tooling"),
            (name = "Health", description = "System health checks")
        )
    )]
struct ApiDoc;

struct RealtimeBackends {
    delta_cache: Arc<dyn DeltaLogPort>,
    presence: Arc<dyn PresencePort>,
    jobs: Arc<dyn JobQueuePort>,
    redis: Option<redis::Client>,
}

async fn realtime_backends(cfg: &Config) -> anyhow::Result<RealtimeBackends> {
    match &cfg.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str())?;
            info!(
                stream = %cfg.redis_job_stream,
                group = %cfg.redis_job_group,
                consumer = %cfg.redis_job_consumer,
                "cluster_mode_enabled"
            );
            Ok(RealtimeBackends {
                delta_cache: Arc::new(RedisDeltaLog::connect(client.clone()).await?),
                presence: Arc::new(RedisPresenceBus::connect(client.clone()).await?),
                jobs: Arc::new(RedisJobQueue::new(
                    client.clone(),
                    JobStreamOptions {
                        stream_key: cfg.redis_job_stream.clone(),
                        group: cfg.redis_job_group.clone(),
                        consumer: cfg.redis_job_consumer.clone(),
                        max_len: Some(cfg.redis_stream_max_len),
                        poll_interval: Duration::from_millis(500),
                    },
                )),
                redis: Some(client),
            })
        }
        None => {
            info!("single_node_mode_enabled");
            Ok(RealtimeBackends {
                delta_cache: Arc::new(InMemoryDeltaLog::new()),
                presence: Arc::new(InMemoryPresenceBus::new()),
                jobs: Arc::new(InMemoryJobQueue::new()),
                redis: None,
            })
        }
    }
}

fn cors_layer(cfg: &Config) -> CorsLayer {
    let methods = [
        http::Method::GET,
        http::Method::POST,
        http::Method::DELETE,
        http::Method::OPTIONS,
    ];
    let headers = [http::header::CONTENT_TYPE, http::header::AUTHORIZATION];
    let origin = match cfg.frontend_url.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => AllowOrigin::exact(origin),
        _ if cfg.is_production => {
            AllowOrigin::exact(HeaderValue::from_static("http://invalid"))
        }
        // Development convenience
        _ => AllowOrigin::mirror_request(),
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(?e, "shutdown_signal_failed");
    }
    info!("shutdown_requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "api=debug,docsync_api=debug,axum=info,tower_http=info".into()
        }))
        .init();

    let cfg = Config::from_env()?;
    info!(
        api_port = cfg.api_port,
        storage_backend = ?cfg.storage_backend,
        cluster_mode = cfg.redis_url.is_some(),
        "starting_docsync_backend"
    );

    // Database
    let pool =
        api::infrastructure::db::connect_pool(&cfg.database_url, cfg.database_max_connections)
            .await?;
    api::infrastructure::db::migrate(&pool).await?;

    if matches!(cfg.storage_backend, StorageBackend::Filesystem) {
        if let Err(e) = tokio::fs::create_dir_all(&cfg.storage_root).await {
            tracing::warn!(error = ?e, dir = %cfg.storage_root, "storage_root_create_failed");
        }
    }
    let objects = api::infrastructure::storage::build_object_store(&cfg).await?;
    let backends = realtime_backends(&cfg).await?;

    let engine = Arc::new(YrsDocumentEngine);
    let snapshots = SnapshotStore::new(objects.clone(), engine, cfg.snapshot_prefix.clone());
    let delta_log = DeltaLog::new(backends.delta_cache.clone(), snapshots.clone());
    let assembler = DocumentAssembler::new(snapshots, delta_log);

    let user_repo = Arc::new(SqlxUserRepository::new(pool.clone()));
    let presence = PresenceBroadcaster::new(
        backends.presence.clone(),
        user_repo.clone(),
        Duration::from_secs(cfg.presence_check_interval_secs),
    );
    let scheduler = CheckpointScheduler::new(backends.jobs.clone(), cfg.checkpoint_every_ops);

    let session = SessionDeps {
        assembler: assembler.clone(),
        presence,
        scheduler: scheduler.clone(),
        jobs: backends.jobs.clone(),
        objects: objects.clone(),
        access: Arc::new(SqlxAccessRepository::new(pool.clone())),
        authors: Arc::new(SqlxAuthorRepository::new(pool.clone())),
        documents: Arc::new(SqlxDocumentRepository::new(pool.clone())),
        events: Arc::new(SqlxTimelineRepository::new(pool.clone())),
        settings: SessionSettings::from(&cfg),
    };
    let ctx = AppContext::new(cfg.clone(), AppServices::new(session, user_repo));

    // Background checkpoints
    let worker_handle = spawn_checkpoint_worker(
        backends.jobs.clone(),
        assembler,
        WorkerOptions {
            max_attempts: cfg.checkpoint_max_attempts.max(1),
            retry_delay: Duration::from_millis(cfg.checkpoint_retry_delay_ms),
        },
    );
    let sweeper_handle =
        scheduler.spawn_sweeper(Duration::from_secs(cfg.snapshot_interval_secs.max(1)));

    let api_router = Router::new()
        .nest(
            "/api",
            api::presentation::http::health::routes(HealthState {
                pool: pool.clone(),
                redis: backends.redis.clone(),
            }),
        )
        .nest(
            "/api",
            api::presentation::http::documents::routes(ctx.clone()),
        )
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()));

    let ws_router = Router::new()
        .route(
            "/ws/documents/:id",
            get(api::presentation::ws::axum_ws_entry),
        )
        .with_state(ctx.clone());

    let app = api_router
        .merge(ws_router)
        .layer(cors_layer(&cfg))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                let matched = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                tracing::info_span!("http", %method, %uri, matched_path = %matched)
            }),
        );

    let api_addr = SocketAddr::from(([0, 0, 0, 0], cfg.api_port));
    info!(%api_addr, "http_api_listening");
    let listener = tokio::net::TcpListener::bind(api_addr).await?;

    let api_handle: JoinHandle<anyhow::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    });

    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(?e, "api_server_failed"),
        Err(e) => error!(?e, "api_server_panicked"),
    }

    sweeper_handle.abort();
    worker_handle.abort();
    Ok(())
}
