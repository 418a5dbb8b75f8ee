//! # HTTP API
//!
//! axum router over a shared [`FilingSessionManager`].
//!
//! | Method | Path                            | Operation            |
//! |--------|---------------------------------|----------------------|
//! | GET    | `/health`                       | liveness (no auth)   |
//! | POST   | `/sessions`                     | create               |
//! | GET    | `/sessions/{id}`                | read                 |
//! | POST   | `/sessions/{id}/transitions`    | transition           |
//! | GET    | `/sessions/{id}/transitions`    | history              |
//! | POST   | `/sessions/{id}/abandon`        | abandon              |
//! | POST   | `/sessions/{id}/transfer`       | transfer             |
//! | GET    | `/sessions/{id}/transfers`      | transfer records     |
//! | GET    | `/sessions/{id}/view/{tier}`    | tiered report view   |

mod error;
mod handlers;
mod middleware;

pub use error::ApiError;

use crate::config::ServerConfig;
use crate::notify;
use crate::runtime::open_manager;
use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use filing_core::{FilingError, FilingSessionManager, ManagerConfig};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<FilingSessionManager>,
    pub api_key: Option<Arc<str>>,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl AppState {
    pub fn new(manager: Arc<FilingSessionManager>, config: &ServerConfig) -> Self {
        let limiter = NonZeroU32::new(config.rate_limit_per_sec)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))));
        Self {
            manager,
            api_key: config.api_key.as_deref().map(Arc::from),
            limiter,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Filing(#[from] FilingError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the router.
pub fn create_router(state: AppState) -> Router {
    let sessions = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route(
            "/sessions/{id}/transitions",
            post(handlers::post_transition).get(handlers::list_transitions),
        )
        .route("/sessions/{id}/abandon", post(handlers::abandon))
        .route("/sessions/{id}/transfer", post(handlers::transfer))
        .route("/sessions/{id}/transfers", get(handlers::list_transfers))
        .route("/sessions/{id}/view/{tier}", get(handlers::view))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    // Outermost first: CORS, tracing, then load shedding. `Router::layer`
    // wraps outward, so the layers are applied innermost first.
    Router::new()
        .route("/health", get(handlers::health))
        .merge(sessions)
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Periodically abandon idle sessions. Each sweep runs on the blocking pool.
pub fn spawn_sweeper(manager: Arc<FilingSessionManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let manager = Arc::clone(&manager);
            match tokio::task::spawn_blocking(move || manager.sweep_inactive()).await {
                Ok(Ok(abandoned)) if !abandoned.is_empty() => {
                    tracing::info!(count = abandoned.len(), "sweeper abandoned idle sessions");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(code = e.code(), "sweep failed: {e}"),
                Err(e) => tracing::error!("sweep task failed: {e}"),
            }
        }
    })
}

/// Open the database and serve until Ctrl-C.
pub async fn serve(
    db: &Path,
    config: ManagerConfig,
    server: ServerConfig,
) -> Result<(), ServeError> {
    let (sink, events) = notify::channel(server.event_buffer);
    let forwarder = tokio::spawn(notify::forward_events(events));

    let manager = Arc::new(open_manager(db, config, Arc::new(sink))?);
    let sweeper = server
        .sweep_interval
        .map(|every| spawn_sweeper(Arc::clone(&manager), every));

    let state = AppState::new(Arc::clone(&manager), &server);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(server.bind).await?;
    tracing::info!(
        addr = %server.bind,
        auth = server.api_key.is_some(),
        rate_limit = server.rate_limit_per_sec,
        "filing server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
        let _ = sweeper.await;
    }
    // Dropping the last manager drops the sink and lets the forwarder drain.
    drop(manager);
    if let Err(e) = forwarder.await {
        tracing::warn!("notification forwarder failed: {e}");
    }
    tracing::info!("filing server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
