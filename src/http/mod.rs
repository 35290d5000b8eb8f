pub mod error;
pub mod extract;
pub mod handlers;
pub(crate) mod helpers;

use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Body;
use axum::http::Request;
use axum::middleware::{from_fn, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use rusqlite::Connection;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth;
use crate::config::ServerConfig;
use crate::http::error::ApiError;

/// Shared per-request context: the single SQLite connection behind a lock,
/// plus startup configuration. Handlers take the lock for the duration of
/// their database work, so requests serialize at the storage layer.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<ServerConfig>,
    bootstrap_digest: Option<String>,
}

impl AppState {
    pub fn new(config: ServerConfig, conn: Connection) -> Self {
        let bootstrap_digest = config.admin_token.as_deref().map(auth::token_digest);
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            bootstrap_digest,
        }
    }

    /// A poisoned lock means a handler panicked mid-request; the connection
    /// itself stays usable, so recover the guard instead of propagating.
    pub fn db(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bootstrap_digest(&self) -> Option<&str> {
        self.bootstrap_digest.as_deref()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/api/version", get(handlers::health::version))
        .nest("/api/tokens", handlers::tokens::router())
        .nest("/api/students", handlers::students::router())
        .nest("/api/staff", handlers::staff::router())
        .nest("/api/classes", handlers::classes::router())
        .nest("/api/attendance", handlers::attendance::router())
        .nest("/api/subjects", handlers::subjects::router())
        .nest("/api/exams", handlers::exams::router())
        .nest("/api/fees", handlers::fees::router())
        .nest("/api/library", handlers::library::router())
        .nest("/api/transport", handlers::transport::router())
        .nest("/api/notices", handlers::notices::router())
        .nest("/api/cms", handlers::cms::router())
        .nest("/api/newsletter", handlers::newsletter::router())
        .route("/api/dashboard", get(handlers::dashboard::summary))
        .route("/api/backup", post(handlers::backup::create))
        .fallback(unknown_route)
        .layer(from_fn(request_tracing))
        .with_state(state)
}

async fn unknown_route() -> ApiError {
    ApiError::not_found("resource")
}

async fn request_tracing(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string();

    let span = tracing::info_span!(
        "http.request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
