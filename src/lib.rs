use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};

use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod repository;

// Module for routing segregation (Public, Authenticated).
pub mod routes;
use gate::Principal;
use routes::{authenticated, public};

// --- Public Re-exports ---

// Makes core state types easily accessible to the main application entry point (main.rs).
pub use auth::CredentialService;
pub use config::AppConfig;
pub use error::AppError;
pub use memory::MemoryRepository;
pub use repository::{PostgresRepository, Repository, RepositoryState};

/// AppState
///
/// The single, thread-safe container holding the application's services and
/// configuration, shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// Transactional content store (Postgres in production, in-memory in tests).
    pub repo: RepositoryState,
    /// Issues and verifies session credentials.
    pub credentials: CredentialService,
    /// The loaded, immutable environment configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Wires the credential service from the configuration's secret and TTL.
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self {
            repo,
            credentials: CredentialService::from_config(&config),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// Handlers and extractors pull only the component they need out of AppState.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for CredentialService {
    fn from_ref(app_state: &AppState) -> CredentialService {
        app_state.credentials.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the `authenticated_routes`. The session credential
/// is verified once here and the resulting `Principal` is stored in the request
/// extensions, where the handler's `Principal` argument picks it up. On failure
/// the request is rejected with a 401 and the store is never reached.
async fn auth_middleware(principal: Principal, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(principal);
    next.run(request).await
}

/// create_router
///
/// Assembles the routing table, applies the session middleware to the protected
/// routes and wraps everything in the observability and deadline layers.
pub fn create_router(state: AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    let request_timeout = state.config.request_timeout;

    let base_router = Router::new()
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .with_state(state);

    base_router.layer(
        ServiceBuilder::new()
            // Generates a UUID for every incoming request without one.
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            // Wraps the request/response lifecycle in a span carrying the request id.
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace_span_logger)
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(tower_http::LatencyUnit::Millis),
                    ),
            )
            // Echoes x-request-id back to the client.
            .layer(PropagateRequestIdLayer::new(x_request_id))
            // A request past its deadline is answered with 408; dropping the
            // handler future rolls back any open transaction.
            .layer(TimeoutLayer::new(request_timeout)),
    )
}

/// trace_span_logger
///
/// Builds the per-request tracing span: method, uri and the `x-request-id`
/// header, so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
