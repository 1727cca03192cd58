use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use voxflow_api::config::ServerConfig;
use voxflow_api::routes;
use voxflow_api::state::AppState;
use voxflow_capability::{Capability, CapabilityRegistry, HttpMediaFetcher, StubCapability};
use voxflow_core::job::{JobKind, POOL_CPU, POOL_GPU};
use voxflow_engine::{EngineConfig, Orchestrator};
use voxflow_events::ProgressChannel;
use voxflow_store::{JobStore, MemoryBlobStore, MemoryMetaStore};

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// Build the full application router with all middleware layers, backed by
/// in-memory stores and stub capabilities.
///
/// No scheduler runs, so admitted jobs stay `Pending` -- exactly what
/// HTTP-level tests want: deterministic records to look at.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_test_app() -> Router {
    let config = test_config();

    let store = JobStore::new(Arc::new(MemoryMetaStore::new()));
    let blobs = Arc::new(MemoryBlobStore::new());

    let gpu: Arc<dyn Capability> = Arc::new(StubCapability::succeeding("gpu-stub", POOL_GPU));
    let cpu: Arc<dyn Capability> = Arc::new(StubCapability::succeeding("cpu-stub", POOL_CPU));
    let registry = CapabilityRegistry::build([
        (JobKind::VoiceClone, Arc::clone(&gpu)),
        (JobKind::Diarize, Arc::clone(&gpu)),
        (JobKind::ExtractSpeakers, gpu),
        (JobKind::Translate, cpu),
    ])
    .unwrap();

    let fetcher = Arc::new(HttpMediaFetcher::new(Duration::from_secs(1)).unwrap());

    let orchestrator = Orchestrator::new(
        store,
        blobs,
        Arc::new(registry),
        fetcher,
        ProgressChannel::default(),
        EngineConfig::default(),
    );

    let state = AppState {
        orchestrator,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

/// Send a GET request to the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Send a POST request with an empty body.
pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
