use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voxflow_api::config::{OrchestratorConfig, ServerConfig};
use voxflow_api::{routes, state};
use voxflow_capability::{Capability, CapabilityRegistry, HttpMediaFetcher, RemoteCapability};
use voxflow_core::job::{JobKind, POOL_CPU, POOL_GPU};
use voxflow_engine::{Orchestrator, Reaper, Scheduler};
use voxflow_events::ProgressChannel;
use voxflow_store::{FsBlobStore, JobStore, MemoryMetaStore};

use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let orch_config = OrchestratorConfig::from_env();
    tracing::info!(
        blob_root = %orch_config.blob_root.display(),
        gpu_slots = orch_config.gpu_slots,
        cpu_slots = orch_config.cpu_slots,
        "Loaded orchestrator configuration"
    );

    // --- Storage ---
    let store = JobStore::new(Arc::new(MemoryMetaStore::new()));
    let blobs = Arc::new(FsBlobStore::new(orch_config.blob_root.clone()));

    // --- External capabilities ---
    let execution_timeout = Duration::from_secs(orch_config.execution_timeout_secs);
    let registry = build_registry(&orch_config, execution_timeout)
        .expect("Failed to build capability registry");
    tracing::info!("Capability registry built");

    let fetcher = Arc::new(
        HttpMediaFetcher::new(Duration::from_secs(orch_config.fetch_timeout_secs))
            .expect("Failed to build media fetcher"),
    );

    // --- Orchestrator ---
    let orchestrator = Orchestrator::new(
        store,
        blobs,
        Arc::new(registry),
        fetcher,
        ProgressChannel::default(),
        orch_config.engine_config(),
    );

    // --- Background workers ---
    let worker_shutdown = tokio_util::sync::CancellationToken::new();
    let scheduler_handle = tokio::spawn(
        Scheduler::new(orchestrator.clone()).run(worker_shutdown.clone()),
    );
    let reaper_handle = tokio::spawn(Reaper::new(orchestrator.clone()).run(worker_shutdown.clone()));
    tracing::info!("Scheduler and reaper started");

    // --- App state ---
    let state = AppState {
        orchestrator,
        config: Arc::new(config.clone()),
    };

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes())
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Request timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // CORS.
        .layer(cors)
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop claiming new jobs; in-flight runners finish or time out on
    // their own budgets.
    worker_shutdown.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(drain, scheduler_handle).await;
    let _ = tokio::time::timeout(drain, reaper_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wire the four job kinds to their external inference engines.
fn build_registry(
    config: &OrchestratorConfig,
    timeout: Duration,
) -> Result<CapabilityRegistry, Box<dyn std::error::Error>> {
    let voice: Arc<dyn Capability> = Arc::new(RemoteCapability::new(
        "voice-engine",
        POOL_GPU,
        &config.voice_engine_url,
        timeout,
    )?);
    let translate: Arc<dyn Capability> = Arc::new(RemoteCapability::new(
        "translate-engine",
        POOL_CPU,
        &config.translate_engine_url,
        timeout,
    )?);
    let diarize: Arc<dyn Capability> = Arc::new(RemoteCapability::new(
        "diarize-engine",
        POOL_GPU,
        &config.diarize_engine_url,
        timeout,
    )?);

    let registry = CapabilityRegistry::build([
        (JobKind::VoiceClone, voice),
        (JobKind::Translate, translate),
        // The diarization engine also serves speaker extraction.
        (JobKind::Diarize, Arc::clone(&diarize)),
        (JobKind::ExtractSpeakers, diarize),
    ])?;
    Ok(registry)
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid, which is the
/// desired behaviour -- we want misconfiguration to fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
