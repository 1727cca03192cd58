use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use voxflow_core::chunking::ChunkPolicy;
use voxflow_core::job::{POOL_CPU, POOL_GPU};
use voxflow_core::retry::RetryPolicy;
use voxflow_engine::{EngineConfig, PoolConfig};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port: env_parse("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", 30),
        }
    }
}

/// Orchestrator configuration loaded from environment variables: pool
/// sizes, chunking thresholds, retry budget, timeouts, and the endpoints
/// of the external inference engines.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root directory for blob storage (default: `./data/blobs`).
    pub blob_root: PathBuf,
    /// Concurrent slots in the GPU pool (default: `2`).
    pub gpu_slots: usize,
    /// Concurrent slots in the CPU pool (default: `4`).
    pub cpu_slots: usize,
    /// Inputs above this many bytes are split (default: 100 MiB).
    pub chunk_threshold: u64,
    /// Chunk window size in bytes (default: 100 MiB).
    pub chunk_window: u64,
    /// Window overlap in bytes for overlap-eligible kinds (default: 2 MiB).
    pub chunk_overlap: u64,
    /// Retry budget per job (default: `3`).
    pub max_retries: u32,
    /// Scheduler poll interval in milliseconds (default: `1000`).
    pub poll_interval_ms: u64,
    /// Bound on one capability invocation in seconds (default: `600`).
    pub execution_timeout_secs: u64,
    /// Liveness window in seconds before the reaper force-fails a job
    /// (default: 2 hours).
    pub liveness_window_secs: u64,
    /// Timeout for fetching a remote source URL (default: `60`).
    pub fetch_timeout_secs: u64,
    /// Base URL of the voice synthesis engine.
    pub voice_engine_url: String,
    /// Base URL of the translation engine.
    pub translate_engine_url: String,
    /// Base URL of the diarization engine (also serves speaker extraction).
    pub diarize_engine_url: String,
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        const MB: u64 = 1024 * 1024;
        Self {
            blob_root: std::env::var("BLOB_ROOT")
                .unwrap_or_else(|_| "./data/blobs".into())
                .into(),
            gpu_slots: env_parse("GPU_SLOTS", 2),
            cpu_slots: env_parse("CPU_SLOTS", 4),
            chunk_threshold: env_parse("CHUNK_THRESHOLD_BYTES", 100 * MB),
            chunk_window: env_parse("CHUNK_WINDOW_BYTES", 100 * MB),
            chunk_overlap: env_parse("CHUNK_OVERLAP_BYTES", 2 * MB),
            max_retries: env_parse("MAX_RETRIES", 3),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", 1000),
            execution_timeout_secs: env_parse("EXECUTION_TIMEOUT_SECS", 600),
            liveness_window_secs: env_parse("LIVENESS_WINDOW_SECS", 2 * 3600),
            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS", 60),
            voice_engine_url: std::env::var("VOICE_ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:9801".into()),
            translate_engine_url: std::env::var("TRANSLATE_ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:9802".into()),
            diarize_engine_url: std::env::var("DIARIZE_ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:9803".into()),
        }
    }

    /// Build the engine tunables from this configuration.
    ///
    /// Panics on a chunk geometry the planner cannot work with, so a bad
    /// environment fails at startup rather than inside a runner task.
    pub fn engine_config(&self) -> EngineConfig {
        if self.chunk_window == 0 {
            panic!("CHUNK_WINDOW_BYTES must be positive");
        }
        if self.chunk_overlap >= self.chunk_window {
            panic!(
                "CHUNK_OVERLAP_BYTES ({}) must be smaller than CHUNK_WINDOW_BYTES ({})",
                self.chunk_overlap, self.chunk_window
            );
        }
        EngineConfig {
            chunk_policy: ChunkPolicy::new(self.chunk_threshold, self.chunk_window, self.chunk_overlap),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
            pools: vec![
                PoolConfig {
                    name: POOL_GPU.to_string(),
                    max_concurrency: self.gpu_slots,
                },
                PoolConfig {
                    name: POOL_CPU.to_string(),
                    max_concurrency: self.cpu_slots,
                },
            ],
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            execution_timeout: Duration::from_secs(self.execution_timeout_secs),
            liveness_window: Duration::from_secs(self.liveness_window_secs),
            ..Default::default()
        }
    }
}

/// Parse `key` from the environment, falling back to `default`.
///
/// Panics on a malformed value -- misconfiguration should fail at startup.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} is invalid: {e}")),
        Err(_) => default,
    }
}
