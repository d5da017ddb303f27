//! Typed worker process configuration, read from environment variables.

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `FLOWLINE_SERVER_URL` — base URL of the `flowline-api` process.
    pub server_url: String,

    /// `FLOWLINE_WORKER_ID` — identity attached to every lease/heartbeat
    /// call. Defaults to `worker-<hostname>-<pid>`.
    pub worker_id: String,

    /// `FLOWLINE_WORKER_CONCURRENCY` — number of lease/execute loops run
    /// concurrently by this process.
    pub concurrency: usize,

    /// `FLOWLINE_LEASE_SECONDS` — requested lease duration per job.
    pub lease_seconds: u32,

    /// `FLOWLINE_HEARTBEAT_INTERVAL_SECONDS` — how often an in-flight job
    /// is heartbeated back to the server.
    pub heartbeat_interval_seconds: u64,

    /// `FLOWLINE_POLL_IDLE_MS` — sleep between lease attempts when the
    /// queue is empty, to avoid a busy-loop against the server.
    pub poll_idle_ms: u64,

    /// Adaptive concurrency gate defaults (§4.10).
    pub gate: GateConfig,

    /// `FLOWLINE_WORKER_POOL_NAME` — the executor pool this process
    /// belongs to, stamped onto every event's `metadata` (§4.10 step 5).
    /// Defaults to `worker-<runtime>`.
    pub pool_name: String,

    /// `FLOWLINE_WORKER_POOL_RUNTIME` — the runtime kind this pool
    /// executes on, e.g. `cpu`, `gpu`.
    pub runtime: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub initial_limit: f64,
    pub min_limit: f64,
    pub max_limit: f64,
    pub probe_interval_seconds: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            initial_limit: 2.0,
            min_limit: 1.0,
            max_limit: 8.0,
            probe_interval_seconds: 8.0,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let runtime = "cpu".to_string();
        let pool_name = format!("worker-{runtime}");
        Self {
            server_url: "http://localhost:8080".to_string(),
            worker_id: default_worker_id(),
            concurrency: 4,
            lease_seconds: 30,
            heartbeat_interval_seconds: 10,
            poll_idle_ms: 500,
            gate: GateConfig::default(),
            pool_name,
            runtime,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_url: std::env::var("FLOWLINE_SERVER_URL").unwrap_or(defaults.server_url),
            worker_id: std::env::var("FLOWLINE_WORKER_ID").unwrap_or(defaults.worker_id),
            concurrency: std::env::var("FLOWLINE_WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.concurrency),
            lease_seconds: std::env::var("FLOWLINE_LEASE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.lease_seconds),
            heartbeat_interval_seconds: std::env::var("FLOWLINE_HEARTBEAT_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.heartbeat_interval_seconds),
            poll_idle_ms: std::env::var("FLOWLINE_POLL_IDLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_idle_ms),
            gate: GateConfig::default(),
            runtime: std::env::var("FLOWLINE_WORKER_POOL_RUNTIME").unwrap_or(defaults.runtime),
            pool_name: std::env::var("FLOWLINE_WORKER_POOL_NAME").unwrap_or(defaults.pool_name),
        }
    }
}

fn default_worker_id() -> String {
    let host = hostname();
    format!("worker-{host}-{}", std::process::id())
}

/// Current host's name, used both for the default worker id and the
/// `hostname` field stamped onto every event's `metadata`.
pub fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string())
}
