//! Typed process configuration, read from environment variables.
//!
//! `dotenvy` loads an optional `.env` in development; production
//! deployments set these in the process environment directly. No config
//! file format is invented.

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `DATABASE_URL`. When unset, the API runs against an in-memory
    /// store (dev/test mode).
    pub database_url: Option<String>,

    /// `FLOWLINE_API_BIND` — address the HTTP server listens on.
    pub bind_addr: String,

    /// `FLOWLINE_LOG_FORMAT` — `compact` (default) or `json`.
    pub log_format: LogFormat,

    /// `FLOWLINE_POOL_MAX` — the worker-pool capacity this server
    /// advertises through `GET /pool/status`, used by workers' adaptive
    /// concurrency probe.
    pub pool_max: i64,

    /// `FLOWLINE_DEFAULT_LEASE_SECONDS` — fallback lease duration when a
    /// worker's `lease_seconds` is zero or absent from the request body's
    /// validation (defensive; the DTO itself requires the field).
    pub default_lease_seconds: u32,

    /// `FLOWLINE_CATALOG_DIR` — directory of `*.yaml`/`*.yml` playbooks
    /// loaded into the in-memory catalog at startup. Dev-mode convenience
    /// only; the catalog's real resource store is out of scope (§1).
    pub catalog_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Compact,
            pool_max: 50,
            default_lease_seconds: 30,
            catalog_dir: None,
        }
    }
}

impl ApiConfig {
    /// Read configuration from the environment, falling back to defaults
    /// for anything unset. Never fails: malformed numeric env vars fall
    /// back to their default rather than aborting startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_addr: std::env::var("FLOWLINE_API_BIND").unwrap_or(defaults.bind_addr),
            log_format: match std::env::var("FLOWLINE_LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
            pool_max: std::env::var("FLOWLINE_POOL_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_max),
            default_lease_seconds: std::env::var("FLOWLINE_DEFAULT_LEASE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_lease_seconds),
            catalog_dir: std::env::var("FLOWLINE_CATALOG_DIR").ok(),
        }
    }
}
