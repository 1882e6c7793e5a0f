//! Server configuration types.
//!
//! Every field has a default so that an empty (or missing) config file yields a
//! working local setup. Loading and environment overrides live in the binary.

use crate::error::{NervError, NervResult};
use serde::{Deserialize, Serialize};

/// Addresses that are always allowed to open an agent connection.
pub const LOOPBACK_IPS: [&str; 2] = ["::1", "127.0.0.1"];

/// Default keepalive probe interval (seconds).
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Default job timeout (milliseconds).
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 10_000;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Root configuration for the nerv server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NervConfig {
    /// Tracing filter directive (e.g. `info`, `nerv_wire=debug`).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// HTTP listener and static content.
    pub server: ServerConfig,
    /// Agent connection policy.
    pub ws: WsConfig,
    /// Job dispatch defaults.
    pub jobs: JobsConfig,
}

impl Default for NervConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            server: ServerConfig::default(),
            ws: WsConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl NervConfig {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> NervResult<()> {
        if self.ws.keepalive_interval_secs == 0 {
            return Err(NervError::Config(
                "ws.keepalive_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub listen_addr: String,
    /// Directory served at `/`.
    pub static_dir: String,
    /// Directory served at `/lua`.
    pub lua_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            static_dir: "public".to_string(),
            lua_dir: "lua".to_string(),
        }
    }
}

/// Agent connection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Source IPs permitted to open an agent connection.
    pub allowed_ips: Vec<String>,
    /// Computer labels accepted during the handshake (exact, case-sensitive).
    pub known_labels: Vec<String>,
    /// Keepalive probe interval (seconds).
    pub keepalive_interval_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            allowed_ips: LOOPBACK_IPS.iter().map(|s| s.to_string()).collect(),
            known_labels: Vec::new(),
            keepalive_interval_secs: DEFAULT_KEEPALIVE_INTERVAL_SECS,
        }
    }
}

/// Job dispatch defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Timeout applied to jobs issued by the HTTP API (milliseconds).
    pub default_timeout_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
        }
    }
}
