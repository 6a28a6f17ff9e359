//! Server configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Durations are whole milliseconds.
//!
//! ```json
//! {
//!   "bind_addr": "127.0.0.1:11000",
//!   "mode": "polling",
//!   "poll_timeout_ms": 20
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{
    DispatchConfig, DEFAULT_POLL_TIMEOUT, DEFAULT_RESYNC_IDLE, DEFAULT_RESYNC_LIMIT,
};
use crate::error::Result;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 11000;

/// Default pause between idle polls in [`DispatchMode::Polling`].
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// How connection tasks drive their dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Block on every id read.
    #[default]
    Blocking,
    /// Poll with a short timeout and run arriving requests as batches.
    Polling,
}

/// Settings for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub mode: DispatchMode,
    pub resync_idle_ms: u64,
    pub resync_limit_ms: u64,
    pub poll_timeout_ms: u64,
    pub idle_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            mode: DispatchMode::default(),
            resync_idle_ms: DEFAULT_RESYNC_IDLE.as_millis() as u64,
            resync_limit_ms: DEFAULT_RESYNC_LIMIT.as_millis() as u64,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Parse a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Dispatcher timings.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            resync_idle: Duration::from_millis(self.resync_idle_ms),
            resync_limit: Duration::from_millis(self.resync_limit_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
        }
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}
