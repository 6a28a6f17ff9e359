//! Error types for hostwire.
//!
//! Only stream-level and setup failures live here. Failures raised by host
//! operations are `anyhow::Error`s and never leave the operation boundary:
//! they are written back to the client as an error sentinel instead.

use thiserror::Error;

/// Main error type for all hostwire operations.
#[derive(Debug, Error)]
pub enum HostwireError {
    /// I/O error on the connection or listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (config files and capability manifests).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer closed the stream in the middle of a value.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Bytes on the wire do not form a valid value.
    #[error("Malformed data: {0}")]
    Malformed(String),

    /// A handle does not name an entry of its table.
    #[error("Handle {handle} out of range for '{kind}' table of size {len}")]
    HandleOutOfRange {
        kind: String,
        handle: i32,
        len: usize,
    },

    /// A handle kind that no table was ever created for.
    #[error("Unknown handle kind: {0}")]
    UnknownKind(String),

    /// A value did not have the wire type its codec expected.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The capability surface is invalid (duplicate or reserved names).
    #[error("Capability error: {0}")]
    Capability(String),

    /// The host executor stopped accepting jobs.
    #[error("Host executor is gone")]
    ExecutorGone,
}

impl HostwireError {
    /// Whether this error means the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            HostwireError::ConnectionClosed => true,
            HostwireError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type alias using HostwireError.
pub type Result<T> = std::result::Result<T, HostwireError>;
