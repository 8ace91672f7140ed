//! Error types for the pgbridge proxy

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// PostgreSQL SQLSTATE error codes used by the proxy.
/// See: https://www.postgresql.org/docs/current/errcodes-appendix.html
pub mod sqlstate {
    /// Class 08 — Connection Exception
    pub const PROTOCOL_VIOLATION: &str = "08P01";

    /// Class 0A — Feature Not Supported
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";

    /// Class XX — Internal Error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// Main error type for the proxy.
///
/// The first three variants correspond to what the client can observe as an
/// `ErrorResponse`; `Io` on the client stream terminates the session without
/// any further writes, and `Config` only occurs during startup.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed frame, bad length, unknown message id, bad format-code vector
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Protocol feature or data type the proxy does not implement
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The downstream executor raised
    #[error("{0}")]
    Execution(String),

    /// Byte-stream failure on the client connection
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Startup misconfiguration (bad rewrite pattern, unreadable file, ...)
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The SQLSTATE reported in the `C` field of an `ErrorResponse`.
    ///
    /// Downstream error codes are not mapped; everything the executor raises
    /// is reported as an internal error.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            BridgeError::Protocol(_) => sqlstate::PROTOCOL_VIOLATION,
            BridgeError::Unsupported(_) => sqlstate::FEATURE_NOT_SUPPORTED,
            _ => sqlstate::INTERNAL_ERROR,
        }
    }

    /// True if the session must be torn down instead of reporting the error
    /// to the client.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Io(_))
    }

    /// Shorthand for a protocol violation.
    pub fn protocol(msg: impl Into<String>) -> Self {
        BridgeError::Protocol(msg.into())
    }

    /// Shorthand for an unsupported feature.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        BridgeError::Unsupported(msg.into())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

impl From<regex::Error> for BridgeError {
    fn from(err: regex::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}
