//! PostgreSQL wire protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION_3: i32 = 3 << 16; // 0x00030000

/// SSLRequest magic number
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103

/// GSSENCRequest magic number
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104

/// CancelRequest magic number
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678; // 80877102

/// Ceiling on any framed message. A length beyond this is a fatal protocol
/// error rather than an allocation.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Ceiling on the startup packet, which carries only short key/value pairs.
pub const MAX_STARTUP_SIZE: usize = 10_000;
