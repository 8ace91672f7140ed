//! PostgreSQL wire protocol front end
//!
//! Terminates PostgreSQL 3.0 frontend/backend sessions and re-expresses
//! every statement against the downstream executor.
//!
//! ## Module structure
//!
//! - `protocol` - framing, message catalogs, and constants
//! - `rewrite` / `psql` - the regex rewrite pipeline and psql-mode rules
//! - `statement` - prepared statements, portals, parameter handling
//! - `cache` - per-session statement and portal tables
//! - `encoder` - format-code resolution and row encoding
//! - `session` - the per-connection state machine
//! - `server` - listener, session registry, shutdown

pub mod cache;
pub mod encoder;
pub mod protocol;
pub mod psql;
pub mod rewrite;
pub mod server;
pub mod session;
pub mod statement;

pub use server::ProxyServer;
pub use session::Session;
