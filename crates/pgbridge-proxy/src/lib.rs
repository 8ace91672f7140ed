//! pgbridge proxy library
//!
//! A man-in-the-middle forward proxy that speaks the PostgreSQL wire
//! protocol to clients and re-expresses each interaction against a managed
//! SQL service with a different client API. The binary in `main.rs` wires
//! the CLI to [`pg_wire::ProxyServer`]; everything else is library code so
//! the protocol engine can be driven end-to-end in tests.

pub mod executor;
pub mod pg_wire;
pub mod telemetry;
pub mod value;
