//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, catch-all handler)
//!     → request.rs (request ID, build ResourceRequest, streamed body)
//!     → [routing picks a cluster or a local root]
//!     → [resource loaders: cache, then file or client.rs]
//!     → response.rs (istream body → axum Body, error statuses)
//!     → Send to client
//! ```
//!
//! `client.rs` is the upstream half: HTTP/1.1 over pooled, balanced
//! TCP connections.

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::{ClientError, HttpClient};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::HttpServer;
