//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! configured address
//!     → listener.rs (parse, bind, log)
//!     → tls.rs (optional rustls config for the front listener)
//!     → Hand off to HTTP layer
//! ```
//!
//! Connection limits are enforced one level up, by the concurrency
//! layer of the front server.

pub mod listener;
pub mod tls;

pub use listener::{bind, ListenerError};
pub use tls::load_tls_config;
