//! Application gateway library: streaming body engine, HTTP cache,
//! connection pools, balancing and failure tracking.

// Streaming
pub mod istream;

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod resource;
pub mod routing;

// Traffic management
pub mod cache;
pub mod health;
pub mod load_balancer;
pub mod stock;

// Cross-cutting concerns
pub mod control;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
