//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → router.rs (route lookup, priority order)
//!     → matcher.rs (evaluate match conditions)
//!     → RouteMatch { address: cluster | local file, cache tag, sticky value }
//!       or NoMatch
//!
//! Route Compilation (at startup):
//!     ClusterConfig[] → AddressList per cluster
//!     RouteConfig[]
//!     → Compile matchers
//!     → Sort by priority
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)
//! - Local paths never leave the route's root directory

pub mod matcher;
pub mod router;

pub use router::{build_clusters, Clusters, RouteError, RouteMatch, Router, RouterError};
