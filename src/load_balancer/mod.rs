//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → cluster identified → AddressList
//!     → round_robin.rs Balancer::pick
//!         - sticky value?  hash → node, skip nodes that are not check_sticky
//!         - otherwise      rotate, skip nodes that are not check
//!     → tcp.rs TcpBalancer::connect
//!         - lease a pooled connection for the node (stock)
//!         - connect failed? mark Connect, pick again (bounded retries)
//!     → BalancedConnection
//! ```
//!
//! # Design Decisions
//! - Selection state is the cursor in the address list; health lives in
//!   the failure tracker
//! - When every node is failed, traffic still goes somewhere
//! - Connection pooling per node via the TCP stock

pub mod round_robin;
pub mod tcp;

pub use round_robin::{sticky_hash, AddressList, Balancer};
pub use tcp::{BalancedConnection, BalancerError, TcpBalancer};
