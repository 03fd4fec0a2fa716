//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Passive (observed by the HTTP client and the balancer):
//!     connect failure   → FailureManager::set(addr, Connect, 20s)
//!     broken response   → FailureManager::set(addr, Response, 20s)
//!     good response     → FailureManager::unset(addr, Response)
//!
//! Active (monitor.rs, one runner per node):
//!     Periodic timer
//!     → MonitorClass::check (connect / expect / http)
//!     → Success | Fade | Timeout | Error
//!     → FailureManager updates
//!
//! Administrative (control):
//!     FADE_NODE → set(addr, Fade, 3h)
//!     ENABLE_NODE → unset(addr, Ok)
//! ```
//!
//! # Design Decisions
//! - One tracker instance, injected wherever it is needed
//! - Records expire lazily on read; no sweeper is required for correctness
//! - Monitor-down has no expiry and is cleared only by the monitor itself

pub mod connect;
pub mod expect;
pub mod failure;
pub mod http;
pub mod monitor;

pub use connect::ConnectMonitor;
pub use expect::ExpectMonitor;
pub use failure::{FailureManager, FailureStatus};
pub use http::HttpMonitor;
pub use monitor::{
    monitor_class, spawn_monitors, MonitorClass, MonitorError, MonitorOutcome, MonitorRunner,
    MonitorStatus,
};
