//! Generic pools of reusable backend resources.
//!
//! # Data Flow
//! ```text
//! StockMap::get(key, request)
//!     → Stock for key (created on first use)
//!     → idle item? StockClass::borrow → still usable → lease it
//!                                     → not usable → destroy, try next
//!     → under limit? StockClass::create → lease it
//!     → at limit? wait for a put (bounded by wait_timeout) or fail
//!
//! StockItem (lease)
//!     → put(true)  → StockClass::release → idle (up to max_idle)
//!     → put(false) → destroy
//!     → dropped    → destroy
//! ```
//!
//! # Design Decisions
//! - A lease is an owned value; dropping a pending `get` future or an
//!   unreturned lease releases every reservation it held
//! - The per-key bound counts idle + busy + in-flight creations
//! - `fade_all` bumps a generation counter; leases from an older
//!   generation are destroyed when they come back
//! - `MultiStock` shares one pooled item between several leases

pub mod child;
pub mod multi;
pub mod pool;
pub mod tcp;

mod map;

#[cfg(test)]
pub(crate) mod testing;

use std::io;

use futures_util::future::BoxFuture;

pub use child::{ChildProcess, ChildRequest, ChildStockClass};
pub use map::StockMap;
pub use multi::{MultiLease, MultiStock};
pub use pool::{Stock, StockItem, StockOptions, StockStats};
pub use tcp::TcpStockClass;

/// A kind of pooled resource.
pub trait StockClass: Send + Sync + 'static {
    /// Parameters needed to create an item (address, spawn options).
    type Request: Send + Sync;

    type Item: Send + 'static;

    fn create<'a>(
        &'a self,
        key: &'a str,
        request: &'a Self::Request,
    ) -> BoxFuture<'a, io::Result<Self::Item>>;

    /// Is this idle item still usable?
    fn borrow(&self, item: &mut Self::Item) -> bool {
        let _ = item;
        true
    }

    /// May this item go back to the idle list?
    fn release(&self, item: &mut Self::Item) -> bool {
        let _ = item;
        true
    }

    fn destroy(&self, item: Self::Item) {
        drop(item);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("failed to create item for {key}: {source}")]
    Create {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("stock limit reached for {key}")]
    LimitReached { key: String },

    #[error("timed out waiting for an item for {key}")]
    Timeout { key: String },
}

impl StockError {
    pub fn is_timeout(&self) -> bool {
        match self {
            StockError::Timeout { .. } => true,
            StockError::Create { source, .. } => source.kind() == io::ErrorKind::TimedOut,
            StockError::LimitReached { .. } => false,
        }
    }
}
