//! Pools of items that serve several leases at once.
//!
//! A `MultiStock` takes items from an underlying [`StockMap`] and hands out
//! up to `concurrency` leases per item.  When the last lease of an item is
//! returned, the item goes back to the underlying stock, which keeps it
//! idle or destroys it.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::{StockClass, StockError, StockItem, StockMap, StockOptions};

struct SharedItem<C: StockClass> {
    item: StockItem<C>,
    concurrency: usize,
    /// Changed only while holding the key's map entry.
    leases: AtomicUsize,
    /// Cleared by a lease returned without reuse; no new leases are handed
    /// out and the item is not returned for reuse.
    reusable: AtomicBool,
}

impl<C: StockClass> SharedItem<C> {
    fn has_capacity(&self) -> bool {
        self.reusable.load(Ordering::Relaxed)
            && self.leases.load(Ordering::Relaxed) < self.concurrency
    }
}

struct MultiInner<C: StockClass> {
    stocks: StockMap<C>,
    shared: DashMap<String, Vec<Arc<SharedItem<C>>>>,
}

pub struct MultiStock<C: StockClass> {
    inner: Arc<MultiInner<C>>,
}

impl<C: StockClass> Clone for MultiStock<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> MultiStock<C>
where
    C: StockClass,
    C::Item: Sync,
{
    pub fn new(class: Arc<C>, options: StockOptions) -> Self {
        Self {
            inner: Arc::new(MultiInner {
                stocks: StockMap::new(class, options),
                shared: DashMap::new(),
            }),
        }
    }

    /// Lease a share of an item for `key`.  An item with spare capacity is
    /// preferred; otherwise a new one is taken from the underlying stock
    /// and serves up to `concurrency` leases.
    pub async fn get(
        &self,
        key: &str,
        request: &C::Request,
        concurrency: usize,
    ) -> Result<MultiLease<C>, StockError> {
        if let Some(lease) = self.try_share(key) {
            return Ok(lease);
        }

        let item = self.inner.stocks.get(key, request).await?;
        let shared = Arc::new(SharedItem {
            item,
            concurrency: concurrency.max(1),
            leases: AtomicUsize::new(1),
            reusable: AtomicBool::new(true),
        });

        self.inner
            .shared
            .entry(key.to_string())
            .or_default()
            .push(shared.clone());

        Ok(MultiLease {
            multi: self.inner.clone(),
            key: key.to_string(),
            shared: Some(shared),
        })
    }

    fn try_share(&self, key: &str) -> Option<MultiLease<C>> {
        let entry = self.inner.shared.get_mut(key)?;
        let shared = entry.iter().find(|s| s.has_capacity())?.clone();
        shared.leases.fetch_add(1, Ordering::Relaxed);
        drop(entry);

        Some(MultiLease {
            multi: self.inner.clone(),
            key: key.to_string(),
            shared: Some(shared),
        })
    }

    /// Distinct underlying items currently leased for `key`.
    pub fn item_count(&self, key: &str) -> usize {
        self.inner.shared.get(key).map_or(0, |v| v.len())
    }

    pub fn stocks(&self) -> &StockMap<C> {
        &self.inner.stocks
    }
}

/// One share of a [`MultiStock`] item.
pub struct MultiLease<C: StockClass> {
    multi: Arc<MultiInner<C>>,
    key: String,
    shared: Option<Arc<SharedItem<C>>>,
}

impl<C: StockClass> MultiLease<C> {
    /// Return this share.  `reuse = false` retires the whole item once its
    /// other shares are returned.
    pub fn put(mut self, reuse: bool) {
        self.release(reuse);
    }

    fn release(&mut self, reuse: bool) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let last = {
            let Some(mut entry) = self.multi.shared.get_mut(&self.key) else {
                return;
            };
            if !reuse {
                shared.reusable.store(false, Ordering::Relaxed);
            }
            let remaining = shared.leases.fetch_sub(1, Ordering::Relaxed) - 1;
            if remaining > 0 {
                return;
            }
            entry.retain(|s| !Arc::ptr_eq(s, &shared));
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.multi.shared.remove_if(&self.key, |_, v| v.is_empty());
            }
            Arc::try_unwrap(shared).ok()
        };

        if let Some(shared) = last {
            let reusable = shared.reusable.load(Ordering::Relaxed);
            shared.item.put(reusable);
        }
    }
}

impl<C: StockClass> Deref for MultiLease<C> {
    type Target = C::Item;

    fn deref(&self) -> &Self::Target {
        let shared = self.shared.as_ref().expect("multi lease already returned");
        &shared.item
    }
}

impl<C: StockClass> Drop for MultiLease<C> {
    fn drop(&mut self) {
        self.release(true);
    }
}
