//! Bounded pool of items for one key.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{StockClass, StockError};
use crate::config::StockConfig;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct StockOptions {
    /// Idle + busy + creating items; 0 is unlimited.
    pub limit: usize,
    /// Idle items retained after release.
    pub max_idle: usize,
    /// How long `get` waits at the limit.
    pub wait_timeout: Duration,
    /// Wait at the limit instead of failing.
    pub queue_when_full: bool,
}

impl Default for StockOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            max_idle: 8,
            wait_timeout: Duration::from_secs(10),
            queue_when_full: true,
        }
    }
}

impl From<&StockConfig> for StockOptions {
    fn from(config: &StockConfig) -> Self {
        Self {
            limit: config.limit,
            max_idle: config.max_idle,
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            queue_when_full: config.queue_when_full,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StockStats {
    pub idle: usize,
    pub busy: usize,
    pub creating: usize,
}

impl StockStats {
    pub fn total(&self) -> usize {
        self.idle + self.busy + self.creating
    }
}

impl std::ops::AddAssign for StockStats {
    fn add_assign(&mut self, other: Self) {
        self.idle += other.idle;
        self.busy += other.busy;
        self.creating += other.creating;
    }
}

struct IdleItem<I> {
    item: I,
    since: Instant,
}

struct StockState<I> {
    idle: VecDeque<IdleItem<I>>,
    busy: usize,
    creating: usize,
    generation: u64,
}

impl<I> StockState<I> {
    fn stats(&self) -> StockStats {
        StockStats {
            idle: self.idle.len(),
            busy: self.busy,
            creating: self.creating,
        }
    }
}

pub(crate) struct StockInner<C: StockClass> {
    key: String,
    class: Arc<C>,
    options: StockOptions,
    state: Mutex<StockState<C::Item>>,
    /// Signalled whenever capacity may have become available.
    released: Notify,
}

impl<C: StockClass> StockInner<C> {
    fn lock(&self) -> MutexGuard<'_, StockState<C::Item>> {
        self.state.lock().expect("stock mutex poisoned")
    }

    fn put(&self, mut item: C::Item, generation: u64, reuse: bool) {
        let reuse = reuse && self.class.release(&mut item);

        let discard = {
            let mut state = self.lock();
            state.busy -= 1;
            metrics::set_stock_busy(&self.key, state.busy);

            if reuse && generation == state.generation && state.idle.len() < self.options.max_idle
            {
                state.idle.push_back(IdleItem {
                    item,
                    since: Instant::now(),
                });
                None
            } else {
                Some(item)
            }
        };

        if let Some(item) = discard {
            self.class.destroy(item);
        }
        self.released.notify_waiters();
    }
}

/// Decrements the in-flight creation count when the creation finishes or
/// the `get` future is dropped.
struct CreateGuard<'a, C: StockClass> {
    inner: &'a StockInner<C>,
}

impl<C: StockClass> Drop for CreateGuard<'_, C> {
    fn drop(&mut self) {
        self.inner.lock().creating -= 1;
        self.inner.released.notify_waiters();
    }
}

enum Acquire<I> {
    Reuse(I, u64),
    Create(u64),
    Full,
}

pub struct Stock<C: StockClass> {
    inner: Arc<StockInner<C>>,
}

impl<C: StockClass> Clone for Stock<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: StockClass> Stock<C> {
    pub fn new(key: impl Into<String>, class: Arc<C>, options: StockOptions) -> Self {
        Self {
            inner: Arc::new(StockInner {
                key: key.into(),
                class,
                options,
                state: Mutex::new(StockState {
                    idle: VecDeque::new(),
                    busy: 0,
                    creating: 0,
                    generation: 0,
                }),
                released: Notify::new(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn stats(&self) -> StockStats {
        self.inner.lock().stats()
    }

    /// No handle other than this one exists and nothing is pooled.
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.inner) == 1 && self.stats().total() == 0
    }

    /// Lease an item, reusing an idle one if the class accepts it.
    pub async fn get(&self, request: &C::Request) -> Result<StockItem<C>, StockError> {
        let inner = &self.inner;
        let deadline = Instant::now() + inner.options.wait_timeout;

        loop {
            let released = inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let mut rejected = Vec::new();
            let action = {
                let mut state = inner.lock();

                let mut reused = None;
                while let Some(idle) = state.idle.pop_back() {
                    let mut item = idle.item;
                    if inner.class.borrow(&mut item) {
                        reused = Some(item);
                        break;
                    }
                    rejected.push(item);
                }

                let limit = inner.options.limit;
                match reused {
                    Some(item) => {
                        state.busy += 1;
                        metrics::set_stock_busy(&inner.key, state.busy);
                        Acquire::Reuse(item, state.generation)
                    }
                    None if limit == 0 || state.stats().total() < limit => {
                        state.creating += 1;
                        Acquire::Create(state.generation)
                    }
                    None => Acquire::Full,
                }
            };

            for item in rejected {
                tracing::debug!(key = %inner.key, "Discarding unusable idle item");
                inner.class.destroy(item);
            }

            match action {
                Acquire::Reuse(item, generation) => {
                    return Ok(StockItem::new(inner.clone(), item, generation, true));
                }
                Acquire::Create(generation) => return self.create(request, generation).await,
                Acquire::Full if !inner.options.queue_when_full => {
                    return Err(StockError::LimitReached {
                        key: inner.key.clone(),
                    });
                }
                Acquire::Full => {
                    tracing::debug!(key = %inner.key, limit = inner.options.limit, "Stock full, waiting");
                    if tokio::time::timeout_at(deadline, released).await.is_err() {
                        return Err(StockError::Timeout {
                            key: inner.key.clone(),
                        });
                    }
                }
            }
        }
    }

    async fn create(
        &self,
        request: &C::Request,
        generation: u64,
    ) -> Result<StockItem<C>, StockError> {
        let inner = &self.inner;
        let _creating = CreateGuard { inner };

        let item = inner
            .class
            .create(&inner.key, request)
            .await
            .map_err(|source| {
                tracing::debug!(key = %inner.key, error = %source, "Stock item creation failed");
                StockError::Create {
                    key: inner.key.clone(),
                    source,
                }
            })?;

        let mut state = inner.lock();
        state.busy += 1;
        metrics::set_stock_busy(&inner.key, state.busy);
        drop(state);

        Ok(StockItem::new(inner.clone(), item, generation, false))
    }

    /// Destroy all idle items and make busy ones non-reusable.
    pub fn fade_all(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.idle.drain(..).collect()
        };

        tracing::debug!(key = %self.inner.key, idle = idle.len(), "Fading stock");
        for idle in idle {
            self.inner.class.destroy(idle.item);
        }
        self.inner.released.notify_waiters();
    }

    /// Destroy idle items unused for at least `max_age`.  Returns how many.
    pub fn discard_idle_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: VecDeque<_> = {
            let mut state = self.inner.lock();
            let (keep, expired): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|idle| now.duration_since(idle.since) < max_age);
            state.idle = keep;
            expired
        };

        let count = expired.len();
        for idle in expired {
            self.inner.class.destroy(idle.item);
        }
        if count > 0 {
            self.inner.released.notify_waiters();
        }
        count
    }
}

/// Exclusive lease of a pooled item.  Return it with [`StockItem::put`];
/// dropping it destroys the item.
pub struct StockItem<C: StockClass> {
    stock: Arc<StockInner<C>>,
    item: Option<C::Item>,
    generation: u64,
    reused: bool,
}

impl<C: StockClass> StockItem<C> {
    fn new(stock: Arc<StockInner<C>>, item: C::Item, generation: u64, reused: bool) -> Self {
        Self {
            stock,
            item: Some(item),
            generation,
            reused,
        }
    }

    pub fn key(&self) -> &str {
        &self.stock.key
    }

    /// Taken from the idle list rather than freshly created.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Give the item back: to the idle list if `reuse` and the class
    /// agrees, otherwise it is destroyed.
    pub fn put(mut self, reuse: bool) {
        if let Some(item) = self.item.take() {
            self.stock.put(item, self.generation, reuse);
        }
    }
}

impl<C: StockClass> Deref for StockItem<C> {
    type Target = C::Item;

    fn deref(&self) -> &Self::Target {
        self.item.as_ref().expect("stock item already returned")
    }
}

impl<C: StockClass> DerefMut for StockItem<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.item.as_mut().expect("stock item already returned")
    }
}

impl<C: StockClass> Drop for StockItem<C> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.stock.put(item, self.generation, false);
        }
    }
}
