//! Keyed collection of stocks.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{Stock, StockClass, StockError, StockItem, StockOptions, StockStats};

/// One [`Stock`] per key, all sharing a class and options.
pub struct StockMap<C: StockClass> {
    class: Arc<C>,
    options: StockOptions,
    stocks: DashMap<String, Stock<C>>,
}

impl<C: StockClass> StockMap<C> {
    pub fn new(class: Arc<C>, options: StockOptions) -> Self {
        Self {
            class,
            options,
            stocks: DashMap::new(),
        }
    }

    pub fn class(&self) -> &Arc<C> {
        &self.class
    }

    pub fn options(&self) -> &StockOptions {
        &self.options
    }

    /// The stock for `key`, created on first use.
    pub fn stock(&self, key: &str) -> Stock<C> {
        if let Some(stock) = self.stocks.get(key) {
            return stock.clone();
        }
        self.stocks
            .entry(key.to_string())
            .or_insert_with(|| Stock::new(key, self.class.clone(), self.options.clone()))
            .clone()
    }

    pub async fn get(&self, key: &str, request: &C::Request) -> Result<StockItem<C>, StockError> {
        self.stock(key).get(request).await
    }

    pub fn fade_key(&self, key: &str) {
        if let Some(stock) = self.stocks.get(key).map(|s| s.clone()) {
            stock.fade_all();
        }
    }

    pub fn fade_all(&self) {
        let stocks: Vec<_> = self.stocks.iter().map(|s| s.value().clone()).collect();
        for stock in stocks {
            stock.fade_all();
        }
    }

    pub fn stats(&self) -> StockStats {
        let mut total = StockStats::default();
        for stock in self.stocks.iter() {
            total += stock.stats();
        }
        total
    }

    pub fn len(&self) -> usize {
        self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty()
    }

    /// Destroy idle items older than `max_idle_age` and forget stocks
    /// nobody uses any more.
    pub fn cleanup(&self, max_idle_age: Duration) {
        let stocks: Vec<_> = self.stocks.iter().map(|s| s.value().clone()).collect();
        let mut discarded = 0;
        for stock in stocks {
            discarded += stock.discard_idle_older_than(max_idle_age);
        }

        self.stocks.retain(|_, stock| !stock.is_abandoned());

        if discarded > 0 {
            tracing::debug!(discarded, stocks = self.stocks.len(), "Stock cleanup");
        }
    }

    /// Periodic cleanup until shutdown.
    pub async fn run_cleanup(
        self: Arc<Self>,
        interval: Duration,
        max_idle_age: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.cleanup(max_idle_age),
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::testing::TestClass;

    #[tokio::test]
    async fn test_keys_are_independent() {
        let class = Arc::new(TestClass::default());
        let map = StockMap::new(
            class.clone(),
            StockOptions {
                limit: 1,
                queue_when_full: false,
                ..Default::default()
            },
        );

        let _a = map.get("10.0.0.1:80", &()).await.unwrap();
        let _b = map.get("10.0.0.2:80", &()).await.unwrap();
        assert!(map.get("10.0.0.1:80", &()).await.is_err());

        assert_eq!(map.len(), 2);
        assert_eq!(map.stats().busy, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_forgets_unused_stocks() {
        let class = Arc::new(TestClass::default());
        let map = StockMap::new(class.clone(), StockOptions::default());

        map.get("a", &()).await.unwrap().put(true);
        let busy = map.get("b", &()).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        map.cleanup(Duration::from_secs(60));

        assert_eq!(class.destroyed(), 1);
        assert_eq!(map.len(), 1);
        drop(busy);
    }
}
