//! Test doubles for stock tests.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::StockClass;

/// Counts creations and destructions; items can be killed from outside.
#[derive(Default)]
pub struct TestClass {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    /// `create` never completes.
    pub hang: bool,
    /// `create` fails.
    pub fail: bool,
}

pub struct TestItem {
    pub id: usize,
    pub alive: Arc<AtomicBool>,
}

impl TestClass {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl StockClass for TestClass {
    type Request = ();
    type Item = TestItem;

    fn create<'a>(&'a self, _key: &'a str, _request: &'a ()) -> BoxFuture<'a, io::Result<TestItem>> {
        Box::pin(async move {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestItem {
                id,
                alive: Arc::new(AtomicBool::new(true)),
            })
        })
    }

    fn borrow(&self, item: &mut TestItem) -> bool {
        item.alive.load(Ordering::SeqCst)
    }

    fn release(&self, item: &mut TestItem) -> bool {
        item.alive.load(Ordering::SeqCst)
    }

    fn destroy(&self, _item: TestItem) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}
