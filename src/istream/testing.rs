//! Helpers shared by the stream unit tests.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Waker};

use bytes::{Buf, Bytes};
use futures_util::task::{noop_waker_ref, waker, ArcWake};

use super::{BoxIstream, FdType, Istream, IstreamError, IstreamHandler, IstreamPointer};

pub fn noop_context() -> Context<'static> {
    Context::from_waker(noop_waker_ref())
}

/// Waker that counts how often it was woken.
#[derive(Default)]
pub struct CountingWaker {
    pub count: AtomicUsize,
}

impl ArcWake for CountingWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.count.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingWaker {
    pub fn new() -> (Arc<Self>, Waker) {
        let counter = Arc::new(Self::default());
        let waker = waker(counter.clone());
        (counter, waker)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Records everything a node delivers.  `chunk_limit` caps how much a
/// single `on_data` call accepts.
#[derive(Default)]
pub struct Collector {
    pub data: Vec<u8>,
    pub eof: bool,
    pub error: Option<IstreamError>,
    pub chunk_limit: Option<usize>,
    pub calls: usize,
}

impl Collector {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            chunk_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.eof || self.error.is_some()
    }
}

impl IstreamHandler for Collector {
    fn on_data(&mut self, data: &[u8]) -> usize {
        self.calls += 1;
        let n = self.chunk_limit.map_or(data.len(), |l| l.min(data.len()));
        self.data.extend_from_slice(&data[..n]);
        n
    }

    fn on_eof(&mut self) {
        assert!(!self.is_done(), "second terminal event");
        self.eof = true;
    }

    fn on_error(&mut self, error: IstreamError) {
        assert!(!self.is_done(), "second terminal event");
        self.error = Some(error);
    }
}

/// Read `pointer` until it terminates or stops making progress.
pub fn drain(pointer: &mut IstreamPointer, collector: &mut Collector) {
    let mut cx = noop_context();
    for _ in 0..100_000 {
        let before = collector.data.len();
        if pointer.read(&mut cx, collector) || collector.data.len() == before {
            return;
        }
    }
    panic!("stream did not settle");
}

/// Delivers its buffer one byte per read.
pub struct ByteIstream {
    data: Bytes,
}

impl ByteIstream {
    pub fn new(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }
}

impl Istream for ByteIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        partial.then_some(self.data.len().min(1) as u64)
    }

    fn read(&mut self, _cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        if self.data.is_empty() {
            handler.on_eof();
            return;
        }
        let n = handler.on_data(&self.data[..1]);
        self.data.advance(n);
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}
