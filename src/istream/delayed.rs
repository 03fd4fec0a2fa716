//! Placeholder node whose input is supplied later.
//!
//! [`delayed`] returns the node and a [`DelayedControl`].  A consumer may
//! read the node right away; until the control supplies an input (or ends
//! the stream) reads produce nothing and park the consumer's waker.
//!
//! # Closing
//! Dropping the node before an input arrived runs the cancel callback
//! registered with [`DelayedControl::on_cancel`].  An input supplied after
//! the node is gone is closed immediately.  Dropping the control without
//! resolving it fails the stream.

use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Waker};

use super::{
    BoxIstream, BucketList, FdType, Istream, IstreamError, IstreamHandler, IstreamPointer,
};

type CancelFn = Box<dyn FnOnce() + Send>;

enum Pending {
    Waiting,
    Input(BoxIstream),
    Eof,
    Error(IstreamError),
    /// Handed over to the node, or discarded.
    Done,
}

struct DelayedState {
    pending: Pending,
    waker: Option<Waker>,
    cancel: Option<CancelFn>,
    closed: bool,
}

type Shared = Arc<Mutex<DelayedState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, DelayedState> {
    shared.lock().expect("delayed stream mutex poisoned")
}

/// Create a node and the handle that completes it.
pub fn delayed() -> (DelayedIstream, DelayedControl) {
    let shared = Arc::new(Mutex::new(DelayedState {
        pending: Pending::Waiting,
        waker: None,
        cancel: None,
        closed: false,
    }));

    (
        DelayedIstream {
            shared: shared.clone(),
            input: IstreamPointer::default(),
        },
        DelayedControl {
            shared,
            resolved: false,
        },
    )
}

pub struct DelayedIstream {
    shared: Shared,
    input: IstreamPointer,
}

impl DelayedIstream {
    /// Move a supplied input or terminal event out of the shared state.
    /// With `cx`, register its waker if nothing has arrived yet.
    fn poll_pending(&mut self, cx: Option<&Context<'_>>) -> Option<Result<(), IstreamError>> {
        if self.input.is_defined() {
            return None;
        }

        let mut state = lock(&self.shared);
        match std::mem::replace(&mut state.pending, Pending::Done) {
            Pending::Waiting => {
                state.pending = Pending::Waiting;
                if let Some(cx) = cx {
                    state.waker = Some(cx.waker().clone());
                }
                None
            }
            Pending::Input(input) => {
                self.input.set(input);
                None
            }
            Pending::Eof => Some(Ok(())),
            Pending::Error(e) => Some(Err(e)),
            Pending::Done => None,
        }
    }
}

impl Istream for DelayedIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        if self.input.is_defined() {
            return self.input.available(partial);
        }

        match &lock(&self.shared).pending {
            Pending::Input(input) => input.available(partial),
            Pending::Eof => Some(0),
            _ => None,
        }
    }

    fn skip(&mut self, length: u64) -> Option<u64> {
        self.input.skip(length)
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        match self.poll_pending(Some(&*cx)) {
            Some(Ok(())) => handler.on_eof(),
            Some(Err(e)) => handler.on_error(e),
            None => {
                self.input.read(cx, handler);
            }
        }
    }

    fn fill_bucket_list(&mut self, list: &mut BucketList) -> Result<(), IstreamError> {
        if let Some(terminal) = self.poll_pending(None) {
            // delivered by the following read
            lock(&self.shared).pending = match terminal {
                Ok(()) => Pending::Eof,
                Err(e) => Pending::Error(e),
            };
        }

        if !self.input.is_defined() {
            list.enable_fallback();
            return Ok(());
        }
        self.input.fill_bucket_list(list)
    }

    fn consume_bucket_list(&mut self, nbytes: usize) -> usize {
        self.input.consume_bucket_list(nbytes)
    }

    fn into_fd(mut self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        self.poll_pending(None);
        match self.input.into_fd() {
            Some(fd) => Ok(fd),
            None => Err(self),
        }
    }
}

impl Drop for DelayedIstream {
    fn drop(&mut self) {
        let (pending, cancel) = {
            let mut state = lock(&self.shared);
            state.closed = true;
            state.waker = None;
            let pending = std::mem::replace(&mut state.pending, Pending::Done);
            let cancel = match pending {
                Pending::Waiting => state.cancel.take(),
                _ => None,
            };
            (pending, cancel)
        };

        drop(pending);
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

/// Completes a [`DelayedIstream`].  Resolving consumes the control.
pub struct DelayedControl {
    shared: Shared,
    resolved: bool,
}

impl DelayedControl {
    /// Called if the node is closed before it was given an input.
    pub fn on_cancel(&self, cancel: impl FnOnce() + Send + 'static) {
        lock(&self.shared).cancel = Some(Box::new(cancel));
    }

    /// The node has been closed; whatever is supplied now is discarded.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    pub fn set(mut self, input: BoxIstream) {
        self.resolve(Pending::Input(input));
    }

    pub fn set_eof(mut self) {
        self.resolve(Pending::Eof);
    }

    pub fn set_error(mut self, error: IstreamError) {
        self.resolve(Pending::Error(error));
    }

    fn resolve(&mut self, pending: Pending) {
        self.resolved = true;

        let (discarded, waker) = {
            let mut state = lock(&self.shared);
            state.cancel = None;
            if state.closed {
                (Some(pending), None)
            } else {
                state.pending = pending;
                (None, state.waker.take())
            }
        };

        drop(discarded);
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl Drop for DelayedControl {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolve(Pending::Error(IstreamError::Aborted(
                "delayed stream was never given an input".into(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::testing::{drain, noop_context, Collector, CountingWaker};
    use crate::istream::MemoryIstream;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_delayed_waits_for_input() {
        let (node, control) = delayed();
        let mut pointer = IstreamPointer::new(Box::new(node));
        let (counter, waker) = CountingWaker::new();
        let mut cx = Context::from_waker(&waker);
        let mut collector = Collector::default();

        assert_eq!(pointer.available(false), None);
        assert!(!pointer.read(&mut cx, &mut collector));
        assert!(collector.data.is_empty());
        assert_eq!(counter.count(), 0);

        control.set(Box::new(MemoryIstream::new("foo")));
        assert_eq!(counter.count(), 1);
        assert_eq!(pointer.available(false), Some(3));

        drain(&mut pointer, &mut collector);
        assert_eq!(collector.data, b"foo");
        assert!(collector.eof);
    }

    #[test]
    fn test_delayed_input_set_before_first_read() {
        let (node, control) = delayed();
        control.set(Box::new(MemoryIstream::new("early")));

        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        drain(&mut pointer, &mut collector);
        assert_eq!(collector.data, b"early");
        assert!(collector.eof);
    }

    #[test]
    fn test_delayed_eof_and_error() {
        let (node, control) = delayed();
        control.set_eof();
        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        assert!(pointer.read(&mut noop_context(), &mut collector));
        assert!(collector.eof);
        assert!(collector.data.is_empty());

        let (node, control) = delayed();
        control.set_error(IstreamError::Upstream("backend failed".into()));
        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        assert!(pointer.read(&mut noop_context(), &mut collector));
        assert!(matches!(collector.error, Some(IstreamError::Upstream(_))));
    }

    #[test]
    fn test_delayed_close_before_input_cancels() {
        let (node, control) = delayed();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        control.on_cancel(move || flag.store(true, Ordering::SeqCst));

        drop(node);
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(control.is_closed());

        // too late: discarded
        control.set(Box::new(MemoryIstream::new("unused")));
    }

    #[test]
    fn test_delayed_no_cancel_after_input() {
        let (node, control) = delayed();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        control.on_cancel(move || flag.store(true, Ordering::SeqCst));

        control.set(Box::new(MemoryIstream::new("x")));
        drop(node);
        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_delayed_wakes_parked_consumer() {
        let (node, control) = delayed();
        let task = tokio::spawn(crate::istream::sink_buffer(Box::new(node), 1024));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        control.set(Box::new(MemoryIstream::new("later")));
        assert_eq!(&task.await.unwrap().unwrap()[..], b"later");
    }

    #[test]
    fn test_delayed_abandoned_control_fails_stream() {
        let (node, control) = delayed();
        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        let mut cx = noop_context();

        assert!(!pointer.read(&mut cx, &mut collector));
        drop(control);
        assert!(pointer.read(&mut cx, &mut collector));
        assert!(matches!(collector.error, Some(IstreamError::Aborted(_))));
    }
}
