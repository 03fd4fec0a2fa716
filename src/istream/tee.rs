//! Fan-out node: one input, two independently consumed outputs.
//!
//! # Data Flow
//! ```text
//!                       ┌────────────▶ first output  (sees data first)
//! input ── TeeShared ───┤
//!                       └────────────▶ second output (only what the first
//!                                                     already accepted)
//! ```
//!
//! The input advances only by what the second output accepts while both are
//! open.  `skip` counts the bytes at the front of the input's pending data
//! that the first output has already seen, which bounds what the second may
//! receive.  Each output reads under the shared lock and wakes its sibling
//! whenever the sibling may have become able to make progress.
//!
//! # Closing
//! Dropping an output only sets its `closed` flag; the close is processed
//! under the lock, either right away (`try_lock`) or by whichever output
//! holds the lock when it releases it.  Closing one output when the other
//! is weak aborts the weak one; closing the last output closes the input.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Waker};

use super::{
    BoxIstream, BucketList, FdType, Istream, IstreamError, IstreamHandler, IstreamPointer,
};

const FIRST: usize = 0;
const SECOND: usize = 1;

/// Split `input` into two outputs.  A weak output is aborted when the other
/// output is closed; it does not keep the input alive on its own.
pub fn tee(input: BoxIstream, first_weak: bool, second_weak: bool) -> (TeeOutput, TeeOutput) {
    let shared = Arc::new(TeeShared {
        inner: Mutex::new(TeeInner {
            input: IstreamPointer::new(input),
            state: TeeState {
                skip: 0,
                bucket_list_size: 0,
                outputs: [OutputState::new(first_weak), OutputState::new(second_weak)],
            },
        }),
        closed: [AtomicBool::new(false), AtomicBool::new(false)],
        handled: [AtomicBool::new(false), AtomicBool::new(false)],
    });

    (
        TeeOutput {
            shared: shared.clone(),
            index: FIRST,
        },
        TeeOutput {
            shared,
            index: SECOND,
        },
    )
}

struct TeeShared {
    inner: Mutex<TeeInner>,
    /// Set by `Drop` without taking the lock.
    closed: [AtomicBool; 2],
    /// Set once a close has been processed under the lock.
    handled: [AtomicBool; 2],
}

struct TeeInner {
    input: IstreamPointer,
    state: TeeState,
}

struct TeeState {
    /// Bytes the first output has seen that the second has not accepted.
    skip: usize,
    /// Bytes the first output's last bucket list took from the input.
    bucket_list_size: usize,
    outputs: [OutputState; 2],
}

enum Terminal {
    Eof,
    Error(IstreamError),
}

struct OutputState {
    enabled: bool,
    weak: bool,
    waker: Option<Waker>,
    /// Terminal event waiting for this output's next read.
    postponed: Option<Terminal>,
}

impl OutputState {
    fn new(weak: bool) -> Self {
        Self {
            enabled: true,
            weak,
            waker: None,
            postponed: None,
        }
    }
}

impl TeeState {
    fn wake(&mut self, index: usize) {
        if let Some(waker) = self.outputs[index].waker.take() {
            waker.wake();
        }
    }

    fn postpone(&mut self, index: usize, terminal: Terminal) {
        if self.outputs[index].enabled && self.outputs[index].postponed.is_none() {
            self.outputs[index].postponed = Some(terminal);
            self.wake(index);
        }
    }
}

impl TeeShared {
    fn lock(&self) -> MutexGuard<'_, TeeInner> {
        self.inner.lock().expect("tee mutex poisoned")
    }

    fn has_unhandled_close(&self) -> bool {
        (0..2).any(|i| {
            self.closed[i].load(Ordering::SeqCst) && !self.handled[i].load(Ordering::SeqCst)
        })
    }

    /// Process pending closes if the lock is free.  If it is not, the
    /// holder does it after releasing the lock.
    fn settle(&self) {
        while self.has_unhandled_close() {
            let Ok(mut inner) = self.inner.try_lock() else {
                return;
            };
            inner.process_closed(self);
        }
    }
}

impl TeeInner {
    fn process_closed(&mut self, shared: &TeeShared) {
        for index in 0..2 {
            if shared.closed[index].load(Ordering::SeqCst)
                && !shared.handled[index].swap(true, Ordering::SeqCst)
            {
                self.close_output(index);
            }
        }
    }

    fn close_output(&mut self, index: usize) {
        let output = &mut self.state.outputs[index];
        output.postponed = None;
        output.waker = None;
        if !std::mem::replace(&mut output.enabled, false) {
            return;
        }

        let other = 1 - index;
        if self.input.is_defined() {
            if !self.state.outputs[other].enabled {
                self.input.close();
            } else if self.state.outputs[other].weak {
                self.input.close();
                let message = if other == SECOND {
                    "closing the weak second output"
                } else {
                    "closing the weak first output"
                };
                self.state
                    .postpone(other, Terminal::Error(IstreamError::Aborted(message.into())));
            }
        }

        // the sibling may now proceed on its own
        self.state.wake(other);
    }
}

/// One side of a [`tee`].
pub struct TeeOutput {
    shared: Arc<TeeShared>,
    index: usize,
}

impl TeeOutput {
    pub fn is_first(&self) -> bool {
        self.index == FIRST
    }
}

impl Istream for TeeOutput {
    fn available(&self, partial: bool) -> Option<u64> {
        let inner = self.shared.lock();
        match inner.state.outputs[self.index].postponed {
            Some(Terminal::Eof) => return Some(0),
            Some(Terminal::Error(_)) => return None,
            None => {}
        }

        let available = inner.input.available(partial);
        if self.index == FIRST {
            available.map(|a| a.saturating_sub(inner.state.skip as u64))
        } else {
            available
        }
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        {
            let mut inner = self.shared.lock();
            inner.process_closed(&self.shared);

            let TeeInner { input, state } = &mut *inner;
            let output = &mut state.outputs[self.index];

            if let Some(terminal) = output.postponed.take() {
                output.enabled = false;
                output.waker = None;
                match terminal {
                    Terminal::Eof => handler.on_eof(),
                    Terminal::Error(e) => handler.on_error(e),
                }
            } else if !output.enabled {
                // nothing left to deliver
            } else if !input.is_defined() {
                output.enabled = false;
                handler.on_error(IstreamError::Aborted("tee input is gone".into()));
            } else {
                match &output.waker {
                    Some(w) if w.will_wake(cx.waker()) => {}
                    _ => output.waker = Some(cx.waker().clone()),
                }

                let mut feeder = Feeder {
                    state,
                    index: self.index,
                    handler,
                };
                input.read(cx, &mut feeder);
            }

            inner.process_closed(&self.shared);
        }

        self.shared.settle();
    }

    fn fill_bucket_list(&mut self, list: &mut BucketList) -> Result<(), IstreamError> {
        if self.index != FIRST {
            list.enable_fallback();
            return Ok(());
        }

        let mut inner = self.shared.lock();
        inner.process_closed(&self.shared);

        let TeeInner { input, state } = &mut *inner;
        if state.skip > 0 || !state.outputs[FIRST].enabled || state.outputs[FIRST].postponed.is_some() {
            // data already seen must not be offered again; use read()
            list.set_more();
            state.bucket_list_size = 0;
            return Ok(());
        }

        let mut sub = BucketList::new();
        if let Err(e) = input.fill_bucket_list(&mut sub) {
            state.outputs[FIRST].enabled = false;
            state.postpone(SECOND, Terminal::Error(e.clone()));
            return Err(e);
        }

        state.bucket_list_size = list.splice_buffers_from(sub);
        Ok(())
    }

    fn consume_bucket_list(&mut self, nbytes: usize) -> usize {
        if self.index != FIRST {
            return 0;
        }

        let mut inner = self.shared.lock();
        let state = &mut inner.state;

        // The input must keep this data for the second output, so it is
        // not consumed there; it only counts as seen by the first output.
        let consumed = nbytes.min(state.bucket_list_size);
        state.bucket_list_size -= consumed;
        state.skip += consumed;
        if consumed > 0 {
            state.wake(SECOND);
        }
        consumed
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

impl Drop for TeeOutput {
    fn drop(&mut self) {
        self.shared.closed[self.index].store(true, Ordering::SeqCst);
        self.shared.settle();
    }
}

/// Input handler for one output's read.
struct Feeder<'a> {
    state: &'a mut TeeState,
    index: usize,
    handler: &'a mut dyn IstreamHandler,
}

impl Feeder<'_> {
    fn feed_first(&mut self, data: &[u8]) -> usize {
        let state = &mut *self.state;

        if !state.outputs[SECOND].enabled {
            // alone: the part seen earlier is consumed now
            if data.len() <= state.skip {
                state.skip -= data.len();
                return data.len();
            }
            let nbytes = self.handler.on_data(&data[state.skip..]);
            let consumed = std::mem::take(&mut state.skip) + nbytes;
            return consumed;
        }

        if data.len() > state.skip {
            let nbytes = self.handler.on_data(&data[state.skip..]);
            state.skip += nbytes;
        }

        // the input only advances on the second output's consumption
        if state.skip > 0 {
            state.wake(SECOND);
        }
        0
    }

    fn feed_second(&mut self, data: &[u8]) -> usize {
        let state = &mut *self.state;

        if !state.outputs[FIRST].enabled {
            return self.handler.on_data(data);
        }

        let length = data.len().min(state.skip);
        if length == 0 {
            // wait for the first output to see more
            state.wake(FIRST);
            return 0;
        }

        let nbytes = self.handler.on_data(&data[..length]);
        state.skip -= nbytes;
        if nbytes > 0 {
            state.wake(FIRST);
        }
        nbytes
    }
}

impl IstreamHandler for Feeder<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        if self.index == FIRST {
            self.feed_first(data)
        } else {
            self.feed_second(data)
        }
    }

    fn on_eof(&mut self) {
        self.state.outputs[self.index].enabled = false;
        self.state.outputs[self.index].waker = None;
        self.handler.on_eof();
        self.state.postpone(1 - self.index, Terminal::Eof);
    }

    fn on_error(&mut self, error: IstreamError) {
        self.state.outputs[self.index].enabled = false;
        self.state.outputs[self.index].waker = None;
        self.handler.on_error(error.clone());
        self.state.postpone(1 - self.index, Terminal::Error(error));
    }
}
