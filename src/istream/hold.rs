//! Facade that keeps an input's end until a consumer reads.
//!
//! [`HoldIstream::prefetch`] drives the input before anything consumes
//! the stream.  Data stays in the input; an end of stream or error that
//! arrives is held and replayed on the first read.

use std::os::fd::OwnedFd;
use std::task::Context;

use super::{
    BoxIstream, BucketList, FdType, Istream, IstreamError, IstreamHandler, IstreamPointer,
};

pub struct HoldIstream {
    input: IstreamPointer,
    held: Option<Result<(), IstreamError>>,
}

/// Accepts no data, records a terminal event.
struct Holder<'a> {
    held: &'a mut Option<Result<(), IstreamError>>,
}

impl IstreamHandler for Holder<'_> {
    fn on_data(&mut self, _data: &[u8]) -> usize {
        0
    }

    fn on_eof(&mut self) {
        *self.held = Some(Ok(()));
    }

    fn on_error(&mut self, error: IstreamError) {
        *self.held = Some(Err(error));
    }
}

impl HoldIstream {
    pub fn new(input: BoxIstream) -> Self {
        Self {
            input: IstreamPointer::new(input),
            held: None,
        }
    }

    /// Let the input start without a consumer.  Returns `false` once the
    /// input has failed.
    pub fn prefetch(&mut self, cx: &mut Context<'_>) -> bool {
        if self.held.is_none() {
            let mut holder = Holder {
                held: &mut self.held,
            };
            self.input.read(cx, &mut holder);
        }
        !self.has_failed()
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.held, Some(Err(_)))
    }
}

impl Istream for HoldIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        match self.held {
            Some(Ok(())) => Some(0),
            Some(Err(_)) => None,
            None => self.input.available(partial),
        }
    }

    fn skip(&mut self, length: u64) -> Option<u64> {
        if self.held.is_some() {
            return None;
        }
        self.input.skip(length)
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        match self.held.take() {
            Some(Ok(())) => handler.on_eof(),
            Some(Err(e)) => handler.on_error(e),
            None => {
                self.input.read(cx, handler);
            }
        }
    }

    fn fill_bucket_list(&mut self, list: &mut BucketList) -> Result<(), IstreamError> {
        if self.held.is_some() {
            list.enable_fallback();
            return Ok(());
        }
        self.input.fill_bucket_list(list)
    }

    fn consume_bucket_list(&mut self, nbytes: usize) -> usize {
        self.input.consume_bucket_list(nbytes)
    }

    fn into_fd(mut self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        if self.held.is_some() {
            return Err(self);
        }
        match self.input.into_fd() {
            Some(fd) => Ok(fd),
            None => Err(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::testing::{drain, noop_context, Collector};
    use crate::istream::{FailIstream, MemoryIstream};

    #[test]
    fn test_hold_keeps_data_for_reader() {
        let mut node = HoldIstream::new(Box::new(MemoryIstream::new("foo")));
        assert!(node.prefetch(&mut noop_context()));
        assert_eq!(node.available(false), Some(3));

        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        drain(&mut pointer, &mut collector);
        assert_eq!(collector.data, b"foo");
        assert!(collector.eof);
    }

    #[test]
    fn test_hold_replays_early_eof() {
        let mut node = HoldIstream::new(Box::new(MemoryIstream::new("")));
        assert!(node.prefetch(&mut noop_context()));
        assert_eq!(node.available(false), Some(0));

        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        assert!(pointer.read(&mut noop_context(), &mut collector));
        assert!(collector.eof);
    }

    #[test]
    fn test_hold_replays_early_error_once() {
        let mut node = HoldIstream::new(Box::new(FailIstream::new(IstreamError::Upstream(
            "refused".into(),
        ))));
        assert!(!node.prefetch(&mut noop_context()));
        assert!(node.has_failed());
        // held: the input is not read again
        assert!(!node.prefetch(&mut noop_context()));
        assert_eq!(node.available(true), None);

        let mut pointer = IstreamPointer::new(Box::new(node));
        let mut collector = Collector::default();
        assert!(pointer.read(&mut noop_context(), &mut collector));
        assert!(matches!(collector.error, Some(IstreamError::Upstream(_))));
    }
}
