//! Trivial nodes: endless zeros, a stream that never moves, a stream that
//! fails right away.

use std::os::fd::OwnedFd;
use std::task::Context;

use super::{BoxIstream, FdType, Istream, IstreamError, IstreamHandler};

static ZEROES: [u8; 1024] = [0; 1024];

/// Produces zero bytes forever.
#[derive(Debug, Default)]
pub struct ZeroIstream;

impl Istream for ZeroIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        partial.then_some(i64::MAX as u64)
    }

    fn skip(&mut self, length: u64) -> Option<u64> {
        Some(length)
    }

    fn read(&mut self, _cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        handler.on_data(&ZEROES);
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

/// Never produces anything and never ends.  Only closing it releases the
/// consumer.
#[derive(Debug, Default)]
pub struct BlockIstream;

impl Istream for BlockIstream {
    fn available(&self, _partial: bool) -> Option<u64> {
        None
    }

    fn read(&mut self, _cx: &mut Context<'_>, _handler: &mut dyn IstreamHandler) {}

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

/// Reports `error` on the first read.
#[derive(Debug)]
pub struct FailIstream {
    error: Option<IstreamError>,
}

impl FailIstream {
    pub fn new(error: IstreamError) -> Self {
        Self { error: Some(error) }
    }
}

impl Istream for FailIstream {
    fn available(&self, _partial: bool) -> Option<u64> {
        None
    }

    fn read(&mut self, _cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        if let Some(error) = self.error.take() {
            handler.on_error(error);
        }
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::testing::{noop_context, Collector};
    use crate::istream::IstreamPointer;

    #[test]
    fn test_zero_fills_handler() {
        let mut cx = noop_context();
        let mut collector = Collector::with_limit(100);
        ZeroIstream.read(&mut cx, &mut collector);
        assert_eq!(collector.data, vec![0u8; 100]);
        assert!(!collector.is_done());
    }

    #[test]
    fn test_block_never_terminates() {
        let mut cx = noop_context();
        let mut pointer = IstreamPointer::new(Box::new(BlockIstream));
        let mut collector = Collector::default();
        for _ in 0..3 {
            assert!(!pointer.read(&mut cx, &mut collector));
        }
        assert!(collector.data.is_empty());
        assert!(pointer.is_defined());
    }

    #[test]
    fn test_fail_reports_error_once() {
        let mut cx = noop_context();
        let mut pointer = IstreamPointer::new(Box::new(FailIstream::new(
            IstreamError::Aborted("test".into()),
        )));
        let mut collector = Collector::default();
        assert!(pointer.read(&mut cx, &mut collector));
        assert!(matches!(collector.error, Some(IstreamError::Aborted(_))));
        assert!(!pointer.is_defined());
    }
}
