//! Owning handle for an input stream.

use std::os::fd::{BorrowedFd, OwnedFd};
use std::task::Context;

use super::{
    BoxIstream, BucketList, DirectResult, FdType, FdTypeMask, IstreamError, IstreamHandler,
};

/// Holds a node and drops it as soon as it reported eof or error.
///
/// Every stage that consumes another stage's output keeps it in one of
/// these, so "is the input still there" is a plain `is_defined()` check.
#[derive(Default)]
pub struct IstreamPointer {
    stream: Option<BoxIstream>,
}

impl IstreamPointer {
    pub fn new(stream: BoxIstream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.stream.is_some()
    }

    pub fn set(&mut self, stream: BoxIstream) {
        self.stream = Some(stream);
    }

    /// Detach the node without closing it.
    pub fn take(&mut self) -> Option<BoxIstream> {
        self.stream.take()
    }

    /// Close (drop) the node, if any.
    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn available(&self, partial: bool) -> Option<u64> {
        self.stream.as_ref().and_then(|s| s.available(partial))
    }

    pub fn skip(&mut self, length: u64) -> Option<u64> {
        self.stream.as_mut().and_then(|s| s.skip(length))
    }

    /// Read from the node.  Returns `true` if the node delivered a terminal
    /// event and has been dropped.
    pub fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut guard = TerminalGuard {
            inner: handler,
            terminated: false,
        };
        stream.read(cx, &mut guard);

        if guard.terminated {
            self.stream = None;
        }
        guard.terminated
    }

    /// An error from the node is terminal; the node is dropped.
    pub fn fill_bucket_list(&mut self, list: &mut BucketList) -> Result<(), IstreamError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let result = stream.fill_bucket_list(list);
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    pub fn consume_bucket_list(&mut self, nbytes: usize) -> usize {
        self.stream
            .as_mut()
            .map_or(0, |s| s.consume_bucket_list(nbytes))
    }

    /// Surrender the node's descriptor.  On refusal the node stays in place.
    pub fn into_fd(&mut self) -> Option<(FdType, OwnedFd)> {
        let stream = self.stream.take()?;
        match stream.into_fd() {
            Ok(fd) => Some(fd),
            Err(stream) => {
                self.stream = Some(stream);
                None
            }
        }
    }
}

/// Records whether the wrapped handler saw a terminal event and swallows
/// anything a misbehaving node delivers after it.
struct TerminalGuard<'a> {
    inner: &'a mut dyn IstreamHandler,
    terminated: bool,
}

impl IstreamHandler for TerminalGuard<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        debug_assert!(!self.terminated, "data after terminal event");
        if self.terminated {
            return 0;
        }
        self.inner.on_data(data)
    }

    fn direct_mask(&self) -> FdTypeMask {
        self.inner.direct_mask()
    }

    fn on_direct(
        &mut self,
        fd_type: FdType,
        fd: BorrowedFd<'_>,
        offset: Option<u64>,
        max_length: usize,
    ) -> DirectResult {
        if self.terminated {
            return DirectResult::Closed;
        }
        self.inner.on_direct(fd_type, fd, offset, max_length)
    }

    fn on_eof(&mut self) {
        if !std::mem::replace(&mut self.terminated, true) {
            self.inner.on_eof();
        }
    }

    fn on_error(&mut self, error: IstreamError) {
        if !std::mem::replace(&mut self.terminated, true) {
            self.inner.on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::testing::{noop_context, Collector};
    use crate::istream::MemoryIstream;

    #[test]
    fn test_pointer_drops_node_after_eof() {
        let mut cx = noop_context();
        let mut pointer = IstreamPointer::new(Box::new(MemoryIstream::new("abc")));
        let mut collector = Collector::default();

        assert!(pointer.read(&mut cx, &mut collector));
        assert!(!pointer.is_defined());
        assert_eq!(collector.data, b"abc");
        assert!(collector.eof);

        // reading an empty pointer is a no-op
        assert!(!pointer.read(&mut cx, &mut collector));
    }

    #[test]
    fn test_pointer_keeps_node_while_blocked() {
        let mut cx = noop_context();
        let mut pointer = IstreamPointer::new(Box::new(MemoryIstream::new("abcdef")));
        let mut collector = Collector::with_limit(2);

        assert!(!pointer.read(&mut cx, &mut collector));
        assert!(pointer.is_defined());
        assert_eq!(pointer.available(false), Some(4));
    }
}
