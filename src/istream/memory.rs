//! Stream node replaying an in-memory buffer.

use std::os::fd::OwnedFd;
use std::task::Context;

use bytes::{Buf, Bytes};

use super::{BoxIstream, BucketList, FdType, Istream, IstreamError, IstreamHandler};

/// Replays a shared, immutable buffer.  Cache hits are served through
/// this node; cloning `Bytes` never copies the cached body.
pub struct MemoryIstream {
    data: Bytes,
}

impl MemoryIstream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl Istream for MemoryIstream {
    fn available(&self, _partial: bool) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn skip(&mut self, length: u64) -> Option<u64> {
        let n = usize::try_from(length).unwrap_or(usize::MAX).min(self.data.len());
        self.data.advance(n);
        Some(n as u64)
    }

    fn read(&mut self, _cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        if !self.data.is_empty() {
            let n = handler.on_data(&self.data);
            self.data.advance(n);
            if !self.data.is_empty() {
                return;
            }
        }

        handler.on_eof();
    }

    fn fill_bucket_list(&mut self, list: &mut BucketList) -> Result<(), IstreamError> {
        list.push(self.data.clone());
        Ok(())
    }

    fn consume_bucket_list(&mut self, nbytes: usize) -> usize {
        let n = nbytes.min(self.data.len());
        self.data.advance(n);
        n
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::testing::{drain, noop_context, Collector};
    use crate::istream::IstreamPointer;

    #[test]
    fn test_memory_partial_consumption() {
        let mut cx = noop_context();
        let mut node = MemoryIstream::new("hello world");
        let mut collector = Collector::with_limit(5);

        node.read(&mut cx, &mut collector);
        assert_eq!(collector.data, b"hello");
        assert!(!collector.eof);
        assert_eq!(node.available(false), Some(6));
    }

    #[test]
    fn test_memory_empty_is_eof() {
        let mut pointer = IstreamPointer::new(Box::new(MemoryIstream::new(Bytes::new())));
        let mut collector = Collector::default();
        drain(&mut pointer, &mut collector);
        assert!(collector.eof);
        assert!(collector.data.is_empty());
    }

    #[test]
    fn test_memory_skip_and_buckets() {
        let mut node = MemoryIstream::new("0123456789");
        assert_eq!(node.skip(3), Some(3));

        let mut list = BucketList::new();
        node.fill_bucket_list(&mut list).unwrap();
        assert!(!list.has_more());
        assert_eq!(list.buffers()[0].as_ref(), b"3456789");

        assert_eq!(node.consume_bucket_list(4), 4);
        assert_eq!(node.available(false), Some(3));
        assert_eq!(node.skip(100), Some(3));
    }
}
