//! Bucket lists: pending stream data exposed as shared buffers.

use std::io::IoSlice;

use bytes::Bytes;

/// Buffers a node exposes without going through the push protocol.
///
/// `more` means data beyond the listed buffers will follow; `fallback`
/// means the node cannot expose its data this way and the caller must use
/// `read` instead.
#[derive(Debug, Default)]
pub struct BucketList {
    buffers: Vec<Bytes>,
    more: bool,
    fallback: bool,
}

impl BucketList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, buffer: Bytes) {
        if !buffer.is_empty() {
            self.buffers.push(buffer);
        }
    }

    pub fn set_more(&mut self) {
        self.more = true;
    }

    pub fn has_more(&self) -> bool {
        self.more
    }

    pub fn enable_fallback(&mut self) {
        self.more = true;
        self.fallback = true;
    }

    pub fn should_fallback(&self) -> bool {
        self.fallback
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[Bytes] {
        &self.buffers
    }

    pub fn total_buffer_size(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    /// Slices for a vectored write.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.buffers.iter().map(|b| IoSlice::new(b)).collect()
    }

    /// Move all buffers of `other` to the end of this list and inherit its
    /// flags.  Returns the number of bytes moved.
    pub fn splice_buffers_from(&mut self, other: BucketList) -> usize {
        let size = other.total_buffer_size();
        self.buffers.extend(other.buffers);
        self.more |= other.more;
        self.fallback |= other.fallback;
        size
    }
}
