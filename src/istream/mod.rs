//! Lazy, consumer-driven byte streams.
//!
//! # Data Flow
//! ```text
//! consumer (sink_buffer, IstreamBody, sink_socket, tee output)
//!     → IstreamPointer::read(cx, handler)
//!     → node produces synchronously: on_data / on_direct (zero or more)
//!                                    on_eof / on_error (at most once)
//!     → nothing produced? node registered cx.waker() with its source
//!       (socket readiness, retry timer, tee sibling) and the consumer
//!       returns Pending until woken
//! ```
//!
//! Nodes compose into chains by owning their input through an
//! [`IstreamPointer`] and implementing [`IstreamHandler`] on a short-lived
//! feeder that wraps the downstream handler for the duration of a read:
//!
//! ```text
//! SocketIstream → DechunkIstream → tee ─┬─ first output  → client body
//!                                       └─ second output → cache store
//! ```
//!
//! # Design Decisions
//! - The handler is lent to `read`, never stored, so a node cannot call
//!   back into a consumer outside of a read and no node is ever re-entered
//! - Close is `Drop`; a node that delivered eof or error is dropped by its
//!   owning pointer right after the read returns
//! - A handler returning fewer bytes than offered ends the read; the node
//!   keeps the remainder and offers it again on the next read
//! - Consumers yield to the scheduler after a bounded number of read rounds

pub mod block;
pub mod bucket;
pub mod dechunk;
pub mod delayed;
pub mod file;
pub mod hold;
pub mod memory;
pub mod pointer;
pub mod sink;
pub mod socket;
pub mod stream;
pub mod tee;

#[cfg(test)]
pub(crate) mod testing;

use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::task::Context;

use bitflags::bitflags;

pub use block::{BlockIstream, FailIstream, ZeroIstream};
pub use bucket::BucketList;
pub use dechunk::DechunkIstream;
pub use delayed::{delayed, DelayedControl, DelayedIstream};
pub use file::FileIstream;
pub use hold::HoldIstream;
pub use memory::MemoryIstream;
pub use pointer::IstreamPointer;
pub use sink::{sink_buffer, SinkError};
pub use socket::sink_socket;
pub use stream::{IstreamBody, StreamIstream};
pub use tee::{tee, TeeOutput};

/// Owned, type-erased stream node.
pub type BoxIstream = Box<dyn Istream>;

/// Kind of file descriptor offered through [`IstreamHandler::on_direct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdType {
    /// Regular file; supports positional reads.
    File,
    Pipe,
    /// Local (unix) socket.
    Socket,
    Tcp,
    CharDev,
}

bitflags! {
    /// Set of [`FdType`]s a handler accepts for zero-copy transfer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FdTypeMask: u8 {
        const FILE = 0b0000_0001;
        const PIPE = 0b0000_0010;
        const SOCKET = 0b0000_0100;
        const TCP = 0b0000_1000;
        const CHARDEV = 0b0001_0000;
    }
}

impl FdType {
    pub fn mask(self) -> FdTypeMask {
        match self {
            FdType::File => FdTypeMask::FILE,
            FdType::Pipe => FdTypeMask::PIPE,
            FdType::Socket => FdTypeMask::SOCKET,
            FdType::Tcp => FdTypeMask::TCP,
            FdType::CharDev => FdTypeMask::CHARDEV,
        }
    }
}

impl FdTypeMask {
    /// Any socket-like descriptor.
    pub const ANY_SOCKET: FdTypeMask = FdTypeMask::SOCKET.union(FdTypeMask::TCP);

    pub fn accepts(self, fd_type: FdType) -> bool {
        self.contains(fd_type.mask())
    }
}

/// Outcome of a zero-copy transfer attempt.
#[derive(Debug)]
pub enum DirectResult {
    /// This many bytes were moved out of the descriptor.
    Transferred(usize),
    /// The handler cannot accept data right now and will read again
    /// once it can.
    Blocking,
    /// The source descriptor had no data ready (`EAGAIN` on the input side).
    WouldBlock,
    /// The source descriptor is at end of file.
    Eof,
    /// The handler has been closed while handling the call.
    Closed,
    Err(io::Error),
}

/// Terminal error delivered through [`IstreamHandler::on_error`].
///
/// Cloneable so a fan-out node can deliver the same failure to both of
/// its outputs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IstreamError {
    #[error("{context}: {error}")]
    Io {
        context: String,
        error: Arc<io::Error>,
    },

    #[error("premature end of stream: {0}")]
    PrematureEof(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl IstreamError {
    pub fn io(context: impl Into<String>, error: io::Error) -> Self {
        IstreamError::Io {
            context: context.into(),
            error: Arc::new(error),
        }
    }
}

/// Receives the output of a stream node during [`Istream::read`].
pub trait IstreamHandler {
    /// Offer `data`; returns the number of bytes accepted.  Zero means the
    /// handler is blocking.
    fn on_data(&mut self, data: &[u8]) -> usize;

    /// Descriptor types this handler accepts in [`Self::on_direct`].
    fn direct_mask(&self) -> FdTypeMask {
        FdTypeMask::empty()
    }

    /// Offer up to `max_length` bytes straight from `fd`.  `offset` is the
    /// read position for positional sources (regular files); `None` means
    /// the descriptor's current position.
    fn on_direct(
        &mut self,
        fd_type: FdType,
        fd: BorrowedFd<'_>,
        offset: Option<u64>,
        max_length: usize,
    ) -> DirectResult {
        let _ = (fd_type, fd, offset, max_length);
        DirectResult::Blocking
    }

    fn on_eof(&mut self);

    fn on_error(&mut self, error: IstreamError);
}

/// A stream node producing bytes for exactly one consumer.
pub trait Istream: Send {
    /// Number of bytes still to come.  With `partial`, a lower bound that
    /// is available without blocking; without it, the exact total or
    /// `None` if unknown.
    fn available(&self, partial: bool) -> Option<u64>;

    /// Discard up to `length` bytes without delivering them.  `None` if the
    /// node cannot skip.
    fn skip(&mut self, length: u64) -> Option<u64> {
        let _ = length;
        None
    }

    /// Try to produce data now.
    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler);

    /// Append pending data to `list` without consuming it.  The default
    /// asks the caller to fall back to [`Self::read`].
    fn fill_bucket_list(&mut self, list: &mut BucketList) -> Result<(), IstreamError> {
        list.enable_fallback();
        Ok(())
    }

    /// Consume `nbytes` previously exposed through
    /// [`Self::fill_bucket_list`]; returns how many were consumed.
    fn consume_bucket_list(&mut self, nbytes: usize) -> usize {
        let _ = nbytes;
        0
    }

    /// Surrender the underlying descriptor if this node is a plain
    /// passthrough of it.
    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream>;
}
