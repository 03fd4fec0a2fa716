//! Stream node reading a regular file.
//!
//! # Responsibilities
//! - Positional reads into an internal buffer, or zero-copy handoff of the
//!   descriptor to handlers that accept [`FdType::File`]
//! - Timer-based retry when a direct transfer reports `EAGAIN` on the file
//!   side; some network filesystems report readiness they do not have, so
//!   polling the descriptor is useless
//! - `skip` that moves the read offset instead of reading and discarding

use std::fs::File;
use std::future::Future;
use std::io::{self, Seek, SeekFrom};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::Context;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::time::Sleep;

use super::{BoxIstream, DirectResult, FdType, Istream, IstreamError, IstreamHandler};

const BUFFER_SIZE: usize = 16 * 1024;

/// Largest chunk offered in one direct transfer.
const MAX_DIRECT: u64 = 1 << 30;

pub const RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct FileIstream {
    file: File,
    path: PathBuf,
    /// Read position for the next positional read.
    offset: u64,
    /// Bytes left in the requested range; `None` reads until end of file.
    rest: Option<u64>,
    buffer: BytesMut,
    retry: Option<Pin<Box<Sleep>>>,
}

impl FileIstream {
    /// Stream `file` from `offset` to `end` (exclusive) or to end of file.
    pub fn new(file: File, path: impl Into<PathBuf>, offset: u64, end: Option<u64>) -> Self {
        Self {
            file,
            path: path.into(),
            offset,
            rest: end.map(|e| e.saturating_sub(offset)),
            buffer: BytesMut::new(),
            retry: None,
        }
    }

    /// Open `path` and stream all of it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self::new(file, path, 0, Some(size)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, error: io::Error) -> IstreamError {
        IstreamError::io(format!("failed to read from {}", self.path.display()), error)
    }

    fn premature_eof(&self) -> IstreamError {
        IstreamError::PrematureEof(format!("file too short: {}", self.path.display()))
    }

    fn consumed(&mut self, n: u64) {
        self.offset += n;
        if let Some(rest) = self.rest.as_mut() {
            *rest -= n.min(*rest);
        }
    }

    fn eof_reached(&self, handler: &mut dyn IstreamHandler) {
        match self.rest {
            Some(rest) if rest > 0 => handler.on_error(self.premature_eof()),
            _ => handler.on_eof(),
        }
    }

    /// Deliver buffered data.  Returns `false` if the handler did not take
    /// all of it.
    fn submit_buffer(&mut self, handler: &mut dyn IstreamHandler) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        let n = handler.on_data(&self.buffer);
        self.buffer.advance(n);
        self.buffer.is_empty()
    }

    fn fill_buffer(&mut self) -> io::Result<usize> {
        let want = match self.rest {
            Some(rest) => rest.min(BUFFER_SIZE as u64) as usize,
            None => BUFFER_SIZE,
        };
        if want == 0 {
            return Ok(0);
        }

        let start = self.buffer.len();
        self.buffer.resize(start + want, 0);
        match self.file.read_at(&mut self.buffer[start..], self.offset) {
            Ok(n) => {
                self.buffer.truncate(start + n);
                self.consumed(n as u64);
                Ok(n)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    fn read_buffered(&mut self, handler: &mut dyn IstreamHandler) {
        match self.fill_buffer() {
            Ok(0) => self.eof_reached(handler),
            Ok(_) => {
                if self.submit_buffer(handler) && self.rest == Some(0) {
                    handler.on_eof();
                }
            }
            Err(e) => handler.on_error(self.io_error(e)),
        }
    }

    fn read_direct(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        let max = self.rest.unwrap_or(MAX_DIRECT).min(MAX_DIRECT) as usize;
        let result = handler.on_direct(FdType::File, self.file.as_fd(), Some(self.offset), max);

        match result {
            DirectResult::Transferred(n) => {
                self.consumed(n as u64);
                if self.rest == Some(0) {
                    handler.on_eof();
                }
            }
            DirectResult::Eof => self.eof_reached(handler),
            DirectResult::WouldBlock => {
                let mut sleep = Box::pin(tokio::time::sleep(RETRY_DELAY));
                // registers cx's waker with the timer
                if sleep.as_mut().poll(cx).is_ready() {
                    cx.waker().wake_by_ref();
                } else {
                    self.retry = Some(sleep);
                }
            }
            DirectResult::Blocking | DirectResult::Closed => {}
            DirectResult::Err(e) => handler.on_error(self.io_error(e)),
        }
    }
}

impl Istream for FileIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        let buffered = self.buffer.len() as u64;
        match self.rest {
            Some(rest) => Some(rest + buffered),
            None if partial => Some(buffered),
            None => None,
        }
    }

    fn skip(&mut self, length: u64) -> Option<u64> {
        let buffered = self.buffer.len() as u64;
        if length <= buffered {
            self.buffer.advance(length as usize);
            return Some(length);
        }

        // bytes at and after the read offset
        let left = match self.rest {
            Some(rest) => rest,
            None => match self.file.metadata() {
                Ok(metadata) => metadata.len().saturating_sub(self.offset),
                Err(_) => 0,
            },
        };

        self.buffer.clear();
        let remaining = (length - buffered).min(left);
        self.consumed(remaining);
        Some(buffered + remaining)
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        // an explicit read supersedes a pending retry
        self.retry = None;

        if !self.submit_buffer(handler) {
            return;
        }

        if self.rest == Some(0) {
            handler.on_eof();
            return;
        }

        if handler.direct_mask().accepts(FdType::File) {
            self.read_direct(cx, handler);
        } else {
            self.read_buffered(handler);
        }
    }

    fn into_fd(mut self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        if !self.buffer.is_empty() || self.rest.is_some() {
            return Err(self);
        }
        if self.file.seek(SeekFrom::Start(self.offset)).is_err() {
            return Err(self);
        }
        let this = *self;
        Ok((FdType::File, OwnedFd::from(this.file)))
    }
}
