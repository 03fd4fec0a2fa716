//! Bridges between stream nodes and `futures` byte streams.
//!
//! [`IstreamBody`] turns a node into a `Stream` of `Bytes` chunks so axum
//! can send it as a response body.  [`StreamIstream`] goes the other way and
//! wraps an incoming request body as a node.

use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};

use super::sink::MAX_READ_ROUNDS;
use super::{
    BoxIstream, BucketList, FdType, Istream, IstreamError, IstreamHandler, IstreamPointer,
};

/// Largest chunk [`IstreamBody`] copies out of a node per item.
const CHUNK_SIZE: usize = 64 * 1024;

pub struct IstreamBody {
    input: IstreamPointer,
    /// Error that arrived together with the last chunk.
    pending_error: Option<IstreamError>,
}

impl IstreamBody {
    pub fn new(input: BoxIstream) -> Self {
        Self {
            input: IstreamPointer::new(input),
            pending_error: None,
        }
    }

    /// Exact remaining length, if the node knows it.
    pub fn size_hint_exact(&self) -> Option<u64> {
        self.input.available(false)
    }

    /// Take the next chunk straight from the node's buckets.
    fn poll_buckets(&mut self) -> Option<Result<Bytes, IstreamError>> {
        let mut list = BucketList::new();
        if let Err(e) = self.input.fill_bucket_list(&mut list) {
            return Some(Err(e));
        }
        if list.should_fallback() {
            return None;
        }

        let chunk = list.buffers().first()?.clone();
        let consumed = self.input.consume_bucket_list(chunk.len());
        Some(Ok(chunk.slice(..consumed)))
    }
}

struct ChunkCollector {
    buffer: BytesMut,
    terminal: Option<Result<(), IstreamError>>,
}

impl IstreamHandler for ChunkCollector {
    fn on_data(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(CHUNK_SIZE - self.buffer.len());
        self.buffer.extend_from_slice(&data[..n]);
        n
    }

    fn on_eof(&mut self) {
        self.terminal = Some(Ok(()));
    }

    fn on_error(&mut self, error: IstreamError) {
        self.terminal = Some(Err(error));
    }
}

impl Stream for IstreamBody {
    type Item = Result<Bytes, IstreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(e) = this.pending_error.take() {
            return Poll::Ready(Some(Err(e)));
        }
        if !this.input.is_defined() {
            return Poll::Ready(None);
        }

        match this.poll_buckets() {
            Some(Ok(chunk)) if !chunk.is_empty() => return Poll::Ready(Some(Ok(chunk))),
            Some(Err(e)) => return Poll::Ready(Some(Err(e))),
            _ => {}
        }

        let mut collector = ChunkCollector {
            buffer: BytesMut::new(),
            terminal: None,
        };

        for _ in 0..MAX_READ_ROUNDS {
            let before = collector.buffer.len();
            this.input.read(cx, &mut collector);

            match collector.terminal.take() {
                Some(Ok(())) if collector.buffer.is_empty() => return Poll::Ready(None),
                Some(Err(e)) if collector.buffer.is_empty() => return Poll::Ready(Some(Err(e))),
                Some(Err(e)) => this.pending_error = Some(e),
                _ => {}
            }

            let full = collector.buffer.len() >= CHUNK_SIZE;
            if full || !this.input.is_defined() || collector.buffer.len() == before {
                break;
            }
        }

        if collector.buffer.is_empty() {
            if this.input.is_defined() {
                // no data and no terminal event: the node registered our waker
                return Poll::Pending;
            }
            return Poll::Ready(None);
        }

        Poll::Ready(Some(Ok(collector.buffer.freeze())))
    }
}

/// Node reading from a `Stream` of byte chunks.
pub struct StreamIstream {
    stream: BoxStream<'static, Result<Bytes, IstreamError>>,
    pending: Bytes,
    /// Bytes still expected, if announced up front (e.g. Content-Length).
    remaining: Option<u64>,
}

impl StreamIstream {
    pub fn new<S, E>(stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            stream: stream
                .map(|item| item.map_err(|e| IstreamError::Upstream(e.to_string())))
                .boxed(),
            pending: Bytes::new(),
            remaining: length,
        }
    }

    fn submit(&mut self, handler: &mut dyn IstreamHandler) -> bool {
        let n = handler.on_data(&self.pending);
        self.pending.advance(n);
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(n as u64);
        }
        self.pending.is_empty()
    }
}

impl Istream for StreamIstream {
    fn available(&self, partial: bool) -> Option<u64> {
        match self.remaining {
            Some(remaining) => Some(remaining),
            None if partial => Some(self.pending.len() as u64),
            None => None,
        }
    }

    fn read(&mut self, cx: &mut Context<'_>, handler: &mut dyn IstreamHandler) {
        if !self.pending.is_empty() && !self.submit(handler) {
            return;
        }

        loop {
            match self.stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Poll::Ready(Some(Ok(chunk))) => {
                    self.pending = chunk;
                    self.submit(handler);
                }
                Poll::Ready(Some(Err(e))) => handler.on_error(e),
                Poll::Ready(None) => match self.remaining {
                    Some(remaining) if remaining > 0 => handler.on_error(
                        IstreamError::PrematureEof(format!("body ended {remaining} bytes early")),
                    ),
                    _ => handler.on_eof(),
                },
                Poll::Pending => {}
            }
            return;
        }
    }

    fn into_fd(self: Box<Self>) -> Result<(FdType, OwnedFd), BoxIstream> {
        Err(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::{sink_buffer, tee, FailIstream, MemoryIstream};
    use futures_util::stream;

    #[tokio::test]
    async fn test_body_from_memory_uses_buckets() {
        let mut body = IstreamBody::new(Box::new(MemoryIstream::new("cached body")));
        assert_eq!(body.size_hint_exact(), Some(11));

        let chunk = body.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"cached body");
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_body_reports_error() {
        let mut body = IstreamBody::new(Box::new(FailIstream::new(IstreamError::Timeout(
            "upstream".into(),
        ))));
        assert!(matches!(
            body.next().await,
            Some(Err(IstreamError::Timeout(_)))
        ));
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_body_from_tee_output() {
        let (first, second) = tee(Box::new(MemoryIstream::new("shared")), false, true);
        let store = tokio::spawn(sink_buffer(Box::new(second), 64));

        let mut body = IstreamBody::new(Box::new(first));
        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(received, b"shared");
        assert_eq!(&store.await.unwrap().unwrap()[..], b"shared");
    }

    #[tokio::test]
    async fn test_stream_istream_round_trip() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let node = StreamIstream::new(stream::iter(chunks), Some(11));
        assert_eq!(node.available(false), Some(11));

        let data = sink_buffer(Box::new(node), 64).await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_stream_istream_short_body() {
        let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(b"abc"))];
        let node = StreamIstream::new(stream::iter(chunks), Some(10));
        let err = sink_buffer(Box::new(node), 64).await.unwrap_err();
        assert!(err.to_string().contains("early"));
    }
}
