//! Collect a whole stream into memory.

use std::future::poll_fn;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};

use super::{BoxIstream, IstreamError, IstreamHandler, IstreamPointer};

/// Read rounds a consumer performs in one poll before yielding.
pub const MAX_READ_ROUNDS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Stream(#[from] IstreamError),

    #[error("stream exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("socket write failed: {0}")]
    Write(#[source] std::io::Error),
}

struct BufferSink {
    buffer: BytesMut,
    limit: usize,
    too_large: bool,
    done: Option<Result<(), IstreamError>>,
}

impl IstreamHandler for BufferSink {
    fn on_data(&mut self, data: &[u8]) -> usize {
        if self.buffer.len() + data.len() > self.limit {
            self.too_large = true;
            return 0;
        }
        self.buffer.extend_from_slice(data);
        data.len()
    }

    fn on_eof(&mut self) {
        self.done = Some(Ok(()));
    }

    fn on_error(&mut self, error: IstreamError) {
        self.done = Some(Err(error));
    }
}

/// Read `input` to the end and return its contents.  Streams longer than
/// `limit` fail with [`SinkError::TooLarge`]; the input is closed on every
/// exit path, including cancellation.
pub async fn sink_buffer(input: BoxIstream, limit: usize) -> Result<Bytes, SinkError> {
    let mut input = IstreamPointer::new(input);

    let mut sink = BufferSink {
        buffer: BytesMut::new(),
        limit,
        too_large: false,
        done: None,
    };

    if let Some(available) = input.available(false) {
        if available > limit as u64 {
            return Err(SinkError::TooLarge { limit });
        }
        sink.buffer.reserve(available as usize);
    }

    poll_fn(|cx| poll_sink(&mut input, &mut sink, cx)).await
}

fn poll_sink(
    input: &mut IstreamPointer,
    sink: &mut BufferSink,
    cx: &mut Context<'_>,
) -> Poll<Result<Bytes, SinkError>> {
    for _ in 0..MAX_READ_ROUNDS {
        let before = sink.buffer.len();
        input.read(cx, sink);

        if let Some(result) = sink.done.take() {
            return Poll::Ready(match result {
                Ok(()) => Ok(sink.buffer.split().freeze()),
                Err(e) => Err(e.into()),
            });
        }

        if sink.too_large {
            input.close();
            return Poll::Ready(Err(SinkError::TooLarge { limit: sink.limit }));
        }

        if sink.buffer.len() == before {
            // the input registered our waker
            return Poll::Pending;
        }
    }

    cx.waker().wake_by_ref();
    Poll::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::{tee, BlockIstream, FailIstream, MemoryIstream, ZeroIstream};
    use std::time::Duration;

    #[tokio::test]
    async fn test_sink_buffer_collects() {
        let data = sink_buffer(Box::new(MemoryIstream::new("collected")), 1024)
            .await
            .unwrap();
        assert_eq!(&data[..], b"collected");
    }

    #[tokio::test]
    async fn test_sink_buffer_limit() {
        let err = sink_buffer(Box::new(MemoryIstream::new("0123456789")), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::TooLarge { limit: 4 }));

        // unknown length, discovered while reading
        let err = sink_buffer(Box::new(ZeroIstream), 10_000).await.unwrap_err();
        assert!(matches!(err, SinkError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn test_sink_buffer_error() {
        let err = sink_buffer(
            Box::new(FailIstream::new(IstreamError::Protocol("bad".into()))),
            16,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SinkError::Stream(IstreamError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_sink_buffer_blocks() {
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            sink_buffer(Box::new(BlockIstream), 16),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sink_both_tee_outputs_concurrently() {
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let (first, second) = tee(Box::new(MemoryIstream::new(body.clone())), false, true);

        let store = tokio::spawn(sink_buffer(Box::new(second), 1 << 20));
        let caller = sink_buffer(Box::new(first), 1 << 20).await.unwrap();
        let stored = store.await.unwrap().unwrap();

        assert_eq!(&caller[..], &body[..]);
        assert_eq!(&stored[..], &body[..]);
    }
}
