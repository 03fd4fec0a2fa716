//! Write a stream to a TCP socket.
//!
//! Buffered data goes through non-blocking `try_write`.  File nodes are
//! offered the socket for `sendfile` so cached files and local resources
//! never pass through user space.

use std::future::poll_fn;
use std::io;
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
use std::os::fd::BorrowedFd;
use std::task::{Context, Poll};

use tokio::net::TcpStream;

use super::sink::MAX_READ_ROUNDS;
use super::{
    BoxIstream, DirectResult, FdType, FdTypeMask, IstreamError, IstreamHandler, IstreamPointer,
    SinkError,
};

struct SocketSink<'a> {
    stream: &'a TcpStream,
    written: u64,
    /// The socket buffer is full; wait for writability before reading on.
    blocked: bool,
    error: Option<io::Error>,
    done: Option<Result<(), IstreamError>>,
}

impl IstreamHandler for SocketSink<'_> {
    fn on_data(&mut self, data: &[u8]) -> usize {
        match self.stream.try_write(data) {
            Ok(0) => {
                self.error = Some(io::ErrorKind::WriteZero.into());
                0
            }
            Ok(n) => {
                self.written += n as u64;
                n
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.blocked = true;
                0
            }
            Err(e) => {
                self.error = Some(e);
                0
            }
        }
    }

    fn direct_mask(&self) -> FdTypeMask {
        if cfg!(target_os = "linux") {
            FdTypeMask::FILE
        } else {
            FdTypeMask::empty()
        }
    }

    #[cfg(target_os = "linux")]
    fn on_direct(
        &mut self,
        fd_type: FdType,
        fd: BorrowedFd<'_>,
        offset: Option<u64>,
        max_length: usize,
    ) -> DirectResult {
        if fd_type != FdType::File {
            return DirectResult::Blocking;
        }

        let stream = self.stream;
        let result = stream.try_io(tokio::io::Interest::WRITABLE, || {
            let mut off = offset.unwrap_or(0) as libc::off_t;
            let off_ptr = if offset.is_some() {
                &mut off as *mut libc::off_t
            } else {
                std::ptr::null_mut()
            };
            // SAFETY: both descriptors are open for the duration of the call
            // and `off_ptr` is null or points at a live local.
            let n = unsafe { libc::sendfile(stream.as_raw_fd(), fd.as_raw_fd(), off_ptr, max_length) };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        });

        match result {
            Ok(0) => DirectResult::Eof,
            Ok(n) => {
                self.written += n as u64;
                DirectResult::Transferred(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.blocked = true;
                DirectResult::Blocking
            }
            Err(e) => DirectResult::Err(e),
        }
    }

    fn on_eof(&mut self) {
        self.done = Some(Ok(()));
    }

    fn on_error(&mut self, error: IstreamError) {
        self.done = Some(Err(error));
    }
}

/// Copy `input` into `stream` until eof.  Returns the number of bytes
/// written.  Dropping the future closes the input.
pub async fn sink_socket(input: BoxIstream, stream: &TcpStream) -> Result<u64, SinkError> {
    let mut input = IstreamPointer::new(input);
    let mut sink = SocketSink {
        stream,
        written: 0,
        blocked: false,
        error: None,
        done: None,
    };

    poll_fn(|cx| poll_socket(&mut input, &mut sink, cx)).await
}

fn poll_socket(
    input: &mut IstreamPointer,
    sink: &mut SocketSink<'_>,
    cx: &mut Context<'_>,
) -> Poll<Result<u64, SinkError>> {
    for _ in 0..MAX_READ_ROUNDS {
        let before = sink.written;
        sink.blocked = false;
        input.read(cx, sink);

        if let Some(e) = sink.error.take() {
            input.close();
            return Poll::Ready(Err(SinkError::Write(e)));
        }

        if let Some(result) = sink.done.take() {
            return Poll::Ready(result.map(|()| sink.written).map_err(SinkError::from));
        }

        if sink.blocked {
            match sink.stream.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => continue,
                Poll::Ready(Err(e)) => {
                    input.close();
                    return Poll::Ready(Err(SinkError::Write(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        if sink.written == before {
            return Poll::Pending;
        }
    }

    cx.waker().wake_by_ref();
    Poll::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::istream::{FailIstream, FileIstream, MemoryIstream};
    use std::io::Write;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_sink_socket_memory() {
        let (client, mut server) = socket_pair().await;

        let written = sink_socket(Box::new(MemoryIstream::new("over the wire")), &client)
            .await
            .unwrap();
        assert_eq!(written, 13);
        drop(client);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"over the wire");
    }

    #[tokio::test]
    async fn test_sink_socket_large_body_with_slow_reader() {
        let (client, mut server) = socket_pair().await;
        let body: Vec<u8> = (0..4_000_000u32).map(|i| (i % 253) as u8).collect();

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received
        });

        let written = sink_socket(Box::new(MemoryIstream::new(body.clone())), &client)
            .await
            .unwrap();
        assert_eq!(written, body.len() as u64);
        drop(client);

        assert_eq!(reader.await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_sink_socket_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"file contents via socket").unwrap();
        let node = FileIstream::open(tmp.path()).unwrap();

        let (client, mut server) = socket_pair().await;
        let written = sink_socket(Box::new(node), &client).await.unwrap();
        assert_eq!(written, 24);
        drop(client);

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"file contents via socket");
    }

    #[tokio::test]
    async fn test_sink_socket_stream_error() {
        let (client, _server) = socket_pair().await;
        let err = sink_socket(
            Box::new(FailIstream::new(IstreamError::Aborted("gone".into()))),
            &client,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SinkError::Stream(IstreamError::Aborted(_))));
    }
}
