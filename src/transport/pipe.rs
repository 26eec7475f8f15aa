//! # Result Pipe
//!
//! Delivers a result envelope to the caller as a byte stream.
//!
//! One writer task per result pushes the prefix and then each body chunk into
//! a bounded channel as the chunks arrive upstream. The caller reads from the
//! other end through [`ResponseHandle`]. A full channel suspends the writer,
//! so the upstream response never runs more than `capacity` chunks ahead of
//! the reader.
//!
//! The writer drops the body (and with it the upstream connection) when the
//! body is exhausted, when reading it fails, or when the reader goes away.
//! Dropping the sender is what the reader observes as end-of-stream.

use crate::core::codec::ResultPrefixCodec;
use crate::core::serialization::ResultPrefix;
use crate::core::BodyStream;
use crate::error::{BrokerError, Result};
use crate::utils::metrics::Metrics;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// Spawns writer tasks feeding bounded result pipes
#[derive(Debug, Clone)]
pub struct ResultPipe {
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl ResultPipe {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Stream `prefix` followed by `body` to a new handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn stream(&self, prefix: Bytes, body: Option<BodyStream>) -> ResponseHandle {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.metrics.pipe_opened();
        tokio::spawn(write_result(tx, prefix, body, self.metrics.clone()));

        ResponseHandle {
            reader: StreamReader::new(ReceiverStream::new(rx)),
        }
    }
}

async fn write_result(
    tx: mpsc::Sender<io::Result<Bytes>>,
    prefix: Bytes,
    body: Option<BodyStream>,
    metrics: Arc<Metrics>,
) {
    let mut written = prefix.len() as u64;

    if tx.send(Ok(prefix)).await.is_err() {
        debug!("Reader closed before the result prefix was sent");
        metrics.pipe_closed(0);
        return;
    }

    if let Some(mut body) = body {
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => {
                    let len = bytes.len() as u64;
                    if tx.send(Ok(bytes)).await.is_err() {
                        warn!(written, "Reader closed the result pipe early");
                        break;
                    }
                    written += len;
                }
                Err(e) => {
                    warn!(error = %e, written, "Response body failed, closing result pipe");
                    break;
                }
            }
        }
    }

    metrics.pipe_closed(written);
    debug!(bytes = written, "Done sending result");
}

/// Read end of a result pipe
pub struct ResponseHandle {
    reader: StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>,
}

impl ResponseHandle {
    /// Decode the result prefix and return it with a reader over the body.
    pub async fn into_parts(self) -> Result<(ResultPrefix, ResultBody<Self>)> {
        split_result(self).await
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle").finish_non_exhaustive()
    }
}

impl AsyncRead for ResponseHandle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Read the result prefix off any byte stream carrying a result envelope.
///
/// Fails with `PipeClosed` if the stream ends before a full prefix arrived.
pub async fn split_result<R>(reader: R) -> Result<(ResultPrefix, ResultBody<R>)>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, ResultPrefixCodec);
    let prefix = match framed.next().await {
        Some(prefix) => prefix?,
        None => return Err(BrokerError::PipeClosed),
    };

    let parts = framed.into_parts();
    Ok((
        prefix,
        ResultBody {
            buffered: parts.read_buf.freeze(),
            inner: parts.io,
        },
    ))
}

/// Body bytes of a result envelope: whatever was read along with the prefix,
/// then the rest of the underlying stream
pub struct ResultBody<R> {
    buffered: Bytes,
    inner: R,
}

impl<R: AsyncRead + Unpin> AsyncRead for ResultBody<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.buffered.has_remaining() {
            let n = self.buffered.len().min(buf.remaining());
            buf.put_slice(&self.buffered[..n]);
            self.buffered.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::core::serialization::{encode_result_prefix, ProtocolVersion};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn pipe(capacity: usize) -> (ResultPipe, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (ResultPipe::new(capacity, metrics.clone()), metrics)
    }

    fn chunks(parts: &[&'static str]) -> BodyStream {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_prefix_only_stream() {
        let (pipe, _) = pipe(4);
        let mut handle = pipe.stream(Bytes::from_static(b"prefix"), None);
        let mut out = Vec::new();
        handle.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, b"prefix");
    }

    #[tokio::test]
    async fn test_prefix_then_body_in_order() {
        let (pipe, metrics) = pipe(1);
        let mut handle = pipe.stream(Bytes::from_static(b"P:"), Some(chunks(&["a", "", "bc", "d"])));
        let mut out = Vec::new();
        handle.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, b"P:abcd");

        tokio::time::sleep(Duration::from_millis(10)).await;
        let snap = metrics.snapshot();
        assert_eq!(snap.bytes_streamed, 6);
        assert_eq!(snap.pipes_active, 0);
    }

    #[tokio::test]
    async fn test_body_error_ends_stream() {
        let (pipe, _) = pipe(4);
        let body = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ])
        .boxed();
        let mut handle = pipe.stream(Bytes::from_static(b">"), Some(body));
        let mut out = Vec::new();
        handle.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, b">ok");
    }

    #[tokio::test]
    async fn test_writer_blocks_until_reader_drains() {
        let (pipe, metrics) = pipe(1);
        let (body_tx, body_rx) = mpsc::channel::<io::Result<Bytes>>(8);
        for _ in 0..4 {
            body_tx.send(Ok(Bytes::from_static(b"xx"))).await.expect("send");
        }
        drop(body_tx);

        let handle = pipe.stream(Bytes::from_static(b"p"), Some(ReceiverStream::new(body_rx).boxed()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(metrics.snapshot().pipes_active, 1);

        let mut out = Vec::new();
        let mut handle = handle;
        handle.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, b"pxxxxxxxx");
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_writer() {
        let (pipe, metrics) = pipe(1);
        let body = futures::stream::repeat_with(|| Ok(Bytes::from_static(b"chunk"))).boxed();
        let handle = pipe.stream(Bytes::from_static(b"p"), Some(body));
        drop(handle);

        tokio::time::timeout(Duration::from_secs(2), async {
            while metrics.snapshot().pipes_active != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("writer should stop after the reader is gone");
    }

    #[tokio::test]
    async fn test_into_parts_splits_prefix_from_body() {
        let (pipe, _) = pipe(2);
        let prefix = encode_result_prefix(ProtocolVersion::V2, None, Some("HTTP/1.1 200 OK"))
            .expect("encode");
        let handle = pipe.stream(Bytes::from(prefix), Some(chunks(&["hello ", "world"])));

        let (prefix, mut body) = handle.into_parts().await.expect("parts");
        assert!(prefix.error.is_none());
        assert_eq!(prefix.headers.as_deref(), Some("HTTP/1.1 200 OK"));

        let mut out = String::new();
        body.read_to_string(&mut out).await.expect("read");
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_into_parts_on_empty_stream() {
        let (pipe, _) = pipe(2);
        let handle = pipe.stream(Bytes::new(), None);
        assert!(matches!(
            handle.into_parts().await,
            Err(BrokerError::PipeClosed)
        ));
    }
}
