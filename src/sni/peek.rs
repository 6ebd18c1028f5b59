use super::client_hello::{ClientHelloInfo, read_client_hello};
use crate::dialer::ProxyStream;
use crate::error::PeekError;
use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Default bound on buffered handshake bytes
pub const DEFAULT_MAX_HELLO_BYTES: usize = 64 * 1024;

/// Read-only adapter that records every byte it yields.
///
/// It deliberately has no `AsyncWrite` implementation: nothing read for the
/// peek may ever answer the client.
struct TeeReader<'a, R> {
    inner: &'a mut R,
    captured: Vec<u8>,
}

impl<'a, R> TeeReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            captured: Vec::with_capacity(1024),
        }
    }

    fn into_captured(self) -> Vec<u8> {
        self.captured
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TeeReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;
        this.captured.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

/// A connection whose first bytes were consumed while peeking.
///
/// Reads yield the buffered bytes first, then continue with the inner
/// stream, so a reader sees exactly what the peer sent. Writes go straight
/// to the inner stream.
#[derive(Debug)]
pub struct PeekedStream<S> {
    buffered: Bytes,
    inner: S,
}

impl<S> PeekedStream<S> {
    pub fn new(buffered: impl Into<Bytes>, inner: S) -> Self {
        Self {
            buffered: buffered.into(),
            inner,
        }
    }

    /// Bytes not yet replayed to the reader
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_parts(self) -> (Bytes, S) {
        (self.buffered, self.inner)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.buffered.has_remaining() {
            let n = this.buffered.len().min(buf.remaining());
            buf.put_slice(&this.buffered[..n]);
            this.buffered.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: ProxyStream> ProxyStream for PeekedStream<S> {
    fn can_half_close(&self) -> bool {
        self.inner.can_half_close()
    }
}

/// Extracts the ClientHello from fresh connections without losing bytes
#[derive(Debug, Clone)]
pub struct HelloPeeker {
    max_hello_bytes: usize,
}

impl Default for HelloPeeker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HELLO_BYTES)
    }
}

impl HelloPeeker {
    pub fn new(max_hello_bytes: usize) -> Self {
        Self { max_hello_bytes }
    }

    /// Read the ClientHello off `stream` and hand the stream back rewound.
    ///
    /// No byte is ever written to `stream`. On error the stream is dropped.
    pub async fn peek<S>(&self, mut stream: S) -> Result<(ClientHelloInfo, PeekedStream<S>), PeekError>
    where
        S: AsyncRead + Unpin,
    {
        let mut tee = TeeReader::new(&mut stream);
        let hello = read_client_hello(&mut tee, self.max_hello_bytes).await?;
        let captured = tee.into_captured();
        Ok((hello, PeekedStream::new(captured, stream)))
    }
}

/// [`HelloPeeker::peek`] with the default size bound
pub async fn peek_client_hello<S>(stream: S) -> Result<(ClientHelloInfo, PeekedStream<S>), PeekError>
where
    S: AsyncRead + Unpin,
{
    HelloPeeker::default().peek(stream).await
}
