//! Bidirectional byte shuttle between a client and its backend.

use crate::dialer::ProxyStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Per-direction copy buffer
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Bytes moved by one finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub to_backend: u64,
    pub from_backend: u64,
}

/// Copy both directions until each has ended.
///
/// When one direction reaches EOF (or fails), the opposite write side is
/// shut down if that stream supports half-close, so the peer sees the end
/// of stream while the other direction keeps flowing. Both streams are
/// dropped, and so closed, when the relay returns.
pub async fn relay<A, B>(client: A, backend: B) -> RelayStats
where
    A: ProxyStream,
    B: ProxyStream,
{
    let client_half_close = client.can_half_close();
    let backend_half_close = backend.can_half_close();

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let (to_backend, from_backend) = tokio::join!(
        copy_half(
            &mut client_read,
            &mut backend_write,
            backend_half_close,
            "client->backend"
        ),
        copy_half(
            &mut backend_read,
            &mut client_write,
            client_half_close,
            "backend->client"
        ),
    );

    RelayStats {
        to_backend,
        from_backend,
    }
}

/// Copy `reader` into `writer` until EOF or error; returns bytes written
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    half_close: bool,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(direction, bytes = total, "Relay direction reached EOF");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(direction, bytes = total, error = %e, "Relay read ended");
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!(direction, bytes = total, error = %e, "Relay write ended");
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!(direction, bytes = total, error = %e, "Relay flush ended");
            break;
        }
        total += n as u64;
    }

    if half_close {
        if let Err(e) = writer.shutdown().await {
            debug!(direction, error = %e, "Half-close failed");
        }
    }
    total
}
