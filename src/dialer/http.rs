//! HTTP/1.1 CONNECT tunnels, in clear or over TLS to the proxy.

use super::{BoxedStream, Dialer, Network, ProxyAuth, split_host_port};
use crate::error::{DialError, DialResult};
use crate::sni::PeekedStream;
use crate::tls_utils;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Upper bound on the proxy's response head
pub const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Dialer tunneling through an HTTP proxy with `CONNECT`
pub struct HttpConnectDialer {
    network: Network,
    proxy: String,
    auth: Option<ProxyAuth>,
    tls: Option<TlsConnector>,
    forward: Arc<dyn Dialer>,
}

impl fmt::Debug for HttpConnectDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnectDialer")
            .field("network", &self.network)
            .field("proxy", &self.proxy)
            .field("auth", &self.auth)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Plain-text HTTP proxy
pub fn http1(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    forward: Arc<dyn Dialer>,
) -> DialResult<Arc<dyn Dialer>> {
    split_host_port(proxy)?;
    Ok(Arc::new(HttpConnectDialer {
        network,
        proxy: proxy.to_string(),
        auth,
        tls: None,
        forward,
    }))
}

/// HTTP proxy reached over TLS, verified against the platform roots
pub fn https(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    forward: Arc<dyn Dialer>,
) -> DialResult<Arc<dyn Dialer>> {
    let config = tls_utils::client_config(&[b"http/1.1"])?;
    https_with_connector(network, proxy, auth, tls_utils::connector(config), forward)
}

/// HTTP proxy over TLS using a caller-provided connector
pub fn https_with_connector(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    connector: TlsConnector,
    forward: Arc<dyn Dialer>,
) -> DialResult<Arc<dyn Dialer>> {
    split_host_port(proxy)?;
    Ok(Arc::new(HttpConnectDialer {
        network,
        proxy: proxy.to_string(),
        auth,
        tls: Some(connector),
        forward,
    }))
}

#[async_trait]
impl Dialer for HttpConnectDialer {
    async fn dial(&self, _network: Network, addr: &str) -> DialResult<BoxedStream> {
        split_host_port(addr)?;
        let conn = self.forward.dial(self.network, &self.proxy).await?;

        let mut conn: BoxedStream = match &self.tls {
            Some(connector) => {
                let (host, _) = split_host_port(&self.proxy)?;
                let name = tls_utils::server_name(&host)?;
                let tls = connector
                    .connect(name, conn)
                    .await
                    .map_err(|e| DialError::Tls(e.to_string()))?;
                Box::new(tls)
            }
            None => conn,
        };

        let leftover = http_connect(&mut conn, &self.proxy, addr, self.auth.as_ref()).await?;
        debug!(proxy = %self.proxy, target = %addr, "CONNECT tunnel established");
        if leftover.is_empty() {
            Ok(conn)
        } else {
            Ok(Box::new(PeekedStream::new(leftover, conn)))
        }
    }
}

/// `Proxy-Authorization` value for basic credentials
pub fn basic_auth_header(auth: &ProxyAuth) -> String {
    let token = STANDARD.encode(format!("{}:{}", auth.user, auth.password));
    format!("Basic {}", token)
}

/// Send `CONNECT target` and wait for a 2xx.
///
/// Returns any bytes the proxy sent after the response head; they belong to
/// the tunnel.
pub async fn http_connect<S>(
    stream: &mut S,
    proxy: &str,
    target: &str,
    auth: Option<&ProxyAuth>,
) -> DialResult<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // The target lands verbatim in the request line and Host header
    if target
        .bytes()
        .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(DialError::InvalidAddress(format!("{:?}", target)));
    }

    let mut request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Connection: Keep-Alive\r\n"
    );
    if let Some(auth) = auth {
        request.push_str(&format!("Proxy-Authorization: {}\r\n", basic_auth_header(auth)));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut head = Vec::with_capacity(512);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = find_head_end(&head) {
            break pos;
        }
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(DialError::Tunnel {
                proxy: proxy.to_string(),
                reason: "response head too large".to_string(),
            });
        }
        let want = chunk.len().min(MAX_RESPONSE_HEAD + 4 - head.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(DialError::Tunnel {
                proxy: proxy.to_string(),
                reason: "connection closed before response".to_string(),
            });
        }
        head.extend_from_slice(&chunk[..n]);
    };

    let status = parse_status(&head[..head_end]).ok_or_else(|| DialError::Tunnel {
        proxy: proxy.to_string(),
        reason: "malformed response status line".to_string(),
    })?;

    match status {
        200..=299 => Ok(Bytes::copy_from_slice(&head[head_end..])),
        407 => Err(DialError::AuthRejected {
            proxy: proxy.to_string(),
        }),
        other => Err(DialError::Tunnel {
            proxy: proxy.to_string(),
            reason: format!("proxy answered {}", other),
        }),
    }
}

/// Offset just past the blank line ending the head
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn parse_status(head: &[u8]) -> Option<u16> {
    let line_end = head.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&head[..line_end]).ok()?;
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/1.") {
        return None;
    }
    parts.next()?.parse().ok()
}
