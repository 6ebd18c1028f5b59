//! CONNECT tunnels multiplexed over an HTTP/2 connection to a TLS proxy.

use super::{BoxedStream, Dialer, Network, ProxyAuth, ProxyStream, split_host_port};
use crate::dialer::http::basic_auth_header;
use crate::error::{DialError, DialResult};
use crate::tls_utils;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::client::conn::http2::{self, SendRequest};
use hyper::header::{HOST, PROXY_AUTHORIZATION};
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

const ALPN_H2: &[u8] = b"h2";

/// Dialer opening one HTTP/2 connection per tunnel
pub struct Http2ConnectDialer {
    network: Network,
    proxy: String,
    auth: Option<ProxyAuth>,
    tls: TlsConnector,
    forward: Arc<dyn Dialer>,
}

impl fmt::Debug for Http2ConnectDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http2ConnectDialer")
            .field("network", &self.network)
            .field("proxy", &self.proxy)
            .field("auth", &self.auth)
            .finish()
    }
}

pub fn https_h2(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    forward: Arc<dyn Dialer>,
) -> DialResult<Arc<dyn Dialer>> {
    let config = tls_utils::client_config(&[ALPN_H2])?;
    https_h2_with_connector(network, proxy, auth, tls_utils::connector(config), forward)
}

pub fn https_h2_with_connector(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    connector: TlsConnector,
    forward: Arc<dyn Dialer>,
) -> DialResult<Arc<dyn Dialer>> {
    split_host_port(proxy)?;
    Ok(Arc::new(Http2ConnectDialer {
        network,
        proxy: proxy.to_string(),
        auth,
        tls: connector,
        forward,
    }))
}

impl Http2ConnectDialer {
    fn tunnel_error(&self, reason: impl fmt::Display) -> DialError {
        DialError::Tunnel {
            proxy: self.proxy.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Dialer for Http2ConnectDialer {
    async fn dial(&self, _network: Network, addr: &str) -> DialResult<BoxedStream> {
        split_host_port(addr)?;
        let conn = self.forward.dial(self.network, &self.proxy).await?;

        let (proxy_host, _) = split_host_port(&self.proxy)?;
        let tls = self
            .tls
            .connect(tls_utils::server_name(&proxy_host)?, conn)
            .await
            .map_err(|e| DialError::Tls(e.to_string()))?;
        if tls.get_ref().1.alpn_protocol() != Some(ALPN_H2) {
            return Err(self.tunnel_error("proxy did not negotiate h2"));
        }

        let (mut sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(tls))
            .await
            .map_err(|e| self.tunnel_error(e))?;
        let proxy = self.proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(proxy = %proxy, error = %e, "HTTP/2 proxy connection failed");
            }
        });

        let mut request = Request::builder()
            .method(Method::CONNECT)
            .uri(addr)
            .header(HOST, addr);
        if let Some(auth) = &self.auth {
            request = request.header(PROXY_AUTHORIZATION, basic_auth_header(auth));
        }
        let request = request
            .body(Empty::<Bytes>::new())
            .map_err(|e| DialError::InvalidAddress(format!("{}: {}", addr, e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| self.tunnel_error(e))?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                return Err(DialError::AuthRejected {
                    proxy: self.proxy.clone(),
                });
            }
            s => return Err(self.tunnel_error(format!("proxy answered {}", s))),
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| self.tunnel_error(e))?;
        debug!(proxy = %self.proxy, target = %addr, "HTTP/2 CONNECT tunnel established");

        Ok(Box::new(H2Tunnel {
            io: TokioIo::new(upgraded),
            _sender: sender,
        }))
    }
}

/// One CONNECT stream; holds its request handle so the connection outlives it
pub struct H2Tunnel {
    io: TokioIo<Upgraded>,
    _sender: SendRequest<Empty<Bytes>>,
}

impl AsyncRead for H2Tunnel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for H2Tunnel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    // Ends the request stream; the response stream keeps flowing
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

impl ProxyStream for H2Tunnel {
    fn can_half_close(&self) -> bool {
        true
    }
}
