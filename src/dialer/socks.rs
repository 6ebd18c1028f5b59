//! SOCKS4, SOCKS4a and SOCKS5 client tunnels.
//!
//! SOCKS5 follows RFC 1928 with RFC 1929 username/password authentication.
//! SOCKS4 can only carry IPv4 targets, so names are resolved client-side;
//! SOCKS4a sends the name and lets the proxy resolve it.

use super::{
    BoxedStream, Dialer, Network, ProxyAuth, Resolver, resolve_first, split_host_port,
};
use crate::error::{DialError, DialResult};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS5_AUTH_NONE: u8 = 0x00;
const SOCKS5_AUTH_PASSWORD: u8 = 0x02;
const SOCKS5_AUTH_NO_ACCEPTABLE: u8 = 0xff;
const SOCKS5_PASSWORD_VERSION: u8 = 0x01;
const SOCKS5_CMD_CONNECT: u8 = 0x01;
const SOCKS5_ATYP_IPV4: u8 = 0x01;
const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
const SOCKS5_ATYP_IPV6: u8 = 0x04;

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS4_CMD_CONNECT: u8 = 0x01;
const SOCKS4_GRANTED: u8 = 0x5a;
const SOCKS4_REJECTED: u8 = 0x5b;
const SOCKS4_IDENTD_UNREACHABLE: u8 = 0x5c;
const SOCKS4_IDENTD_MISMATCH: u8 = 0x5d;

/// Dialer tunneling through a SOCKS5 proxy
#[derive(Debug)]
pub struct Socks5Dialer {
    network: Network,
    proxy: String,
    auth: Option<ProxyAuth>,
    forward: Arc<dyn Dialer>,
    resolver: Arc<dyn Resolver>,
}

/// Build a SOCKS5 dialer for the proxy at `proxy` (`host:port`)
pub fn socks5(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    forward: Arc<dyn Dialer>,
    resolver: Arc<dyn Resolver>,
) -> DialResult<Arc<dyn Dialer>> {
    split_host_port(proxy)?;
    if let Some(auth) = &auth {
        if auth.user.is_empty() || auth.user.len() > 255 || auth.password.len() > 255 {
            return Err(DialError::InvalidProxyUrl(
                "SOCKS5 credentials must be 1-255 bytes".to_string(),
            ));
        }
    }
    Ok(Arc::new(Socks5Dialer {
        network,
        proxy: proxy.to_string(),
        auth,
        forward,
        resolver,
    }))
}

#[async_trait]
impl Dialer for Socks5Dialer {
    async fn dial(&self, _network: Network, addr: &str) -> DialResult<BoxedStream> {
        let (host, port) = split_host_port(addr)?;
        let host = resolve_first(self.resolver.as_ref(), &host).await?;

        let mut conn = self.forward.dial(self.network, &self.proxy).await?;
        socks5_handshake(&mut conn, &self.proxy, &host, port, self.auth.as_ref()).await?;
        debug!(proxy = %self.proxy, target = %addr, "SOCKS5 tunnel established");
        Ok(conn)
    }
}

/// Run the SOCKS5 greeting, optional authentication and CONNECT on `stream`
pub async fn socks5_handshake<S>(
    stream: &mut S,
    proxy: &str,
    host: &str,
    port: u16,
    auth: Option<&ProxyAuth>,
) -> DialResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let tunnel_error = |reason: String| DialError::Tunnel {
        proxy: proxy.to_string(),
        reason,
    };

    let greeting: &[u8] = if auth.is_some() {
        &[SOCKS5_VERSION, 2, SOCKS5_AUTH_NONE, SOCKS5_AUTH_PASSWORD]
    } else {
        &[SOCKS5_VERSION, 1, SOCKS5_AUTH_NONE]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS5_VERSION {
        return Err(tunnel_error(format!("unexpected version {}", choice[0])));
    }

    match (choice[1], auth) {
        (SOCKS5_AUTH_NONE, _) => {}
        (SOCKS5_AUTH_PASSWORD, Some(auth)) => {
            let mut request = Vec::with_capacity(3 + auth.user.len() + auth.password.len());
            request.push(SOCKS5_PASSWORD_VERSION);
            request.push(auth.user.len() as u8);
            request.extend_from_slice(auth.user.as_bytes());
            request.push(auth.password.len() as u8);
            request.extend_from_slice(auth.password.as_bytes());
            stream.write_all(&request).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(DialError::AuthRejected {
                    proxy: proxy.to_string(),
                });
            }
        }
        (SOCKS5_AUTH_NO_ACCEPTABLE, _) => {
            return Err(DialError::AuthRejected {
                proxy: proxy.to_string(),
            });
        }
        (method, _) => {
            return Err(tunnel_error(format!(
                "proxy selected unsupported auth method {}",
                method
            )));
        }
    }

    let mut request = vec![SOCKS5_VERSION, SOCKS5_CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS5_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS5_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(DialError::InvalidAddress(format!(
                    "host name too long for SOCKS5: {}",
                    host
                )));
            }
            request.push(SOCKS5_ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(tunnel_error(format!("unexpected version {}", reply[0])));
    }
    if reply[1] != 0x00 {
        return Err(tunnel_error(socks5_reply_reason(reply[1]).to_string()));
    }

    // Bound address is not needed, but must be drained
    let bound_len = match reply[3] {
        SOCKS5_ATYP_IPV4 => 4,
        SOCKS5_ATYP_IPV6 => 16,
        SOCKS5_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => return Err(tunnel_error(format!("unknown address type {}", other))),
    };
    let mut bound = vec![0u8; bound_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

fn socks5_reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS5 failure",
    }
}

/// Dialer tunneling through a SOCKS4 or SOCKS4a proxy
#[derive(Debug)]
pub struct Socks4Dialer {
    network: Network,
    proxy: String,
    user_id: String,
    remote_resolve: bool,
    forward: Arc<dyn Dialer>,
    resolver: Arc<dyn Resolver>,
}

/// Build a SOCKS4 dialer; `remote_resolve` selects SOCKS4a
pub fn socks4(
    network: Network,
    proxy: &str,
    auth: Option<ProxyAuth>,
    remote_resolve: bool,
    forward: Arc<dyn Dialer>,
    resolver: Arc<dyn Resolver>,
) -> DialResult<Arc<dyn Dialer>> {
    split_host_port(proxy)?;
    Ok(Arc::new(Socks4Dialer {
        network,
        proxy: proxy.to_string(),
        user_id: auth.map(|a| a.user).unwrap_or_default(),
        remote_resolve,
        forward,
        resolver,
    }))
}

impl Socks4Dialer {
    async fn target_ip(&self, host: &str) -> DialResult<Option<Ipv4Addr>> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Some(ip));
        }
        if self.remote_resolve {
            return Ok(None);
        }

        let addrs = self.resolver.lookup_host(host).await?;
        addrs
            .iter()
            .find_map(|a| a.parse::<Ipv4Addr>().ok())
            .map(Some)
            .ok_or_else(|| DialError::Resolve {
                host: host.to_string(),
                reason: "no IPv4 address for SOCKS4".to_string(),
            })
    }
}

#[async_trait]
impl Dialer for Socks4Dialer {
    async fn dial(&self, _network: Network, addr: &str) -> DialResult<BoxedStream> {
        let (host, port) = split_host_port(addr)?;
        let ip = self.target_ip(&host).await?;

        let mut conn = self.forward.dial(self.network, &self.proxy).await?;
        let remote_name = if ip.is_none() { Some(host.as_str()) } else { None };
        socks4_handshake(&mut conn, &self.proxy, ip, remote_name, port, &self.user_id).await?;
        debug!(proxy = %self.proxy, target = %addr, "SOCKS4 tunnel established");
        Ok(conn)
    }
}

/// Send a SOCKS4 CONNECT; a `None` address sends `remote_name` SOCKS4a style
pub async fn socks4_handshake<S>(
    stream: &mut S,
    proxy: &str,
    ip: Option<Ipv4Addr>,
    remote_name: Option<&str>,
    port: u16,
    user_id: &str,
) -> DialResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = vec![SOCKS4_VERSION, SOCKS4_CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&ip.unwrap_or(Ipv4Addr::new(0, 0, 0, 1)).octets());
    request.extend_from_slice(user_id.as_bytes());
    request.push(0x00);
    if ip.is_none() {
        let name = remote_name
            .ok_or_else(|| DialError::InvalidAddress("SOCKS4a requires a host name".to_string()))?;
        request.extend_from_slice(name.as_bytes());
        request.push(0x00);
    }
    stream.write_all(&request).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    let reason = match (reply[0], reply[1]) {
        (0x00, SOCKS4_GRANTED) => return Ok(()),
        (0x00, SOCKS4_REJECTED) => "request rejected or failed",
        (0x00, SOCKS4_IDENTD_UNREACHABLE) => "proxy cannot reach client identd",
        (0x00, SOCKS4_IDENTD_MISMATCH) => {
            return Err(DialError::AuthRejected {
                proxy: proxy.to_string(),
            });
        }
        (0x00, _) => "unknown SOCKS4 reply",
        _ => "malformed SOCKS4 reply",
    };
    Err(DialError::Tunnel {
        proxy: proxy.to_string(),
        reason: reason.to_string(),
    })
}
