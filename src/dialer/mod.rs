//! Outbound connection capabilities.
//!
//! A [`Dialer`] opens a byte stream to `host:port`, either directly or through
//! a tunnel spoken to an intermediary proxy. Dialers are built once at
//! startup (see [`registry::resolve_from_environment`]) and shared by every
//! connection task, so implementations hold no per-call mutable state.
//!
//! ```text
//! PerHost ──bypass──> Direct
//!    └────default───> Socks5 | Socks4 | HttpConnect | Http2Connect | Ssh ──forward──> Direct
//! ```

pub mod direct;
pub mod h2;
pub mod http;
pub mod per_host;
pub mod registry;
pub mod resolver;
pub mod socks;
pub mod ssh;

use crate::error::{DialError, DialResult};
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use url::Url;

pub use direct::Direct;
pub use per_host::{BypassList, BypassRule, PerHost};
pub use registry::{
    BuiltinScheme, DialerFactory, SchemeRegistry, from_lookup, from_url, global_registry,
    register_scheme, resolve_from_environment,
};
pub use resolver::{DummyResolver, SystemResolver};

/// Bidirectional byte stream returned by a dialer.
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Whether `poll_shutdown` closes only the write direction while reads
    /// keep flowing. Probed once per connection by the relay.
    fn can_half_close(&self) -> bool {
        false
    }
}

pub type BoxedStream = Box<dyn ProxyStream>;

impl ProxyStream for TcpStream {
    fn can_half_close(&self) -> bool {
        true
    }
}

impl ProxyStream for DuplexStream {
    fn can_half_close(&self) -> bool {
        true
    }
}

impl<T: ProxyStream + ?Sized> ProxyStream for Box<T> {
    fn can_half_close(&self) -> bool {
        (**self).can_half_close()
    }
}

impl<S: ProxyStream> ProxyStream for tokio_rustls::client::TlsStream<S> {
    // close_notify followed by a write shutdown of the transport
    fn can_half_close(&self) -> bool {
        self.get_ref().0.can_half_close()
    }
}

/// Network family requested from a dialer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Network {
    #[default]
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }

    /// Whether an address of this family may be used
    pub fn permits(&self, ip: &IpAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => ip.is_ipv4(),
            Network::Tcp6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(DialError::InvalidAddress(format!(
                "unsupported network {:?}",
                other
            ))),
        }
    }
}

/// A means to establish a connection
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connect to `addr` (`host:port`), possibly through a proxy
    async fn dial(&self, network: Network, addr: &str) -> DialResult<BoxedStream>;
}

#[async_trait]
impl<D: Dialer + ?Sized> Dialer for Arc<D> {
    async fn dial(&self, network: Network, addr: &str) -> DialResult<BoxedStream> {
        (**self).dial(network, addr).await
    }
}

/// A means to turn a host name into addresses
#[async_trait]
pub trait Resolver: Send + Sync + fmt::Debug {
    async fn lookup_host(&self, host: &str) -> DialResult<Vec<String>>;
}

/// Credentials taken from a proxy URL
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ProxyAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Percent-decoded user info of `url`, if any
    pub fn from_url(url: &Url) -> Option<Self> {
        if url.username().is_empty() && url.password().is_none() {
            return None;
        }
        Some(Self {
            user: percent_decode(url.username()),
            password: url.password().map(percent_decode).unwrap_or_default(),
        })
    }
}

fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Split `host:port`, accepting bracketed IPv6 literals
pub fn split_host_port(addr: &str) -> DialResult<(String, u16)> {
    let invalid = || DialError::InvalidAddress(addr.to_string());

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
        let port = rest.strip_prefix(':').ok_or_else(invalid)?;
        (host, port)
    } else {
        let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
        if host.contains(':') {
            return Err(invalid());
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Inverse of [`split_host_port`]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// First address the resolver yields for `host`
pub(crate) async fn resolve_first(resolver: &dyn Resolver, host: &str) -> DialResult<String> {
    resolver
        .lookup_host(host)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DialError::Resolve {
            host: host.to_string(),
            reason: "no addresses".to_string(),
        })
}
