/// Error types for the SNI proxy
use std::time::Duration;
use thiserror::Error;

/// Errors raised while extracting the ClientHello from a new connection
#[derive(Error, Debug)]
pub enum PeekError {
    /// First record is not a TLS handshake record
    #[error("first record does not look like a TLS handshake")]
    NotTls,

    /// A handshake message other than ClientHello arrived first
    #[error("unexpected handshake message type {0}, expected ClientHello")]
    UnexpectedMessage(u8),

    /// Stream ended before a complete ClientHello was read
    #[error("connection closed before a complete ClientHello was received")]
    Incomplete,

    /// ClientHello is structurally invalid
    #[error("malformed ClientHello: {0}")]
    Malformed(&'static str),

    /// ClientHello exceeds the configured buffer bound
    #[error("ClientHello exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// Underlying I/O error
    #[error("I/O error while reading ClientHello: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or using a dialer
#[derive(Error, Debug)]
pub enum DialError {
    /// Proxy URL could not be parsed or lacks a host
    #[error("invalid proxy URL: {0}")]
    InvalidProxyUrl(String),

    /// No built-in or registered dialer handles this scheme
    #[error("unknown proxy scheme: {0}")]
    UnknownScheme(String),

    /// Target is not a valid host:port pair
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Name resolution failed
    #[error("failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// TCP connection could not be opened
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Proxy refused the supplied credentials
    #[error("proxy {proxy} rejected authentication")]
    AuthRejected { proxy: String },

    /// Proxy answered but refused or broke the tunnel
    #[error("tunnel through {proxy} failed: {reason}")]
    Tunnel { proxy: String, reason: String },

    /// TLS setup towards the proxy failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Network I/O error during the tunnel handshake
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a failed connection, contained in its own task
#[derive(Error, Debug)]
pub enum ProxyError {
    /// ClientHello extraction failed
    #[error("peek client hello error: {0}")]
    Peek(#[from] PeekError),

    /// Client did not deliver its ClientHello before the deadline
    #[error("no ClientHello within {0:?}")]
    PeekTimeout(Duration),

    /// ClientHello carried no server name, so there is nothing to route on
    #[error("ClientHello has no server name")]
    NoServerName,

    /// Backend could not be reached
    #[error("dial {target} error: {source}")]
    Dial {
        target: String,
        #[source]
        source: DialError,
    },

    /// Socket-level error on the accepted connection
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scheme registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Registration attempted after the registry was first read
    #[error("cannot register scheme {scheme}: registry is frozen")]
    Frozen { scheme: String },
}

/// Result type alias for dialer operations
pub type DialResult<T> = Result<T, DialError>;
