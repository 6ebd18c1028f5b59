use super::{BoxedStream, Dialer, Network, split_host_port};
use crate::error::{DialError, DialResult};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens plain outbound TCP connections, no tunneling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Direct;

impl Direct {
    pub async fn connect(&self, network: Network, addr: &str) -> DialResult<TcpStream> {
        let (host, port) = split_host_port(addr)?;
        let candidates = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| DialError::Resolve {
                host: host.clone(),
                reason: e.to_string(),
            })?
            .filter(|a| network.permits(&a.ip()))
            .collect::<Vec<_>>();

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    // Best effort; a failure here does not affect correctness
                    let _ = stream.set_nodelay(true);
                    debug!(addr = %addr, remote = %candidate, "direct connection established");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(remote = %candidate, error = %e, "direct connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(source) => DialError::Connect {
                addr: addr.to_string(),
                source,
            },
            None => DialError::Resolve {
                host,
                reason: format!("no {} addresses", network),
            },
        })
    }
}

#[async_trait]
impl Dialer for Direct {
    async fn dial(&self, network: Network, addr: &str) -> DialResult<BoxedStream> {
        let stream = self.connect(network, addr).await?;
        Ok(Box::new(stream))
    }
}
