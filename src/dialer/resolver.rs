use super::Resolver;
use crate::error::{DialError, DialResult};
use async_trait::async_trait;

/// Performs no client-side resolution: the name is handed back untouched so
/// the tunnel endpoint resolves it remotely.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyResolver;

#[async_trait]
impl Resolver for DummyResolver {
    async fn lookup_host(&self, host: &str) -> DialResult<Vec<String>> {
        Ok(vec![host.to_string()])
    }
}

/// Resolves through the operating system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_host(&self, host: &str) -> DialResult<Vec<String>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| DialError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let mut ips: Vec<String> = Vec::new();
        for addr in addrs {
            let ip = addr.ip().to_string();
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
        Ok(ips)
    }
}
