//! Routing between the proxy dialer and direct connections per target host.

use super::{BoxedStream, Dialer, DummyResolver, Network, Resolver, split_host_port};
use crate::error::DialResult;
use async_trait::async_trait;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// One entry of a bypass list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassRule {
    /// `*`
    All,
    /// `10.0.0.0/8`
    Network(IpNet),
    /// `192.0.2.1` or `[::1]`
    Ip(IpAddr),
    /// `.example.com` or `*.example.com`, stored with the leading dot
    Zone(String),
    /// `example.com`
    Host(String),
}

impl BypassRule {
    /// Parse a single entry; `None` for blank or malformed entries
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        if entry == "*" {
            return Some(BypassRule::All);
        }
        if entry.contains('/') {
            return match entry.parse::<IpNet>() {
                Ok(net) => Some(BypassRule::Network(net.trunc())),
                Err(e) => {
                    warn!(entry = %entry, error = %e, "Ignoring malformed bypass CIDR");
                    None
                }
            };
        }

        let unbracketed = entry
            .strip_prefix('[')
            .and_then(|e| e.strip_suffix(']'))
            .unwrap_or(entry);
        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Some(BypassRule::Ip(ip));
        }

        let name = normalize(entry);
        let name = name.strip_prefix('*').map(str::to_string).unwrap_or(name);
        if name.starts_with('.') {
            if name.len() == 1 {
                return None;
            }
            Some(BypassRule::Zone(name))
        } else {
            Some(BypassRule::Host(name))
        }
    }

    fn matches_name(&self, host: &str) -> bool {
        match self {
            BypassRule::All => true,
            BypassRule::Zone(zone) => host.ends_with(zone.as_str()) || host == &zone[1..],
            BypassRule::Host(name) => host == name,
            BypassRule::Network(_) | BypassRule::Ip(_) => false,
        }
    }

    fn matches_ip(&self, ip: &IpAddr) -> bool {
        match self {
            BypassRule::All => true,
            BypassRule::Network(net) => net.contains(ip),
            BypassRule::Ip(rule) => rule == ip,
            BypassRule::Zone(_) | BypassRule::Host(_) => false,
        }
    }
}

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Ordered set of bypass rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassList {
    rules: Vec<BypassRule>,
}

impl BypassList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma or whitespace separated list, skipping bad entries
    pub fn parse(list: &str) -> Self {
        let mut bypass = Self::new();
        bypass.add_from_string(list);
        bypass
    }

    pub fn add_from_string(&mut self, list: &str) {
        self.rules.extend(
            list.split(|c: char| c == ',' || c.is_whitespace())
                .filter_map(BypassRule::parse),
        );
    }

    pub fn push(&mut self, rule: BypassRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[BypassRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether the list contains `*`
    pub fn bypasses_all(&self) -> bool {
        self.rules.contains(&BypassRule::All)
    }

    fn has_ip_rules(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r, BypassRule::Network(_) | BypassRule::Ip(_)))
    }

    /// Match a host name or literal IP
    pub fn matches_host(&self, host: &str) -> bool {
        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return self.matches_ip(&ip);
        }
        let host = normalize(host);
        self.rules.iter().any(|r| r.matches_name(&host))
    }

    pub fn matches_ip(&self, ip: &IpAddr) -> bool {
        self.rules.iter().any(|r| r.matches_ip(ip))
    }
}

/// Sends bypassed hosts to one dialer and everything else to another
#[derive(Debug)]
pub struct PerHost {
    default: Arc<dyn Dialer>,
    bypass: Arc<dyn Dialer>,
    rules: BypassList,
    resolver: Arc<dyn Resolver>,
}

impl PerHost {
    /// `default` handles unmatched hosts, `bypass` the matched ones
    pub fn new(default: Arc<dyn Dialer>, bypass: Arc<dyn Dialer>) -> Self {
        Self {
            default,
            bypass,
            rules: BypassList::new(),
            resolver: Arc::new(DummyResolver),
        }
    }

    pub fn with_rules(mut self, rules: BypassList) -> Self {
        self.rules = rules;
        self
    }

    /// Resolve names so CIDR and IP rules can match them
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn add_from_string(&mut self, list: &str) {
        self.rules.add_from_string(list);
    }

    pub fn rules(&self) -> &BypassList {
        &self.rules
    }

    /// Whether `host` is routed around the default dialer
    pub async fn bypasses(&self, host: &str) -> bool {
        if self.rules.matches_host(host) {
            return true;
        }
        if host.parse::<IpAddr>().is_ok() || !self.rules.has_ip_rules() {
            return false;
        }

        match self.resolver.lookup_host(host).await {
            Ok(addrs) => addrs
                .iter()
                .filter_map(|a| a.parse::<IpAddr>().ok())
                .any(|ip| self.rules.matches_ip(&ip)),
            Err(e) => {
                debug!(host = %host, error = %e, "Bypass lookup failed, using default route");
                false
            }
        }
    }

    /// Dialer chosen for `host`
    pub async fn dialer_for(&self, host: &str) -> &Arc<dyn Dialer> {
        if self.bypasses(host).await {
            &self.bypass
        } else {
            &self.default
        }
    }
}

#[async_trait]
impl Dialer for PerHost {
    async fn dial(&self, network: Network, addr: &str) -> DialResult<BoxedStream> {
        let (host, _) = split_host_port(addr)?;
        let bypass = self.bypasses(&host).await;
        debug!(target = %addr, bypass, "Per-host route selected");
        if bypass {
            self.bypass.dial(network, addr).await
        } else {
            self.default.dial(network, addr).await
        }
    }
}
