//! Proxy URL schemes and the process-wide dialer policy.
//!
//! Built-in schemes are dispatched by [`BuiltinScheme`]. Anything else is
//! looked up in a [`SchemeRegistry`]; the global one accepts registrations
//! until it is first read, then freezes for the life of the process.

use super::h2::https_h2;
use super::http::{http1, https};
use super::socks::{socks4, socks5};
use super::ssh::ssh;
use super::{
    BypassList, Dialer, Direct, DummyResolver, Network, PerHost, ProxyAuth, SystemResolver,
    join_host_port,
};
use crate::error::{DialError, DialResult, RegistryError};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};
use url::Url;

/// Variables holding the proxy URL, in lookup order
pub const PROXY_ENV_VARS: [&str; 4] = ["ALL_PROXY", "all_proxy", "PROXY", "proxy"];

/// Variables holding the bypass list, in lookup order
pub const NO_PROXY_ENV_VARS: [&str; 2] = ["NO_PROXY", "no_proxy"];

/// Builds a dialer for a proxy URL, tunneling over `forward`
pub type DialerFactory =
    Arc<dyn Fn(&Url, Arc<dyn Dialer>) -> DialResult<Arc<dyn Dialer>> + Send + Sync>;

/// Schemes handled without consulting a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinScheme {
    Socks5,
    Socks4,
    Socks4a,
    Http,
    Https,
    HttpsH2,
    Ssh,
}

impl BuiltinScheme {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "socks" | "socks5" => Some(Self::Socks5),
            "socks4" => Some(Self::Socks4),
            "socks4a" => Some(Self::Socks4a),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "https+h2" => Some(Self::HttpsH2),
            "ssh" | "ssh2" => Some(Self::Ssh),
            _ => None,
        }
    }

    /// Port assumed when the proxy URL has none
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Socks5 | Self::Socks4 | Self::Socks4a => 1080,
            Self::Http => 80,
            Self::Https | Self::HttpsH2 => 443,
            Self::Ssh => 22,
        }
    }

    fn build(
        &self,
        proxy: &str,
        auth: Option<ProxyAuth>,
        forward: Arc<dyn Dialer>,
    ) -> DialResult<Arc<dyn Dialer>> {
        let network = Network::Tcp;
        match self {
            Self::Socks5 => socks5(network, proxy, auth, forward, Arc::new(DummyResolver)),
            Self::Socks4 => socks4(network, proxy, auth, false, forward, Arc::new(SystemResolver)),
            Self::Socks4a => socks4(network, proxy, auth, true, forward, Arc::new(DummyResolver)),
            Self::Http => http1(network, proxy, auth, forward),
            Self::Https => https(network, proxy, auth, forward),
            Self::HttpsH2 => https_h2(network, proxy, auth, forward),
            Self::Ssh => Ok(Arc::new(ssh(network, proxy, auth)?)),
        }
    }
}

/// Factories for schemes outside the built-in set
#[derive(Clone, Default)]
pub struct SchemeRegistry {
    factories: HashMap<String, DialerFactory>,
}

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the factory for `scheme`.
    ///
    /// Built-in schemes are dispatched before the registry, so registering
    /// one of them has no effect on [`from_url_with`].
    pub fn register(&mut self, scheme: &str, factory: DialerFactory) {
        let scheme = scheme.to_ascii_lowercase();
        if BuiltinScheme::from_scheme(&scheme).is_some() {
            warn!(scheme = %scheme, "Registered scheme is shadowed by a built-in dialer");
        }
        self.factories.insert(scheme, factory);
    }

    pub fn get(&self, scheme: &str) -> Option<&DialerFactory> {
        self.factories.get(&scheme.to_ascii_lowercase())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.get(scheme).is_some()
    }

    /// Registered scheme names, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

static PENDING: Mutex<Option<SchemeRegistry>> = Mutex::new(None);
static FROZEN: OnceLock<SchemeRegistry> = OnceLock::new();

/// Register a scheme in the global registry.
///
/// Fails once the registry has been read, which happens the first time a
/// dialer is resolved.
pub fn register_scheme(scheme: &str, factory: DialerFactory) -> Result<(), RegistryError> {
    let mut pending = PENDING.lock().unwrap_or_else(|e| e.into_inner());
    if FROZEN.get().is_some() {
        return Err(RegistryError::Frozen {
            scheme: scheme.to_string(),
        });
    }
    pending
        .get_or_insert_with(SchemeRegistry::new)
        .register(scheme, factory);
    debug!(scheme = %scheme, "Registered proxy scheme");
    Ok(())
}

/// The global registry; freezes it on first call
pub fn global_registry() -> &'static SchemeRegistry {
    if let Some(registry) = FROZEN.get() {
        return registry;
    }
    let mut pending = PENDING.lock().unwrap_or_else(|e| e.into_inner());
    FROZEN.get_or_init(|| pending.take().unwrap_or_default())
}

/// Whether [`register_scheme`] still accepts registrations
pub fn is_frozen() -> bool {
    FROZEN.get().is_some()
}

/// Build the dialer for `url` using the global registry
pub fn from_url(url: &Url, forward: Arc<dyn Dialer>) -> DialResult<Arc<dyn Dialer>> {
    from_url_with(url, forward, global_registry())
}

/// Build the dialer for `url`, falling back to `registry` for unknown schemes
pub fn from_url_with(
    url: &Url,
    forward: Arc<dyn Dialer>,
    registry: &SchemeRegistry,
) -> DialResult<Arc<dyn Dialer>> {
    let scheme = url.scheme().to_ascii_lowercase();
    let Some(builtin) = BuiltinScheme::from_scheme(&scheme) else {
        return match registry.get(&scheme) {
            Some(factory) => factory(url, forward),
            None => Err(DialError::UnknownScheme(scheme)),
        };
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| DialError::InvalidProxyUrl(format!("{} has no host", redact_url(url))))?;
    let port = url.port().unwrap_or_else(|| builtin.default_port());
    let proxy = join_host_port(host, port);

    builtin.build(&proxy, ProxyAuth::from_url(url), forward)
}

/// `url` with any password masked, for logs
pub fn redact_url(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut redacted = url.clone();
    // Only fails for URLs that cannot carry credentials, which this one does
    let _ = redacted.set_password(Some("redacted"));
    redacted.to_string()
}

/// Dialer for this process, from the proxy environment variables
pub fn resolve_from_environment() -> Arc<dyn Dialer> {
    from_lookup(|key| std::env::var(key).ok())
}

/// [`resolve_from_environment`] over an arbitrary variable lookup
pub fn from_lookup<F>(lookup: F) -> Arc<dyn Dialer>
where
    F: Fn(&str) -> Option<String>,
{
    from_lookup_with(lookup, global_registry())
}

/// Resolve the proxy policy; never fails, degrading to [`Direct`] instead
pub fn from_lookup_with<F>(lookup: F, registry: &SchemeRegistry) -> Arc<dyn Dialer>
where
    F: Fn(&str) -> Option<String>,
{
    let direct: Arc<dyn Dialer> = Arc::new(Direct);

    let Some((var, raw)) = first_non_empty(&lookup, &PROXY_ENV_VARS) else {
        debug!("No proxy configured, dialing directly");
        return direct;
    };

    let url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(e) => {
            warn!(variable = var, error = %e, "Ignoring unparsable proxy URL, dialing directly");
            return direct;
        }
    };

    let proxy = match from_url_with(&url, direct.clone(), registry) {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!(
                variable = var,
                proxy = %redact_url(&url),
                error = %e,
                "Ignoring unusable proxy, dialing directly"
            );
            return direct;
        }
    };
    info!(proxy = %redact_url(&url), "Using proxy from {}", var);

    let Some((_, list)) = first_non_empty(&lookup, &NO_PROXY_ENV_VARS) else {
        return proxy;
    };
    let rules = BypassList::parse(&list);
    if rules.is_empty() {
        return proxy;
    }
    if rules.bypasses_all() {
        info!("Bypass list contains '*', proxy disabled");
    }
    Arc::new(PerHost::new(proxy, direct).with_rules(rules))
}

fn first_non_empty<F>(lookup: &F, vars: &[&'static str]) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    vars.iter().find_map(|&var| {
        lookup(var)
            .filter(|value| !value.trim().is_empty())
            .map(|value| (var, value))
    })
}
