//! Per-worker HTTP client cache.
//!
//! One live client is kept per (target authority, proxy) combination.
//! The pool is owned by its worker's execution context and passed in
//! explicitly, so thread confinement is visible in the signatures instead
//! of hiding behind thread-local storage. A client's connection pool may
//! still reuse sockets across the requests issued by that worker.
//!
//! As a load-testing tool the pool deliberately relaxes TLS trust by
//! default (`skip_tls_verify`): certificate errors on a test bench are
//! noise, not signal.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while acquiring a client.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to build HTTP client for {target}: {source}")]
    Build {
        target: String,
        source: reqwest::Error,
    },
}

/// Proxy endpoint plus credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

/// Cache key: everything that goes into constructing a client.
///
/// Equality ignores the proxy fields when `has_proxy` is false, so stale
/// proxy values left over in configuration cannot split the cache. The
/// manual `Hash` below covers exactly the fields equality uses.
#[derive(Debug, Clone, Eq)]
pub struct HttpClientKey {
    /// scheme://host[:port]; scheme included so http://server never
    /// matches https://server
    target: String,
    has_proxy: bool,
    proxy_host: String,
    proxy_port: u16,
    proxy_user: String,
    proxy_pass: String,
}

impl HttpClientKey {
    pub fn new(url: &Url, proxy: Option<&ProxySettings>) -> Self {
        let mut target = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            target.push_str(&format!(":{}", port));
        }

        match proxy {
            Some(p) => Self {
                target,
                has_proxy: true,
                proxy_host: p.host.clone(),
                proxy_port: p.port,
                proxy_user: p.user.clone(),
                proxy_pass: p.pass.clone(),
            },
            None => Self {
                target,
                has_proxy: false,
                proxy_host: String::new(),
                proxy_port: 0,
                proxy_user: String::new(),
                proxy_pass: String::new(),
            },
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl PartialEq for HttpClientKey {
    fn eq(&self, other: &Self) -> bool {
        if self.has_proxy != other.has_proxy {
            return false;
        }
        if self.has_proxy
            && (self.proxy_host != other.proxy_host
                || self.proxy_port != other.proxy_port
                || self.proxy_user != other.proxy_user
                || self.proxy_pass != other.proxy_pass)
        {
            return false;
        }
        // No proxy: proxy fields are ignored even if stale.
        self.target == other.target
    }
}

impl Hash for HttpClientKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.has_proxy.hash(state);
        if self.has_proxy {
            self.proxy_host.hash(state);
            self.proxy_port.hash(state);
            self.proxy_user.hash(state);
            self.proxy_pass.hash(state);
        }
        self.target.hash(state);
    }
}

impl fmt::Display for HttpClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)?;
        if self.has_proxy {
            write!(
                f,
                " via {}@{}:{}",
                self.proxy_user, self.proxy_host, self.proxy_port
            )?;
        }
        Ok(())
    }
}

/// Shared one-shot signal that the TLS trust context changed.
///
/// Cloned handles observe the same flag. Observing is an atomic exchange:
/// several worker pools may each take the signal and rebuild their own
/// cached clients, which is a benign race costing at worst a redundant
/// rebuild.
#[derive(Clone, Default)]
pub struct TlsResetSignal {
    flag: Arc<AtomicBool>,
}

impl TlsResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the trust context as changed.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Consume the signal; true at most once per trigger per handle set.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

/// Credentials for a specific target URL, supplied by the delegated auth
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Delegated auth collaborator: maps target URLs to credentials.
///
/// Authentication protocol details stay behind this seam.
pub trait AuthProvider: Send + Sync {
    fn credentials_for(&self, url: &Url) -> Option<Credentials>;
}

/// Settings applied to every client the pool constructs.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Accept any certificate/host. On by default: a testing-tool
    /// relaxation, not suitable outside a test bench.
    pub skip_tls_verify: bool,

    /// DNS override: resolve this hostname to a fixed address instead of
    /// using the system resolver
    pub resolve_override: Option<(String, SocketAddr)>,

    /// Idle keepalive applied when the server sends no explicit
    /// keepalive duration
    pub idle_keepalive: Option<Duration>,

    /// Bounded transport retry count; 0 disables retries
    pub retry_count: u32,

    pub connect_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,

    /// Global proxy, used unless the caller passes a per-target override
    pub static_proxy: Option<ProxySettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            skip_tls_verify: true,
            resolve_override: None,
            idle_keepalive: None,
            retry_count: 0,
            connect_timeout: None,
            response_timeout: None,
            static_proxy: None,
        }
    }
}

impl ClientSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self
    }

    pub fn with_resolve_override(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.resolve_override = Some((host.into(), addr));
        self
    }

    pub fn with_idle_keepalive(mut self, keepalive: Duration) -> Self {
        self.idle_keepalive = Some(keepalive);
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn with_timeouts(
        mut self,
        connect: Option<Duration>,
        response: Option<Duration>,
    ) -> Self {
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }

    pub fn with_static_proxy(mut self, proxy: ProxySettings) -> Self {
        self.static_proxy = Some(proxy);
        self
    }
}

/// A client handed out by the pool, plus the per-call credentials for the
/// target URL.
pub struct AcquiredClient {
    pub client: reqwest::Client,
    /// Recomputed on every acquisition, independent of client caching
    pub authorization: Option<Credentials>,
}

/// Cache of live HTTP clients for one worker.
pub struct HttpClientPool {
    settings: ClientSettings,
    tls_reset: TlsResetSignal,
    auth: Option<Arc<dyn AuthProvider>>,
    clients: HashMap<HttpClientKey, reqwest::Client>,
    clients_built: usize,
}

impl HttpClientPool {
    pub fn new(settings: ClientSettings, tls_reset: TlsResetSignal) -> Self {
        Self {
            settings,
            tls_reset,
            auth: None,
            clients: HashMap::new(),
            clients_built: 0,
        }
    }

    pub fn with_auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Number of live cached clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Total clients constructed over this pool's lifetime; grows past
    /// `len()` when invalidation forces rebuilds.
    pub fn clients_built(&self) -> usize {
        self.clients_built
    }

    /// Get or create the client for `url`.
    ///
    /// A dynamic per-target proxy takes precedence over the static one
    /// from the settings. Authorization credentials for the URL are
    /// recomputed on every call regardless of whether the client itself
    /// was cached.
    pub fn acquire(
        &mut self,
        url: &Url,
        dynamic_proxy: Option<&ProxySettings>,
    ) -> Result<AcquiredClient, PoolError> {
        let proxy = dynamic_proxy.or(self.settings.static_proxy.as_ref());
        let key = HttpClientKey::new(url, proxy);

        // TLS context reset only concerns encrypted targets. Dropping the
        // cached client closes its idle connections; a fresh one is built
        // below.
        if url.scheme() == "https" && self.tls_reset.take() {
            if self.clients.remove(&key).is_some() {
                info!(key = %key, "dropped cached client after TLS context reset");
            }
        }

        let client = match self.clients.entry(key) {
            Entry::Occupied(entry) => {
                debug!(key = %entry.key(), "reusing cached HTTP client");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let client = build_client(&self.settings, proxy).map_err(|source| {
                    PoolError::Build {
                        target: entry.key().target().to_string(),
                        source,
                    }
                })?;
                debug!(key = %entry.key(), "created new HTTP client");
                self.clients_built += 1;
                entry.insert(client).clone()
            }
        };

        let authorization = self.auth.as_ref().and_then(|a| a.credentials_for(url));

        Ok(AcquiredClient {
            client,
            authorization,
        })
    }
}

fn build_client(
    settings: &ClientSettings,
    proxy: Option<&ProxySettings>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();

    if settings.skip_tls_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some((host, addr)) = &settings.resolve_override {
        builder = builder.resolve(host, *addr);
    }

    if let Some(keepalive) = settings.idle_keepalive {
        builder = builder.pool_idle_timeout(keepalive);
    }

    if let Some(timeout) = settings.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = settings.response_timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(p) = proxy {
        let mut proxy_obj = reqwest::Proxy::all(format!("http://{}:{}", p.host, p.port))?;
        if !p.user.is_empty() {
            // Proxy credentials attach under the proxy's address scope.
            proxy_obj = proxy_obj.basic_auth(&p.user, &p.pass);
        }
        builder = builder.proxy(proxy_obj);
    }

    builder.build()
}
