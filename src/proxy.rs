//! Service proxy: a named, lazily-connected handle to a client of another
//! service, with exponential-backoff reconnect.

use std::{any::Any, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::warn;

use crate::error::Error;

/// Anything `ServiceProxy` can connect and hold. Implemented for
/// [`crate::client::Client`] directly; a typed client wrapping `Client` with
/// domain-specific methods (e.g. a generated `GreetClient`) implements it by
/// delegating.
#[async_trait]
pub trait ProxiedClient: Send + Sync + 'static {
    /// # Errors
    /// Propagates the transport connect failure.
    async fn connect(url: &str) -> Result<Self, Error>
    where
        Self: Sized;

    fn is_open(&self) -> bool;
}

/// Backoff schedule for [`ServiceProxy::get`]'s reconnect loop.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            multiplier: 1.5,
            max_attempts: 10,
        }
    }
}

/// A lazy, reconnecting handle to a client of another service.
pub struct ServiceProxy<C: ProxiedClient> {
    name: String,
    url: String,
    backoff: Backoff,
    cached: tokio::sync::Mutex<Option<Arc<C>>>,
}

impl<C: ProxiedClient> ServiceProxy<C> {
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_backoff(name, url, Backoff::default())
    }

    #[must_use]
    pub fn with_backoff(name: impl Into<String>, url: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            backoff,
            cached: tokio::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the cached client if it's still open, otherwise (re)connect,
    /// retrying with exponential backoff.
    ///
    /// # Errors
    /// [`Error::ProxyExhausted`] once `backoff.max_attempts` connect attempts
    /// have all failed.
    pub async fn get(&self) -> Result<Arc<C>, Error> {
        {
            let guard = self.cached.lock().await;
            if let Some(client) = guard.as_ref() {
                if client.is_open() {
                    return Ok(client.clone());
                }
            }
        }
        self.reconnect().await
    }

    async fn reconnect(&self) -> Result<Arc<C>, Error> {
        let mut delay = self.backoff.initial;
        for attempt in 1..=self.backoff.max_attempts {
            match C::connect(&self.url).await {
                Ok(client) => {
                    let client = Arc::new(client);
                    *self.cached.lock().await = Some(client.clone());
                    return Ok(client);
                }
                Err(e) => {
                    if attempt == self.backoff.max_attempts {
                        break;
                    }
                    warn!(
                        proxy = %self.name,
                        attempt,
                        max_attempts = self.backoff.max_attempts,
                        error = %e,
                        "service proxy connect attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.backoff.multiplier);
                }
            }
        }
        Err(Error::ProxyExhausted {
            name: self.name.clone(),
            client_type: std::any::type_name::<C>().to_string(),
        })
    }
}

/// A heterogeneous registry of named [`ServiceProxy`] handles, keyed by name
/// and checked for type identity at lookup time — a frontend holding a
/// `ServiceProxy<GreetClient>` and a `ServiceProxy<StatsClient>` under
/// different names can share one manager.
#[derive(Default)]
pub struct ServiceProxyManager {
    proxies: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceProxyManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<C: ProxiedClient>(&self, name: impl Into<String>, proxy: Arc<ServiceProxy<C>>) {
        self.proxies.insert(name.into(), proxy);
    }

    /// # Errors
    /// [`Error::UnknownProxy`] if nothing is registered under `name`;
    /// [`Error::ProxyTypeMismatch`] if it's registered as a different client
    /// type than `C`.
    pub fn get<C: ProxiedClient>(&self, name: &str) -> Result<Arc<ServiceProxy<C>>, Error> {
        let entry = self
            .proxies
            .get(name)
            .ok_or_else(|| Error::UnknownProxy(name.to_string()))?;
        Arc::clone(entry.value())
            .downcast::<ServiceProxy<C>>()
            .map_err(|_| Error::ProxyTypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<C>().to_string(),
            })
    }

    /// Remove the proxy registered under `name`, but only if it is
    /// (identity-)equal to `expected` — guards against racing with a
    /// concurrent `set` replacing it with a different instance.
    pub fn remove<C: ProxiedClient>(&self, name: &str, expected: &Arc<ServiceProxy<C>>) -> bool {
        if let Entry::Occupied(entry) = self.proxies.entry(name.to_string()) {
            if let Ok(existing) = Arc::clone(entry.get()).downcast::<ServiceProxy<C>>() {
                if Arc::ptr_eq(&existing, expected) {
                    entry.remove();
                    return true;
                }
            }
        }
        false
    }
}
