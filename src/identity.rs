use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::cookie::Jar;
use reqwest::Client;
use serde::Deserialize;

use crate::{Error, Result};

/// How a request reaches the search endpoint.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// `host:port` of an HTTP proxy, `None` for direct egress.
    pub proxy: Option<String>,
    /// Session cookies handed out by the search endpoint. Expiry, domain and
    /// path are honoured by the jar; it lives and dies with this identity.
    cookies: Arc<Jar>,
}

impl Identity {
    pub fn direct() -> Self {
        Identity::default()
    }

    pub fn via_proxy(proxy: impl Into<String>) -> Self {
        Identity {
            proxy: Some(proxy.into()),
            cookies: Arc::default(),
        }
    }

    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.cookies
    }
}

/// The identity a caller carries from one query to the next.
///
/// Empty until the first attempt acquires one. The executor drops it after any
/// failed attempt so the next attempt starts from a fresh identity.
#[derive(Debug, Clone, Default)]
pub struct IdentityState {
    pub identity: Option<Identity>,
}

/// Source of fresh identities. Every call may hit the network, there is no caching.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn acquire(&self) -> Result<Identity>;
}

/// Always hands out direct egress.
pub struct DirectIdentity;

#[async_trait]
impl IdentityProvider for DirectIdentity {
    async fn acquire(&self) -> Result<Identity> {
        Ok(Identity::direct())
    }
}

#[derive(Debug, Deserialize)]
struct RotatorPayload {
    proxy: String,
}

/// Asks a proxy rotation service for a new egress address on every call.
/// The service answers `{"proxy": "host:port", ...}`.
pub struct RotatorIdentity {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl RotatorIdentity {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(RotatorIdentity {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl IdentityProvider for RotatorIdentity {
    async fn acquire(&self) -> Result<Identity> {
        let mut req = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            req = req.query(&[("apiKey", key)]);
        }

        let res = req
            .send()
            .await
            .map_err(|e| Error::IdentityUnavailable(e.to_string()))?;
        if !res.status().is_success() {
            return Err(Error::IdentityUnavailable(format!(
                "rotator answered with HTTP status {}",
                res.status()
            )));
        }
        let payload: RotatorPayload = res
            .json()
            .await
            .map_err(|e| Error::IdentityUnavailable(format!("malformed rotator payload: {e}")))?;

        if payload.proxy.trim().is_empty() {
            return Err(Error::IdentityUnavailable("rotator returned an empty proxy".into()));
        }
        debug!("acquired proxy {}", payload.proxy);
        Ok(Identity::via_proxy(payload.proxy.trim()))
    }
}
