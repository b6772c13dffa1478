use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Proxy};

use crate::cell::Cell;
use crate::identity::{Identity, IdentityProvider, IdentityState};
use crate::parse::{extract_blocking, Extract};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://scholar.google.com/scholar";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A search for one term within a year range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub endpoint: String,
    pub term: String,
    pub start_year: i32,
    pub end_year: i32,
}

impl SearchRequest {
    pub fn new(
        endpoint: impl Into<String>,
        term: impl Into<String>,
        start_year: i32,
        end_year: i32,
    ) -> Self {
        SearchRequest {
            endpoint: endpoint.into(),
            term: term.into(),
            start_year,
            end_year,
        }
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("as_sdt", "1,5".to_string()),
            ("q", self.term.clone()),
            ("as_ylo", self.start_year.to_string()),
            ("as_yhi", self.end_year.to_string()),
            ("as_vis", "1".to_string()),
            ("hl", "en".to_string()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub status: u16,
    pub body: String,
}

/// Sends a search request on behalf of an identity. Cookies go through the
/// identity's jar: sent from it, and whatever the endpoint sets stored back in it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &SearchRequest, identity: &Identity) -> Result<SearchResponse>;
}

/// Proxy credentials, sent as basic auth to every proxy.
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// `reqwest` backed transport. Every identity gets its own `Client`, wired to the
/// identity's proxy and cookie jar.
pub struct HttpTransport {
    timeout: Duration,
    proxy_auth: Option<ProxyAuth>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, proxy_auth: Option<ProxyAuth>) -> Self {
        HttpTransport {
            timeout,
            proxy_auth,
        }
    }

    fn client_for(&self, identity: &Identity) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        let builder = Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .cookie_provider(identity.cookie_jar().clone());

        let Some(proxy) = &identity.proxy else {
            // Direct egress ignores any proxy set in the environment.
            return Ok(builder.no_proxy().build()?);
        };
        let mut proxy = Proxy::all(format!("http://{proxy}"))?;
        if let Some(auth) = &self.proxy_auth {
            proxy = proxy.basic_auth(&auth.username, &auth.password);
        }
        Ok(builder.proxy(proxy).build()?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &SearchRequest, identity: &Identity) -> Result<SearchResponse> {
        let res = self
            .client_for(identity)?
            .get(&request.endpoint)
            .query(&request.query_params())
            .send()
            .await?;
        let status = res.status().as_u16();
        let body = res.text().await?;
        Ok(SearchResponse { status, body })
    }
}

/// Issues one search per call, retrying any failure within the retry policy's budget.
#[derive(Clone)]
pub struct QueryExecutor {
    endpoint: String,
    transport: Arc<dyn Transport>,
    identities: Arc<dyn IdentityProvider>,
    extractor: Arc<dyn Extract>,
    retry: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        identities: Arc<dyn IdentityProvider>,
        extractor: Arc<dyn Extract>,
        retry: RetryPolicy,
    ) -> Self {
        QueryExecutor {
            endpoint: endpoint.into(),
            transport,
            identities,
            extractor,
            retry,
        }
    }

    /// Result count for `term` between `start_year` and `end_year`, both inclusive.
    ///
    /// The identity in `state` is used for the first attempt; any failed attempt
    /// throws its identity away and the next attempt acquires a fresh one. The
    /// returned state carries the identity that succeeded, cookie jar included.
    pub async fn query(
        &self,
        term: &str,
        start_year: i32,
        end_year: i32,
        mut state: IdentityState,
    ) -> Result<(u64, IdentityState)> {
        let request = SearchRequest::new(self.endpoint.as_str(), term, start_year, end_year);
        let label = format!("'{term}' {start_year}-{end_year}");
        let mut carried = state.identity.take();

        let (count, identity) = self
            .retry
            .run(&label, |_| {
                let identity = carried.take();
                self.attempt(&request, identity)
            })
            .await?;

        state.identity = Some(identity);
        Ok((count, state))
    }

    /// Count for a single cell.
    pub async fn query_cell(
        &self,
        cell: &Cell,
        state: IdentityState,
    ) -> Result<(u64, IdentityState)> {
        self.query(&cell.term, cell.year, cell.year, state).await
    }

    async fn attempt(
        &self,
        request: &SearchRequest,
        identity: Option<Identity>,
    ) -> Result<(u64, Identity)> {
        let identity = match identity {
            Some(identity) => identity,
            None => self.identities.acquire().await?,
        };

        let res = self.transport.send(request, &identity).await?;
        if !(200..300).contains(&res.status) {
            return Err(Error::HttpStatus(res.status));
        }

        let count = extract_blocking(self.extractor.clone(), res.body).await?;
        debug!(
            "'{}' {}-{}: {count}",
            request.term, request.start_year, request.end_year
        );
        Ok((count, identity))
    }
}
