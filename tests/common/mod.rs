#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use occurrences::config::FailurePolicy;
use occurrences::identity::{Identity, IdentityProvider};
use occurrences::parse::ResultCountExtractor;
use occurrences::process::Crawler;
use occurrences::request::{QueryExecutor, SearchRequest, SearchResponse, Transport};
use occurrences::retry::RetryPolicy;
use occurrences::{Error, Result};
use reqwest::cookie::CookieStore;
use reqwest::Url;

pub const ENDPOINT: &str = "https://scholar.example/scholar";

type Respond = dyn Fn(&SearchRequest, usize) -> Result<SearchResponse> + Send + Sync;

/// What the endpoint saw for one request.
#[derive(Debug, Clone)]
pub struct Call {
    pub request: SearchRequest,
    pub proxy: Option<String>,
    pub cookie: Option<String>,
}

/// Answers from a closure given the request and the call index, and remembers every call.
pub struct StubTransport {
    calls: Mutex<Vec<Call>>,
    respond: Box<Respond>,
    /// `Set-Cookie` values handed out with the answer for a year.
    set_cookies: Vec<(i32, String)>,
}

impl StubTransport {
    pub fn new(
        respond: impl Fn(&SearchRequest, usize) -> Result<SearchResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_cookies(respond, Vec::new())
    }

    pub fn with_cookies(
        respond: impl Fn(&SearchRequest, usize) -> Result<SearchResponse> + Send + Sync + 'static,
        set_cookies: Vec<(i32, &str)>,
    ) -> Arc<Self> {
        Arc::new(StubTransport {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
            set_cookies: set_cookies
                .into_iter()
                .map(|(year, c)| (year, c.to_string()))
                .collect(),
        })
    }

    /// Every year counts `year - 1900` results.
    pub fn counting() -> Arc<Self> {
        Self::new(|req, _| Ok(page((req.start_year - 1900) as u64)))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn years_requested(&self) -> Vec<i32> {
        self.calls().iter().map(|c| c.request.start_year).collect()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: &SearchRequest, identity: &Identity) -> Result<SearchResponse> {
        let url = Url::parse(&request.endpoint).unwrap();
        let cookie = identity
            .cookie_jar()
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(String::from));
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                request: request.clone(),
                proxy: identity.proxy.clone(),
                cookie,
            });
            calls.len() - 1
        };

        let res = (self.respond)(request, index)?;
        for (_, set_cookie) in self.set_cookies.iter().filter(|(y, _)| *y == request.start_year) {
            identity.cookie_jar().add_cookie_str(set_cookie, &url);
        }
        Ok(res)
    }
}

/// Hands out `proxy-1`, `proxy-2`, ... and counts how often it was asked.
#[derive(Default)]
pub struct StubIdentities {
    acquired: AtomicUsize,
    fail_first: usize,
}

impl StubIdentities {
    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(StubIdentities {
            acquired: AtomicUsize::new(0),
            fail_first: n,
        })
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for StubIdentities {
    async fn acquire(&self) -> Result<Identity> {
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(Error::IdentityUnavailable("rotator down".into()));
        }
        Ok(Identity::via_proxy(format!("proxy-{n}")))
    }
}

pub fn page(count: u64) -> SearchResponse {
    SearchResponse {
        status: 200,
        body: format!(
            "<html><body><div id=\"gs_ab_md\"><div class=\"gs_ab_mdw\">\
             About {count} results (<b>0.04</b> sec)</div></div></body></html>"
        ),
    }
}

pub fn blocked_page() -> SearchResponse {
    SearchResponse {
        status: 200,
        body: "<html><body><div id=\"gs_captcha_ccl\">Please show you're not a robot</div>\
               </body></html>"
            .into(),
    }
}

pub fn status(code: u16) -> SearchResponse {
    SearchResponse {
        status: code,
        ..SearchResponse::default()
    }
}

pub fn policy(max_total_secs: u64) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(500),
        multiplier: 2.0,
        jitter: 1.0,
        max_total_time: Duration::from_secs(max_total_secs),
    }
}

pub fn executor(
    transport: Arc<StubTransport>,
    identities: Arc<StubIdentities>,
    retry: RetryPolicy,
) -> QueryExecutor {
    QueryExecutor::new(
        ENDPOINT,
        transport,
        identities,
        Arc::new(ResultCountExtractor::new().unwrap()),
        retry,
    )
}

pub fn crawler(executor: QueryExecutor, on_failure: FailurePolicy) -> Crawler {
    Crawler::new(executor, Duration::from_secs(2), on_failure).with_progress_bar(false)
}
