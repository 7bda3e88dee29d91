//! In-process transport for tests: a rule table from request path to reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};
use rand::Rng;

use crate::error::TransportError;
use crate::http::{HttpRequest, Response, Transport};

#[derive(Clone)]
enum Body {
    Static(String),
    /// `{path}` is replaced with the request path
    Echo(String),
    /// unrelated random text on every request
    Random,
}

#[derive(Clone)]
enum Reply {
    Page { status: u16, body: Body },
    Fail,
}

enum When {
    Path(String),
    Prefix(String),
    QueryContains(String),
}

impl When {
    fn matches(&self, request: &HttpRequest) -> bool {
        match self {
            When::Path(p) => request.url.path() == p,
            When::Prefix(p) => request.url.path().starts_with(p.as_str()),
            When::QueryContains(needle) => request
                .url
                .query_pairs()
                .any(|(_, v)| v.contains(needle.as_str())),
        }
    }
}

pub(crate) struct MockTransport {
    rules: Vec<(When, Reply)>,
    fallback: Reply,
    latency_ms: u64,
    next_id: AtomicU64,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Unknown paths answer a plain 404.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: Reply::Page {
                status: 404,
                body: Body::Static("<html><body>404 Not Found</body></html>".to_string()),
            },
            latency_ms: 0,
            next_id: AtomicU64::new(1),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    fn rule(mut self, when: When, reply: Reply) -> Self {
        self.rules.push((when, reply));
        self
    }

    pub fn page(self, path: &str, status: u16, body: &str) -> Self {
        let reply = Reply::Page { status, body: Body::Static(body.to_string()) };
        self.rule(When::Path(path.to_string()), reply)
    }

    pub fn prefix(self, prefix: &str, status: u16, body: &str) -> Self {
        let reply = Reply::Page { status, body: Body::Static(body.to_string()) };
        self.rule(When::Prefix(prefix.to_string()), reply)
    }

    pub fn query_contains(self, needle: &str, status: u16, body: &str) -> Self {
        let reply = Reply::Page { status, body: Body::Static(body.to_string()) };
        self.rule(When::QueryContains(needle.to_string()), reply)
    }

    pub fn fail(self, path: &str) -> Self {
        self.rule(When::Path(path.to_string()), Reply::Fail)
    }

    pub fn fallback(mut self, status: u16, body: &str) -> Self {
        self.fallback = Reply::Page { status, body: Body::Static(body.to_string()) };
        self
    }

    pub fn echo_fallback(mut self, status: u16, template: &str) -> Self {
        self.fallback = Reply::Page { status, body: Body::Echo(template.to_string()) };
        self
    }

    pub fn random_fallback(mut self, status: u16) -> Self {
        self.fallback = Reply::Page { status, body: Body::Random };
        self
    }

    pub fn failing_fallback(mut self) -> Self {
        self.fallback = Reply::Fail;
        self
    }

    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count_path(&self, path: &str) -> usize {
        self.requested_paths().iter().filter(|p| p.as_str() == path).count()
    }

    fn reply_for(&self, request: &HttpRequest) -> Reply {
        self.rules
            .iter()
            .find(|(when, _)| when.matches(request))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest, _use_cache: bool) -> Result<Response, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(request.url.path().to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.reply_for(request) {
            Reply::Fail => Err(TransportError::Request {
                url: request.url.to_string(),
                message: "connection reset".to_string(),
            }),
            Reply::Page { status, body } => {
                let body = match body {
                    Body::Static(text) => text,
                    Body::Echo(template) => template.replace("{path}", request.url.path()),
                    Body::Random => {
                        let mut rng = rand::rng();
                        let len = rng.random_range(200..2000);
                        Alphanumeric.sample_string(&mut rng, len)
                    }
                };
                Ok(Response {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    status,
                    headers: HashMap::new(),
                    size: body.len(),
                    body,
                    resource: request.resource(),
                })
            }
        }
    }
}
