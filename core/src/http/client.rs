use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, ClientBuilder, Method, Proxy};

use super::{BodyType, HttpRequest, Response, Transport};
use crate::error::TransportError;

/// reqwest-backed transport. Every exchange gets the next response id; GETs
/// sent with `use_cache` are answered from memory on repeat.
pub struct HttpClient {
    inner: Client,
    user_agents: Vec<&'static str>,
    default_headers: HeaderMap,
    next_id: AtomicU64,
    cache: Mutex<HashMap<String, Response>>,
}

impl HttpClient {
    pub fn new(
        timeout_seconds: u64,
        proxy_url: Option<&str>,
        custom_headers: &[(String, String)],
    ) -> anyhow::Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(Duration::from_secs(timeout_seconds))
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = proxy_url {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        let inner = builder.build()?;

        let mut default_headers = HeaderMap::new();
        for (key, val) in custom_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(val),
            ) {
                default_headers.insert(name, value);
            }
        }

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
             Gecko/20100101 Firefox/120.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
        ];

        Ok(Self {
            inner,
            user_agents,
            default_headers,
            next_id: AtomicU64::new(1),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn random_user_agent(&self) -> &'static str {
        let mut rng = rand::rng();
        *self.user_agents.choose(&mut rng).unwrap_or(&"Mozilla/5.0")
    }

    fn cached(&self, key: &str) -> Option<Response> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn store(&self, key: String, response: &Response) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, response.clone());
        }
    }

    async fn exchange(&self, req: &HttpRequest) -> Result<Response, TransportError> {
        let url = req.url.as_str();
        let mut builder = self.inner.request(req.method.clone(), url);

        for (name, value) in self.default_headers.iter() {
            builder = builder.header(name, value);
        }
        for (name, value) in req.headers.iter() {
            builder = builder.header(name, value);
        }
        if !req.headers.contains_key(reqwest::header::USER_AGENT) {
            builder = builder.header(reqwest::header::USER_AGENT, self.random_user_agent());
        }

        if !req.body.is_empty() {
            if !req.headers.contains_key(reqwest::header::CONTENT_TYPE) {
                let content_type = match req.body_type {
                    BodyType::Json => "application/json",
                    BodyType::FormUrlEncoded => "application/x-www-form-urlencoded",
                    BodyType::Multipart => "multipart/form-data",
                    BodyType::Raw | BodyType::None => "text/plain",
                };
                builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
            }
            builder = builder.body(req.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_lowercase(), v.to_str().ok()?.to_string())))
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        trace!("#{} {} {} -> {} ({} bytes)", id, req.method, url, status, bytes.len());

        Ok(Response {
            id,
            status,
            headers,
            size: bytes.len(),
            body,
            resource: req.resource(),
        })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: &HttpRequest, use_cache: bool) -> Result<Response, TransportError> {
        let cacheable = use_cache && request.method == Method::GET;
        let key = request.url.as_str().to_string();
        if cacheable {
            if let Some(hit) = self.cached(&key) {
                return Ok(hit);
            }
        }
        let response = self.exchange(request).await?;
        if cacheable {
            self.store(key, &response);
        }
        Ok(response)
    }
}
