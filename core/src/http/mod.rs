pub mod client;

pub use client::HttpClient;

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;

/// Represents the type of body content in an HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyType {
    Json,
    FormUrlEncoded,
    Multipart,
    Raw,
    None,
}

impl BodyType {
    /// Detects the body type from the Content-Type header.
    pub fn detect_body_type(headers: &HeaderMap) -> BodyType {
        let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
            return BodyType::None;
        };
        let value = value.to_lowercase();
        if value.contains("application/json") {
            BodyType::Json
        } else if value.contains("application/x-www-form-urlencoded") {
            BodyType::FormUrlEncoded
        } else if value.contains("multipart/form-data") {
            BodyType::Multipart
        } else {
            BodyType::Raw
        }
    }
}

/// A request as the engine sees it. Probes derive new requests from a shared
/// base and never write back into it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
    pub body_type: BodyType,
}

impl HttpRequest {
    /// Creates a new `HttpRequest`, auto-detecting the body type from headers.
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: String) -> Self {
        let body_type = BodyType::detect_body_type(&headers);
        Self {
            method,
            url,
            headers,
            body,
            body_type,
        }
    }

    /// Plain GET with no headers and no body.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, HeaderMap::new(), String::new())
    }

    pub fn resource(&self) -> Resource {
        Resource::from_url(self.url.clone())
    }
}

/// An addressable target, compared and hashed by its normalized string form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    url: Url,
}

impl Resource {
    pub fn from_url(mut url: Url) -> Self {
        url.set_fragment(None);
        Self { url }
    }

    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(Self::from_url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// `scheme://host[:port]/`
    pub fn base_url(&self) -> Resource {
        let mut url = self.url.clone();
        url.set_path("/");
        url.set_query(None);
        Self::from_url(url)
    }

    /// The directory this resource lives in, query dropped:
    /// `http://h/a/b.php?x=1` -> `http://h/a/`, `http://h/a/b/` -> `http://h/a/b/`.
    pub fn domain_path(&self) -> Resource {
        let mut url = self.url.clone();
        let path = url.path();
        let dir = match path.rfind('/') {
            Some(pos) => path[..=pos].to_string(),
            None => "/".to_string(),
        };
        url.set_path(&dir);
        url.set_query(None);
        Self::from_url(url)
    }

    /// Parent directory: `http://h/a/b/` -> `http://h/a/`, `http://h/a/c.txt` -> `http://h/a/`.
    pub fn parent(&self) -> Resource {
        let mut url = self.url.clone();
        let trimmed = url.path().trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(pos) => trimmed[..=pos].to_string(),
            None => "/".to_string(),
        };
        url.set_path(&parent);
        url.set_query(None);
        Self::from_url(url)
    }

    pub fn without_query(&self) -> Resource {
        let mut url = self.url.clone();
        url.set_query(None);
        Self::from_url(url)
    }

    /// Last non-empty path segment, or an empty string for the root.
    pub fn file_name(&self) -> &str {
        self.url
            .path()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    pub fn is_directory(&self) -> bool {
        self.url.path().ends_with('/')
    }

    pub fn join(&self, relative: &str) -> Result<Resource, url::ParseError> {
        self.url.join(relative).map(Self::from_url)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one network exchange. `id` is assigned once per exchange by the
/// transport and is what findings point at as evidence.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: u64,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub resource: Resource,
    pub size: usize,
}

/// The network collaborator. Implementations must accept concurrent calls
/// from many dispatcher workers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest, use_cache: bool) -> Result<Response, TransportError>;
}
