pub mod mod_security;
pub mod shift_out_in_between_dots;

use std::sync::Arc;

use async_trait::async_trait;
use log::trace;

use super::RequestMangler;
use crate::error::TransportError;
use crate::http::{HttpRequest, Response, Transport};

/// Runs `request` through every mangler, highest priority first.
pub fn apply_manglers(request: &HttpRequest, manglers: &[Arc<dyn RequestMangler>]) -> HttpRequest {
    let mut ordered: Vec<&Arc<dyn RequestMangler>> = manglers.iter().collect();
    ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));
    ordered.into_iter().fold(request.clone(), |req, mangler| {
        trace!("{} mangling {}", mangler.name(), req.url);
        mangler.mangle(&req)
    })
}

/// Transport wrapper that mangles every outgoing request.
pub struct MangledTransport {
    inner: Arc<dyn Transport>,
    manglers: Vec<Arc<dyn RequestMangler>>,
}

impl MangledTransport {
    pub fn new(inner: Arc<dyn Transport>, mut manglers: Vec<Arc<dyn RequestMangler>>) -> Self {
        manglers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        Self { inner, manglers }
    }
}

#[async_trait]
impl Transport for MangledTransport {
    async fn send(&self, request: &HttpRequest, use_cache: bool) -> Result<Response, TransportError> {
        if self.manglers.is_empty() {
            return self.inner.send(request, use_cache).await;
        }
        let mangled = apply_manglers(request, &self.manglers);
        self.inner.send(&mangled, use_cache).await
    }
}
