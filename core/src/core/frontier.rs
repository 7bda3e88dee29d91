use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::http::{HttpRequest, Resource, Response};

/// A follow-up request for a confirmed resource.
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub request: HttpRequest,
    pub source: String,
}

impl FrontierEntry {
    /// GET for the resource that produced `response`; query and fragment dropped.
    pub fn from_response(response: &Response, source: &str) -> Self {
        Self::for_resource(&response.resource, source)
    }

    pub fn for_resource(resource: &Resource, source: &str) -> Self {
        let mut url = resource.url().clone();
        url.set_query(None);
        url.set_fragment(None);
        Self {
            request: HttpRequest::get(url),
            source: source.to_string(),
        }
    }

    pub fn resource(&self) -> Resource {
        self.request.resource()
    }
}

/// Producer side; cloned into every campaign.
#[derive(Debug, Clone)]
pub struct Frontier {
    tx: UnboundedSender<FrontierEntry>,
}

pub type FrontierReceiver = UnboundedReceiver<FrontierEntry>;

impl Frontier {
    pub fn channel() -> (Frontier, FrontierReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Frontier { tx }, rx)
    }

    /// Never waits on the consumer. Entries pushed after the consumer went
    /// away are dropped.
    pub fn push(&self, entry: FrontierEntry) {
        debug!("frontier <- {} ({})", entry.request.url, entry.source);
        if let Err(e) = self.tx.send(entry) {
            warn!("frontier consumer gone, dropping {}", e.0.request.url);
        }
    }
}
