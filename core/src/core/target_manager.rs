use std::collections::{HashSet, VecDeque};

use log::debug;
use url::Url;

use crate::http::{HttpRequest, Resource};

/// Deduplicating queue of requests still to be run through the plugins.
/// Once `max_targets` distinct resources were accepted, further ones are
/// dropped; 0 means no bound.
pub struct TargetManager {
    queue: VecDeque<HttpRequest>,
    seen: HashSet<Resource>,
    max_targets: usize,
    dropped: usize,
}

impl TargetManager {
    pub fn new(max_targets: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            max_targets,
            dropped: 0,
        }
    }

    /// Queues the request unless its resource was queued before.
    pub fn add_target(&mut self, request: HttpRequest) -> bool {
        let resource = request.resource();
        if self.seen.contains(&resource) {
            return false;
        }
        if self.max_targets > 0 && self.seen.len() >= self.max_targets {
            self.dropped += 1;
            debug!("target limit reached, dropping {}", resource);
            return false;
        }
        self.seen.insert(resource);
        self.queue.push_back(request);
        true
    }

    pub fn add_url(&mut self, url: &str) -> Result<bool, url::ParseError> {
        Ok(self.add_target(HttpRequest::get(Url::parse(url)?)))
    }

    /// Returns the next pending target, or `None` if the queue is empty.
    pub fn next(&mut self) -> Option<HttpRequest> {
        self.queue.pop_front()
    }

    /// Number of targets still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_resource() {
        let mut targets = TargetManager::new(0);
        assert!(targets.add_url("http://h/a/").unwrap());
        assert!(!targets.add_url("http://h/a/#frag").unwrap());
        assert!(targets.add_url("http://h/b/").unwrap());
        assert_eq!(targets.len(), 2);
        assert_eq!(targets.next().unwrap().url.as_str(), "http://h/a/");
        assert!(!targets.add_url("http://h/a/").unwrap());
    }

    #[test]
    fn test_limit() {
        let mut targets = TargetManager::new(2);
        for path in ["a", "b", "c", "d"] {
            targets.add_url(&format!("http://h/{}", path)).unwrap();
        }
        assert_eq!(targets.len(), 2);
        assert_eq!(targets.dropped(), 2);
    }

    #[test]
    fn test_bad_url() {
        assert!(TargetManager::new(0).add_url("not a url").is_err());
    }
}
