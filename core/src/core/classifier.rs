//! Heuristic "is this a missing resource" decision.
//!
//! Status codes alone are not enough: plenty of servers answer unknown paths
//! with a 200 page. For every bucket (directory + resource shape) the
//! classifier requests one random sibling that cannot exist, keeps its
//! fingerprint, and calls later responses "not found" when they look like it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use distance::sift3;
use log::{debug, warn};
use rand::distr::{Alphanumeric, SampleString};
use tokio::sync::OnceCell;

use crate::core::dispatcher::Dispatcher;
use crate::error::ScanError;
use crate::http::{HttpRequest, Resource, Response};

pub const DEFAULT_SIMILARITY: f64 = 0.90;

/// Only the head of each body takes part in the comparison.
const SAMPLE_CHARS: usize = 4096;

const BASELINE_NAME_LEN: usize = 10;

/// Baselines are shared per directory and per resource shape, since servers
/// often treat `x/`, `x.php` and `x.html` differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bucket {
    pub directory: String,
    pub shape: String,
}

impl Bucket {
    pub fn of(resource: &Resource) -> Self {
        let shape = if resource.is_directory() {
            "/".to_string()
        } else {
            resource
                .file_name()
                .rsplit_once('.')
                .map(|(_, ext)| format!(".{}", ext))
                .unwrap_or_default()
        };
        Self {
            directory: resource.parent().as_str().to_string(),
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub status: u16,
    pub body_len: usize,
    pub sample: String,
}

impl Fingerprint {
    /// The requested name is cut out first: error pages that echo the
    /// path would otherwise never look alike.
    pub fn of(response: &Response) -> Self {
        let name = response.resource.file_name();
        let body = if name.is_empty() {
            response.body.clone()
        } else {
            response.body.replace(name, "")
        };
        Self {
            status: response.status,
            body_len: body.len(),
            sample: body.chars().take(SAMPLE_CHARS).collect(),
        }
    }

    /// 1.0 for identical samples, towards 0.0 as they diverge.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        let longest = self.body_len.max(other.body_len);
        if longest == 0 {
            return 1.0;
        }
        let length_ratio = self.body_len.min(other.body_len) as f64 / longest as f64;
        if length_ratio < 0.5 {
            return length_ratio;
        }
        let sample_len = self.sample.chars().count().max(other.sample.chars().count());
        if sample_len == 0 {
            return length_ratio;
        }
        let distance = sift3(&self.sample, &other.sample) as f64;
        (1.0 - distance / sample_len as f64).clamp(0.0, 1.0)
    }
}

/// What is known about a bucket's "missing resource" answer.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineState {
    Known(Fingerprint),
    /// the baseline probe itself failed
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    NotFound,
    Present,
    /// no baseline for the bucket; treated as present, must be verified
    Unknown,
}

impl Verdict {
    pub fn is_not_found(self) -> bool {
        self == Verdict::NotFound
    }

    pub fn is_present(self) -> bool {
        !self.is_not_found()
    }

    pub fn needs_verification(self) -> bool {
        self == Verdict::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub not_found_codes: HashSet<u16>,
    pub similarity_threshold: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            not_found_codes: [404].into_iter().collect(),
            similarity_threshold: DEFAULT_SIMILARITY,
        }
    }
}

pub struct NotFoundClassifier {
    settings: ClassifierSettings,
    dispatcher: Dispatcher,
    baselines: Mutex<HashMap<Bucket, Arc<OnceCell<BaselineState>>>>,
}

impl NotFoundClassifier {
    pub fn new(dispatcher: Dispatcher, settings: ClassifierSettings) -> Self {
        Self {
            settings,
            dispatcher: dispatcher.with_cache(false),
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// Pure decision for a response against a given baseline.
    pub fn classify(&self, response: &Response, baseline: &BaselineState) -> Verdict {
        if self.settings.not_found_codes.contains(&response.status) {
            return Verdict::NotFound;
        }
        match baseline {
            BaselineState::Unknown => Verdict::Unknown,
            BaselineState::Known(fingerprint) => {
                if fingerprint.status == response.status
                    && fingerprint.similarity(&Fingerprint::of(response))
                        >= self.settings.similarity_threshold
                {
                    Verdict::NotFound
                } else {
                    Verdict::Present
                }
            }
        }
    }

    /// Classifies against the bucket's baseline, probing it first if this is
    /// the first time the bucket is seen.
    pub async fn is_not_found(&self, response: &Response) -> Result<Verdict, ScanError> {
        if self.settings.not_found_codes.contains(&response.status) {
            return Ok(Verdict::NotFound);
        }
        let baseline = self.baseline(&response.resource).await?;
        Ok(self.classify(response, &baseline))
    }

    /// The cached baseline for `resource`'s bucket. Concurrent first callers
    /// share a single probe.
    pub async fn baseline(&self, resource: &Resource) -> Result<BaselineState, ScanError> {
        let bucket = Bucket::of(resource);
        let cell = {
            let mut baselines = self
                .baselines
                .lock()
                .map_err(|_| ScanError::poisoned("baseline cache"))?;
            Arc::clone(baselines.entry(bucket.clone()).or_default())
        };
        let state = cell
            .get_or_init(|| async { self.probe_baseline(resource, &bucket).await })
            .await;
        Ok(state.clone())
    }

    pub fn cached_buckets(&self) -> usize {
        self.baselines.lock().map(|b| b.len()).unwrap_or(0)
    }

    async fn probe_baseline(&self, resource: &Resource, bucket: &Bucket) -> BaselineState {
        let name = Alphanumeric
            .sample_string(&mut rand::rng(), BASELINE_NAME_LEN)
            .to_lowercase();
        let sibling = format!("{}{}", name, bucket.shape);
        let target = match resource.parent().join(&sibling) {
            Ok(target) => target,
            Err(e) => {
                warn!("cannot build baseline url in {}: {}", bucket.directory, e);
                return BaselineState::Unknown;
            }
        };

        match self.dispatcher.send(&HttpRequest::get(target.url().clone())).await {
            Ok(response) => {
                debug!(
                    "baseline for {}*{}: {} ({} bytes)",
                    bucket.directory, bucket.shape, response.status, response.size
                );
                BaselineState::Known(Fingerprint::of(&response))
            }
            Err(e) => {
                warn!(
                    "baseline probe for {} failed, bucket left unknown: {}",
                    bucket.directory, e
                );
                BaselineState::Unknown
            }
        }
    }
}
