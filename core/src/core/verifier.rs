use std::sync::Arc;

use log::debug;
use rand::distr::{Alphanumeric, SampleString};

use crate::core::classifier::NotFoundClassifier;
use crate::core::dispatcher::Dispatcher;
use crate::error::ScanError;
use crate::http::{HttpRequest, Resource};

const DECOY_SUFFIX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Confirmed,
    FalsePositive,
}

/// Second opinion on a discovery: a sibling that cannot exist must come back
/// "not found", otherwise the location answers positively for any name.
pub struct Verifier {
    dispatcher: Dispatcher,
    classifier: Arc<NotFoundClassifier>,
}

impl Verifier {
    pub fn new(dispatcher: Dispatcher, classifier: Arc<NotFoundClassifier>) -> Self {
        Self {
            dispatcher: dispatcher.with_cache(false),
            classifier,
        }
    }

    /// `parent/<name><5 random alnum>[/]`
    pub fn decoy_for(candidate: &Resource, name: &str, is_dir: bool) -> Result<Resource, url::ParseError> {
        let suffix = Alphanumeric.sample_string(&mut rand::rng(), DECOY_SUFFIX_LEN);
        let decoy = format!("{}{}{}", name, suffix, if is_dir { "/" } else { "" });
        candidate.parent().join(&decoy)
    }

    pub async fn verify(&self, candidate: &Resource, name: &str, is_dir: bool) -> Result<Verification, ScanError> {
        let decoy = match Self::decoy_for(candidate, name, is_dir) {
            Ok(decoy) => decoy,
            Err(e) => {
                debug!("no decoy for {}: {}", candidate, e);
                return Ok(Verification::FalsePositive);
            }
        };

        let response = match self.dispatcher.send(&HttpRequest::get(decoy.url().clone())).await {
            Ok(response) => response,
            Err(e) => {
                debug!("decoy {} failed, dropping {}: {}", decoy, candidate, e);
                return Ok(Verification::FalsePositive);
            }
        };

        if self.classifier.is_not_found(&response).await?.is_not_found() {
            Ok(Verification::Confirmed)
        } else {
            debug!(
                "{} answers {} for arbitrary names, {} is a false positive",
                decoy.parent(),
                response.status,
                candidate
            );
            Ok(Verification::FalsePositive)
        }
    }
}
