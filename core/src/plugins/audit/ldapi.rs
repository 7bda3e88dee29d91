use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::core::dispatcher::{ProbeHandler, ProbeOutcome};
use crate::core::matcher::SignatureMatcher;
use crate::core::mutator::{InjectionPoint, MutationFactory, Probe};
use crate::core::session::ScanSession;
use crate::core::store::{DedupStore, Finding, FindingKey, Severity};
use crate::error::ScanError;
use crate::http::{HttpRequest, Resource};
use crate::plugins::{CampaignOutcome, Plugin, SignatureAuditor};

const NAME: &str = "ldapi";
const KIND: &str = "ldap_injection";

pub const LDAP_PAYLOAD: &str = "^(#$!@#$)(()))******";

pub const LDAP_ERRORS: &[&str] = &[
    "supplied argument is not a valid ldap",
    "javax.naming.NameNotFoundException",
    "LDAPException",
    "com.sun.jndi.ldap",
    "Search: Bad search filter",
    "Protocol error occurred",
    "Size limit has exceeded",
    "An inappropriate matching occurred",
    "A constraint violation occurred",
    "The syntax is invalid",
    "Object does not exist",
    "The alias is invalid",
    "The distinguished name has an invalid syntax",
    "The server does not handle directory requests",
    "There was a naming violation",
    "There was an object class violation",
    "Results returned are too large",
    "Unknown error occurred",
    "Local error occurred",
    "The search filter is incorrect",
    "The search filter is invalid",
    "The search filter cannot be recognized",
    "Invalid DN syntax",
    "No Such Object",
    "IPWorksASP.LDAP",
    "Module Products.LDAPMultiPlugins",
];

/// LDAP injection: sends a filter-breaking string to every parameter and
/// looks for LDAP error messages that the untouched request did not show.
pub struct Ldapi {
    matcher: Arc<SignatureMatcher>,
}

impl Ldapi {
    pub fn new() -> Self {
        Self::with_signatures(LDAP_ERRORS.iter().copied())
    }

    pub fn with_signatures<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            matcher: Arc::new(SignatureMatcher::new(signatures)),
        }
    }

    pub fn signatures(&self) -> usize {
        self.matcher.len()
    }
}

impl Default for Ldapi {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Ldapi {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Finds LDAP injections by sending a crafted string to every parameter and looking for LDAP errors"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["grep.error_500"]
    }
}

#[async_trait]
impl SignatureAuditor for Ldapi {
    async fn audit(&self, session: &Arc<ScanSession>, request: &HttpRequest) -> Result<CampaignOutcome, ScanError> {
        let original = match session.dispatcher().send(request).await {
            Ok(response) => response.body,
            Err(e) => {
                debug!("original response for {} unavailable: {}", request.url, e);
                String::new()
            }
        };
        let already_present: BTreeSet<String> = self
            .matcher
            .query(&original)
            .into_iter()
            .map(str::to_string)
            .collect();

        let handler = Arc::new(ErrorHandler {
            session: Arc::clone(session),
            matcher: Arc::clone(&self.matcher),
            already_present,
            confirmed: AtomicUsize::new(0),
        });
        let probes = MutationFactory::generate(Arc::new(request.clone()), [LDAP_PAYLOAD.to_string()]);
        let summary = session.dispatcher().dispatch(probes, Arc::clone(&handler)).await?;

        Ok(CampaignOutcome::Completed {
            probes: summary.submitted,
            confirmed: handler.confirmed.load(Ordering::Relaxed),
        })
    }
}

struct ErrorHandler {
    session: Arc<ScanSession>,
    matcher: Arc<SignatureMatcher>,
    already_present: BTreeSet<String>,
    confirmed: AtomicUsize,
}

#[async_trait]
impl ProbeHandler for ErrorHandler {
    async fn handle(&self, probe: Probe, outcome: ProbeOutcome) -> Result<(), ScanError> {
        self.session.visited().add(probe.resource())?;
        let Ok(response) = outcome else {
            return Ok(());
        };

        let resource = finding_resource(&probe);
        let key = FindingKey {
            plugin: NAME.to_string(),
            kind: KIND.to_string(),
            resource: resource.clone(),
        };
        if self.session.findings().contains(&key)? {
            return Ok(());
        }

        let matched = self.matcher.query(&response.body);
        let Some(signature) = matched.into_iter().find(|s| !self.already_present.contains(*s)) else {
            return Ok(());
        };
        info!(
            "found LDAP error string \"{}\" in response {} for {}",
            signature,
            response.id,
            probe.point()
        );

        let finding = Finding::new(NAME, KIND, resource.clone(), signature, response.id)
            .with_title("LDAP injection vulnerability")
            .with_severity(Severity::High);
        if self.session.report(finding)?.is_some() {
            self.confirmed.fetch_add(1, Ordering::Relaxed);
            info!("LDAP injection was found at: {} ({})", resource, probe.point());
        }
        Ok(())
    }
}

/// The endpoint with its query reduced to the injected variable, so each
/// vulnerable variable of an endpoint is reported once.
fn finding_resource(probe: &Probe) -> Resource {
    let mut url = probe.base().resource().without_query().url().clone();
    match probe.point() {
        InjectionPoint::UrlParam(name)
        | InjectionPoint::FormParam(name)
        | InjectionPoint::JsonField(name)
        | InjectionPoint::Header(name) => {
            url.query_pairs_mut().append_key_only(name);
        }
        InjectionPoint::PathSegment => {}
    }
    Resource::from_url(url)
}
