//! Plugin capabilities.
//!
//! A plugin implements [`Plugin`] plus exactly the capability its campaign
//! kind needs. The engine components (dispatcher, classifier, verifier,
//! stores) are reached through the [`ScanSession`] passed to every call.

pub mod audit;
pub mod auth;
pub mod crawl;
pub mod evasion;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::session::ScanSession;
use crate::error::ScanError;
use crate::http::HttpRequest;

pub use audit::ldapi::Ldapi;
pub use auth::generic::GenericAuth;
pub use crawl::dir_bruter::DirBruter;
pub use crawl::oracle_discovery::OracleDiscovery;
pub use evasion::mod_security::ModSecurity;
pub use evasion::shift_out_in_between_dots::ShiftOutInBetweenDots;
pub use evasion::{apply_manglers, MangledTransport};

pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Plugins that should run before this one. Declared only; the engine
    /// does not order or enforce them.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Result of one campaign invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignOutcome {
    Completed { probes: usize, confirmed: usize },
    /// a run-once campaign was invoked again; nothing was sent
    Exhausted,
}

impl CampaignOutcome {
    pub fn empty() -> Self {
        CampaignOutcome::Completed { probes: 0, confirmed: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, CampaignOutcome::Exhausted)
    }

    /// Sums two completed runs; exhaustion is absorbing only when both are.
    pub fn merge(self, other: CampaignOutcome) -> CampaignOutcome {
        match (self, other) {
            (
                CampaignOutcome::Completed { probes: a, confirmed: b },
                CampaignOutcome::Completed { probes: c, confirmed: d },
            ) => CampaignOutcome::Completed { probes: a + c, confirmed: b + d },
            (CampaignOutcome::Exhausted, other) | (other, CampaignOutcome::Exhausted) => other,
        }
    }
}

/// Crawl plugins: find new resources and push them to the frontier.
#[async_trait]
pub trait Discoverer: Plugin {
    async fn discover(&self, session: &Arc<ScanSession>, request: &HttpRequest) -> Result<CampaignOutcome, ScanError>;
}

/// Audit plugins: inject payloads and look for known signatures.
#[async_trait]
pub trait SignatureAuditor: Plugin {
    async fn audit(&self, session: &Arc<ScanSession>, request: &HttpRequest) -> Result<CampaignOutcome, ScanError>;
}

/// Evasion plugins: rewrite a request right before it is sent.
pub trait RequestMangler: Plugin {
    /// Returns a new request; the input is left as is.
    fn mangle(&self, request: &HttpRequest) -> HttpRequest;

    /// Higher runs first.
    fn priority(&self) -> u8;
}

#[async_trait]
pub trait Authenticator: Plugin {
    async fn login(&self, session: &ScanSession) -> bool;

    async fn is_logged(&self, session: &ScanSession) -> bool;

    async fn logout(&self, session: &ScanSession);
}

/// Run-once policy: the first `enter` wins, every later one is refused.
/// A disarmed flag admits every call.
#[derive(Debug)]
pub struct RunOnce {
    armed: bool,
    spent: AtomicBool,
}

impl RunOnce {
    pub fn new(armed: bool) -> Self {
        Self {
            armed,
            spent: AtomicBool::new(false),
        }
    }

    pub fn enter(&self) -> bool {
        !self.armed || !self.spent.swap(true, Ordering::SeqCst)
    }

    pub fn is_spent(&self) -> bool {
        self.armed && self.spent.load(Ordering::SeqCst)
    }
}

/// The enabled plugins of a scan, grouped by capability.
#[derive(Default, Clone)]
pub struct PluginSet {
    pub discoverers: Vec<Arc<dyn Discoverer>>,
    pub auditors: Vec<Arc<dyn SignatureAuditor>>,
    pub manglers: Vec<Arc<dyn RequestMangler>>,
    pub authenticators: Vec<Arc<dyn Authenticator>>,
}

impl PluginSet {
    pub fn names(&self) -> Vec<&'static str> {
        self.describe().into_iter().map(|(name, _)| name).collect()
    }

    /// Name and description of every plugin, discoverers first.
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        let mut plugins = Vec::new();
        plugins.extend(self.discoverers.iter().map(|p| (p.name(), p.description())));
        plugins.extend(self.auditors.iter().map(|p| (p.name(), p.description())));
        plugins.extend(self.manglers.iter().map(|p| (p.name(), p.description())));
        plugins.extend(self.authenticators.iter().map(|p| (p.name(), p.description())));
        plugins
    }

    pub fn is_empty(&self) -> bool {
        self.discoverers.is_empty()
            && self.auditors.is_empty()
            && self.manglers.is_empty()
            && self.authenticators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_once_admits_first_call_only() {
        let flag = RunOnce::new(true);
        assert!(!flag.is_spent());
        assert!(flag.enter());
        assert!(!flag.enter());
        assert!(!flag.enter());
        assert!(flag.is_spent());
    }

    #[test]
    fn test_disarmed_run_once_admits_all() {
        let flag = RunOnce::new(false);
        assert!(flag.enter());
        assert!(flag.enter());
        assert!(!flag.is_spent());
    }

    #[test]
    fn test_describe_lists_capabilities_in_order() {
        let plugins = PluginSet {
            auditors: vec![Arc::new(Ldapi::new())],
            manglers: vec![Arc::new(ModSecurity)],
            ..PluginSet::default()
        };
        let described = plugins.describe();
        assert_eq!(plugins.names(), vec!["ldapi", "mod_security"]);
        assert_eq!(described[0].1, Ldapi::new().description());
        assert!(!described[1].1.is_empty());
    }

    #[test]
    fn test_outcome_merge() {
        let a = CampaignOutcome::Completed { probes: 3, confirmed: 1 };
        let b = CampaignOutcome::Completed { probes: 2, confirmed: 0 };
        assert_eq!(a.merge(b), CampaignOutcome::Completed { probes: 5, confirmed: 1 });
        assert_eq!(CampaignOutcome::Exhausted.merge(a), a);
        assert!(CampaignOutcome::Exhausted.merge(CampaignOutcome::Exhausted).is_exhausted());
    }
}
