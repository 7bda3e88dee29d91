//! The scan-session context handed to every campaign.
//!
//! Everything that outlives a single campaign lives here: the visited set,
//! the findings registry, the frontier, the baseline cache and the shared
//! dispatcher. Sessions are created at scan start and torn down once.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info};

use crate::core::classifier::{ClassifierSettings, NotFoundClassifier};
use crate::core::dispatcher::{Dispatcher, DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS};
use crate::core::frontier::{Frontier, FrontierEntry, FrontierReceiver};
use crate::core::mutator::Probe;
use crate::core::state::SessionSnapshot;
use crate::core::store::{DedupStore, Finding, FindingRegistry, VisitedSet, DEFAULT_SPILL_THRESHOLD};
use crate::core::verifier::Verifier;
use crate::error::ScanError;
use crate::http::{Resource, Transport};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub workers: usize,
    pub chunk_size: usize,
    pub classifier: ClassifierSettings,
    pub spill_threshold: usize,
    pub spill_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            classifier: ClassifierSettings::default(),
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            spill_dir: std::env::temp_dir(),
        }
    }
}

pub struct ScanSession {
    dispatcher: Dispatcher,
    visited: VisitedSet,
    findings: FindingRegistry,
    frontier: Frontier,
    classifier: Arc<NotFoundClassifier>,
    verifier: Verifier,
}

impl ScanSession {
    pub fn new(transport: Arc<dyn Transport>, settings: SessionSettings) -> (Arc<Self>, FrontierReceiver) {
        Self::build(transport, settings, FindingRegistry::new())
    }

    /// Continues a previous session: its findings keep their sequence
    /// numbers and its visited resources are not probed again.
    pub fn resume(
        transport: Arc<dyn Transport>,
        settings: SessionSettings,
        snapshot: SessionSnapshot,
    ) -> Result<(Arc<Self>, FrontierReceiver), ScanError> {
        let (session, rx) = Self::build(transport, settings, FindingRegistry::from_findings(snapshot.findings));
        for identity in &snapshot.visited {
            match Resource::parse(identity) {
                Ok(resource) => session.visited.add(resource)?,
                Err(e) => debug!("dropping unparsable visited entry {}: {}", identity, e),
            }
        }
        info!(
            "resumed session with {} findings and {} visited resources",
            session.findings.len()?,
            session.visited.len()?
        );
        Ok((session, rx))
    }

    fn build(
        transport: Arc<dyn Transport>,
        settings: SessionSettings,
        findings: FindingRegistry,
    ) -> (Arc<Self>, FrontierReceiver) {
        let dispatcher = Dispatcher::new(transport, settings.workers, settings.chunk_size);
        let classifier = Arc::new(NotFoundClassifier::new(dispatcher.clone(), settings.classifier));
        let verifier = Verifier::new(dispatcher.clone(), Arc::clone(&classifier));
        let (frontier, rx) = Frontier::channel();
        let session = Self {
            dispatcher,
            visited: VisitedSet::with_spill(settings.spill_threshold, settings.spill_dir),
            findings,
            frontier,
            classifier,
            verifier,
        };
        (Arc::new(session), rx)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn findings(&self) -> &FindingRegistry {
        &self.findings
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn classifier(&self) -> &NotFoundClassifier {
        &self.classifier
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Records a finding; `Some(seq)` only the first time its key is seen.
    pub fn report(&self, finding: Finding) -> Result<Option<u64>, ScanError> {
        let title = finding.title.clone();
        let resource = finding.resource.clone();
        let seq = self.findings.record(finding)?;
        if let Some(seq) = seq {
            info!("#{} {} at {}", seq, title, resource);
        }
        Ok(seq)
    }

    pub fn push(&self, entry: FrontierEntry) {
        self.frontier.push(entry);
    }

    /// Filters `probes` down to targets not probed before in this session,
    /// marking them visited as they are pulled. A store failure ends the
    /// sequence and is reported by [`StoreFailure::check`].
    pub fn unvisited<I>(self: &Arc<Self>, probes: I, failure: &StoreFailure) -> impl Iterator<Item = Probe> + Send
    where
        I: IntoIterator<Item = Probe>,
        I::IntoIter: Send,
    {
        let session = Arc::clone(self);
        let failure = failure.clone();
        probes.into_iter().filter_map(move |probe| {
            if failure.is_set() {
                return None;
            }
            match session.visited.add_if_absent(probe.resource()) {
                Ok(true) => Some(probe),
                Ok(false) => {
                    debug!("{} already probed", probe.request().url);
                    None
                }
                Err(e) => {
                    failure.set(e);
                    None
                }
            }
        })
    }

    /// Ends the session. With a path, findings and visited resources are
    /// written there; without one, the state is dropped with the session.
    pub fn teardown(&self, snapshot_path: Option<&Path>) -> Result<Vec<Finding>, ScanError> {
        let findings = self.findings.findings()?;
        if let Some(path) = snapshot_path {
            let snapshot = SessionSnapshot::new(findings.clone(), self.visited.identities()?);
            snapshot.save(path)?;
            info!("session saved to {}", path.display());
        }
        Ok(findings)
    }
}

/// Slot for the first store error hit while filtering a probe sequence.
#[derive(Clone, Default)]
pub struct StoreFailure(Arc<Mutex<Option<ScanError>>>);

impl StoreFailure {
    fn set(&self, e: ScanError) {
        error!("visited set failure: {}", e);
        if let Ok(mut slot) = self.0.lock() {
            slot.get_or_insert(e);
        }
    }

    fn is_set(&self) -> bool {
        self.0.lock().map(|slot| slot.is_some()).unwrap_or(true)
    }

    pub fn check(&self) -> Result<(), ScanError> {
        let mut slot = self.0.lock().map_err(|_| ScanError::poisoned("store failure slot"))?;
        match slot.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
