use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::dispatcher::{ProbeHandler, ProbeOutcome};
use crate::core::frontier::FrontierEntry;
use crate::core::mutator::{InjectionPoint, MutationFactory, Probe};
use crate::core::session::{ScanSession, StoreFailure};
use crate::core::store::Finding;
use crate::core::verifier::Verification;
use crate::error::ScanError;
use crate::http::{HttpRequest, Resource};
use crate::plugins::{CampaignOutcome, Discoverer, Plugin, RunOnce};
use crate::utils::payload_loader::{CandidateIter, CandidateList};

const NAME: &str = "dir_bruter";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirBruterOptions {
    pub wordlist: CandidateList,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

/// Finds directories by requesting `<base>/<word>/` for every word of a
/// list. Each hit is checked against a decoy before it is reported.
///
/// Without recursion only the site root is bruteforced and the plugin runs
/// once per session; with it, every directory the crawl reaches gets its own
/// pass.
pub struct DirBruter {
    wordlist: CandidateList,
    recursive: bool,
    run_once: RunOnce,
    tested: Mutex<HashSet<Resource>>,
}

impl DirBruter {
    pub fn new(options: DirBruterOptions) -> Self {
        Self {
            run_once: RunOnce::new(!options.recursive),
            wordlist: options.wordlist,
            recursive: options.recursive,
            tested: Mutex::new(HashSet::new()),
        }
    }

    fn is_tested(&self, base: &Resource) -> Result<bool, ScanError> {
        let tested = self.tested.lock().map_err(|_| ScanError::poisoned("dir_bruter bases"))?;
        Ok(tested.contains(base))
    }

    /// `true` the first time `base` is handed out.
    fn claim(&self, base: &Resource) -> Result<bool, ScanError> {
        let mut tested = self.tested.lock().map_err(|_| ScanError::poisoned("dir_bruter bases"))?;
        Ok(tested.insert(base.clone()))
    }

    async fn bruteforce(
        &self,
        session: &Arc<ScanSession>,
        base: &Resource,
        words: CandidateIter,
    ) -> Result<CampaignOutcome, ScanError> {
        debug!("bruteforcing directories under {}", base);
        let base_request = Arc::new(HttpRequest::get(base.url().clone()));
        let probes = MutationFactory::generate_at(
            base_request,
            InjectionPoint::PathSegment,
            words.map(|word| format!("{}/", word)),
        );

        let failure = StoreFailure::default();
        let handler = Arc::new(DirectoryHandler {
            session: Arc::clone(session),
            confirmed: AtomicUsize::new(0),
        });
        let summary = session
            .dispatcher()
            .dispatch(session.unvisited(probes, &failure), Arc::clone(&handler))
            .await?;
        failure.check()?;

        Ok(CampaignOutcome::Completed {
            probes: summary.submitted,
            confirmed: handler.confirmed.load(Ordering::Relaxed),
        })
    }
}

impl Plugin for DirBruter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Finds directories on a web server by bruteforcing names from a wordlist"
    }
}

#[async_trait]
impl Discoverer for DirBruter {
    async fn discover(&self, session: &Arc<ScanSession>, request: &HttpRequest) -> Result<CampaignOutcome, ScanError> {
        if self.run_once.is_spent() {
            return Ok(CampaignOutcome::Exhausted);
        }

        let resource = request.resource();
        let mut bases = vec![resource.base_url()];
        if self.recursive {
            bases.push(resource.domain_path());
        }
        bases.dedup();

        // Nothing is marked as tested until every list opened, so a failed
        // open leaves the bases to a later call.
        let mut pending = Vec::new();
        for base in bases {
            if !self.is_tested(&base)? {
                let words = self.wordlist.iter()?;
                pending.push((base, words));
            }
        }
        if !self.run_once.enter() {
            return Ok(CampaignOutcome::Exhausted);
        }

        let mut outcome = CampaignOutcome::empty();
        for (base, words) in pending {
            if self.claim(&base)? {
                outcome = outcome.merge(self.bruteforce(session, &base, words).await?);
            }
        }
        Ok(outcome)
    }
}

struct DirectoryHandler {
    session: Arc<ScanSession>,
    confirmed: AtomicUsize,
}

#[async_trait]
impl ProbeHandler for DirectoryHandler {
    async fn handle(&self, probe: Probe, outcome: ProbeOutcome) -> Result<(), ScanError> {
        let Ok(response) = outcome else {
            return Ok(());
        };
        if self.session.classifier().is_not_found(&response).await?.is_not_found() {
            return Ok(());
        }

        let resource = probe.resource();
        let name = probe.value().trim_end_matches('/');
        if self.session.verifier().verify(&resource, name, true).await? == Verification::FalsePositive {
            debug!("{} rejected by its decoy", resource);
            return Ok(());
        }

        let finding = Finding::new(
            NAME,
            "directory",
            resource.clone(),
            format!("HTTP {} with Content-Length: {}", response.status, response.body.len()),
            response.id,
        )
        .with_title("Directory found");

        if self.session.report(finding)?.is_some() {
            self.confirmed.fetch_add(1, Ordering::Relaxed);
            info!(
                "dir_bruter found directory {} with HTTP response code {} and Content-Length: {}",
                resource,
                response.status,
                response.body.len()
            );
            self.session.push(FrontierEntry::from_response(&response, NAME));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frontier::FrontierReceiver;
    use crate::core::session::SessionSettings;
    use crate::core::store::DedupStore;
    use crate::testing::MockTransport;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use url::Url;

    const SOFT_404: &str = "<html><body><h2>Sorry</h2><p>The page {path} could not be found on this server.</p></body></html>";
    const GALLERY: &str = "<html><head><title>Images</title></head><body><ul><li>logo.png</li><li>banner.jpg</li></ul></body></html>";

    fn wordlist(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn setup(transport: MockTransport) -> (Arc<MockTransport>, Arc<ScanSession>, FrontierReceiver) {
        let transport = Arc::new(transport);
        let (session, rx) = ScanSession::new(transport.clone(), SessionSettings::default());
        (transport, session, rx)
    }

    fn bruter(list: &NamedTempFile, recursive: bool) -> DirBruter {
        DirBruter::new(DirBruterOptions {
            wordlist: CandidateList::file(list.path()),
            recursive,
        })
    }

    fn root() -> HttpRequest {
        HttpRequest::get(Url::parse("http://target.test/").unwrap())
    }

    #[tokio::test]
    async fn test_confirms_real_directory_and_skips_comment_lines() {
        let list = wordlist(&["admin", "backup", "#comment", "", "images"]);
        let (transport, session, mut rx) = setup(
            MockTransport::new()
                .echo_fallback(200, SOFT_404)
                .page("/admin/", 404, "gone")
                .page("/backup/", 404, "gone")
                .page("/images/", 200, GALLERY),
        );

        let outcome = bruter(&list, true).discover(&session, &root()).await.unwrap();
        assert_eq!(outcome, CampaignOutcome::Completed { probes: 3, confirmed: 1 });

        let findings = session.findings().findings().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource.as_str(), "http://target.test/images/");
        assert_eq!(findings[0].kind, "directory");
        assert_eq!(findings[0].seq, 1);

        assert_eq!(rx.try_recv().unwrap().request.url.as_str(), "http://target.test/images/");
        assert!(rx.try_recv().is_err());

        assert!(!transport.requested_paths().iter().any(|p| p.contains("comment")));
        assert_eq!(transport.count_path("/admin/"), 1);
        assert_eq!(transport.count_path("/images/"), 1);
        assert!(session.visited().contains(&Resource::parse("http://target.test/backup/").unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_rejects_directory_when_decoy_looks_the_same() {
        let list = wordlist(&["images"]);
        let (_, session, mut rx) = setup(
            MockTransport::new().prefix("/images", 200, "<html><body>Welcome to our site</body></html>"),
        );

        let outcome = bruter(&list, true).discover(&session, &root()).await.unwrap();
        assert_eq!(outcome, CampaignOutcome::Completed { probes: 1, confirmed: 0 });
        assert!(session.findings().is_empty().unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_catch_all_host_yields_nothing() {
        let list = wordlist(&["admin", "backup", "images", "cgi-bin", "uploads", "static"]);
        let (_, session, _rx) = setup(MockTransport::new().random_fallback(200));
        bruter(&list, true).discover(&session, &root()).await.unwrap();
        assert!(session.findings().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_run_once_when_not_recursive() {
        let list = wordlist(&["admin", "images"]);
        let (transport, session, _rx) = setup(MockTransport::new().page("/images/", 200, GALLERY));
        let plugin = bruter(&list, false);

        let first = plugin.discover(&session, &root()).await.unwrap();
        assert!(!first.is_exhausted());
        let sent = transport.requests();

        let again = HttpRequest::get(Url::parse("http://target.test/images/").unwrap());
        assert_eq!(plugin.discover(&session, &again).await.unwrap(), CampaignOutcome::Exhausted);
        assert_eq!(transport.requests(), sent);
    }

    #[tokio::test]
    async fn test_recursive_bruteforces_each_directory_once() {
        let list = wordlist(&["icons"]);
        let (transport, session, _rx) = setup(
            MockTransport::new()
                .page("/images/", 200, GALLERY)
                .page("/images/icons/", 200, "<html>icon index</html>"),
        );
        let plugin = bruter(&list, true);
        let images = HttpRequest::get(Url::parse("http://target.test/images/").unwrap());

        plugin.discover(&session, &images).await.unwrap();
        assert_eq!(transport.count_path("/icons/"), 1);
        assert_eq!(transport.count_path("/images/icons/"), 1);

        let outcome = plugin.discover(&session, &images).await.unwrap();
        assert_eq!(outcome, CampaignOutcome::empty());
        assert_eq!(transport.count_path("/images/icons/"), 1);
        assert_eq!(session.findings().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_wordlist_is_not_fatal() {
        let (_, session, _rx) = setup(MockTransport::new());
        let plugin = DirBruter::new(DirBruterOptions {
            wordlist: CandidateList::file("/nonexistent/words.txt"),
            recursive: true,
        });
        let err = plugin.discover(&session, &root()).await.unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_base_stays_untested_when_wordlist_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        let (_, session, _rx) = setup(MockTransport::new().page("/images/", 200, GALLERY));
        let plugin = DirBruter::new(DirBruterOptions {
            wordlist: CandidateList::file(&path),
            recursive: false,
        });

        assert!(plugin.discover(&session, &root()).await.is_err());

        std::fs::write(&path, "images\n").unwrap();
        let outcome = plugin.discover(&session, &root()).await.unwrap();
        assert_eq!(outcome, CampaignOutcome::Completed { probes: 1, confirmed: 1 });
        assert_eq!(plugin.discover(&session, &root()).await.unwrap(), CampaignOutcome::Exhausted);
    }
}
