use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::core::frontier::FrontierReceiver;
use crate::core::result_aggregator::ResultAggregator;
use crate::core::session::ScanSession;
use crate::core::state::SessionSnapshot;
use crate::core::store::Finding;
use crate::core::target_manager::TargetManager;
use crate::error::ScanError;
use crate::http::{HttpRequest, Transport};
use crate::plugins::{CampaignOutcome, MangledTransport, PluginSet};
use crate::{ScanConfig, SinkRef};

/// Crawl driver.
///
/// The engine:
/// 1. Logs in with every enabled authenticator
/// 2. Takes the next target from the TargetManager
/// 3. Runs every discoverer, then every auditor, against it
/// 4. Moves resources the campaigns pushed to the frontier into the TargetManager
/// 5. Streams new findings to the sink and the output file
/// 6. Repeats until no target is left, then tears the session down
pub struct ScanEngine {
    session: Arc<ScanSession>,
    frontier: FrontierReceiver,
    plugins: PluginSet,
    targets: TargetManager,
    aggregator: ResultAggregator,
    sink: SinkRef,
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct EngineReport {
    pub targets_scanned: usize,
    pub targets_dropped: usize,
    pub probes: usize,
    pub findings: Vec<Finding>,
}

impl ScanEngine {
    pub fn new(
        session: Arc<ScanSession>,
        frontier: FrontierReceiver,
        plugins: PluginSet,
        max_targets: usize,
        sink: SinkRef,
    ) -> Self {
        Self {
            session,
            frontier,
            plugins,
            targets: TargetManager::new(max_targets),
            aggregator: ResultAggregator::new(),
            sink,
            snapshot: None,
        }
    }

    /// Builds plugins, session and output from the configuration. Manglers
    /// are applied to everything sent through `transport`.
    pub fn from_config(config: &ScanConfig, transport: Arc<dyn Transport>, sink: SinkRef) -> anyhow::Result<Self> {
        config.validate()?;
        let plugins = config.build_plugins()?;
        let transport: Arc<dyn Transport> = if plugins.manglers.is_empty() {
            transport
        } else {
            Arc::new(MangledTransport::new(transport, plugins.manglers.clone()))
        };

        let settings = config.session_settings();
        let snapshot = config.snapshot_path().map(Path::to_path_buf);
        let (session, frontier, restored) = match snapshot.as_deref() {
            Some(path) if config.resume && SessionSnapshot::exists(path) => {
                let saved = SessionSnapshot::load(path)?;
                let restored = saved.findings.iter().map(|f| f.seq).max().unwrap_or(0);
                sink.on_log(
                    "info",
                    &format!("[*] Resuming session from {} ({} findings)", path.display(), saved.findings.len()),
                );
                let (session, frontier) = ScanSession::resume(transport, settings, saved)?;
                (session, frontier, restored)
            }
            _ => {
                let (session, frontier) = ScanSession::new(transport, settings);
                (session, frontier, 0)
            }
        };

        let aggregator = match config.output_path() {
            Some(path) => ResultAggregator::with_output(path)?,
            None => ResultAggregator::new(),
        };

        let mut engine = Self::new(session, frontier, plugins, config.max_targets, sink);
        engine.aggregator = aggregator.resume_after(restored);
        engine.snapshot = snapshot;
        Ok(engine)
    }

    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    pub fn add_target(&mut self, url: &str) -> Result<bool, url::ParseError> {
        self.targets.add_url(url)
    }

    /// Runs until the target queue is drained. A fatal store error stops the
    /// scan and skips the snapshot.
    pub async fn run(mut self) -> anyhow::Result<EngineReport> {
        let mut report = EngineReport::default();

        for auth in &self.plugins.authenticators {
            if auth.login(&self.session).await {
                self.sink.on_log("success", &format!("[+] Logged in with {}", auth.name()));
            } else {
                self.sink.on_log("warn", &format!("[!] Login with {} failed, scanning unauthenticated", auth.name()));
            }
        }

        let crawled = self.crawl(&mut report).await;

        for auth in &self.plugins.authenticators {
            auth.logout(&self.session).await;
        }
        crawled?;

        report.targets_dropped = self.targets.dropped();
        report.findings = self.session.teardown(self.snapshot.as_deref())?;
        Ok(report)
    }

    async fn crawl(&mut self, report: &mut EngineReport) -> Result<(), ScanError> {
        loop {
            while let Ok(entry) = self.frontier.try_recv() {
                if self.targets.add_target(entry.request) {
                    trace!("queued target from {}", entry.source);
                }
            }
            let Some(request) = self.targets.next() else {
                break;
            };

            report.targets_scanned += 1;
            self.sink.on_progress(
                &format!("Scanning {}", request.url),
                report.targets_scanned,
                report.targets_scanned + self.targets.len(),
            );

            for plugin in &self.plugins.discoverers {
                let outcome = plugin.discover(&self.session, &request).await;
                self.settle(plugin.name(), &request, outcome, report)?;
            }
            for plugin in &self.plugins.auditors {
                let outcome = plugin.audit(&self.session, &request).await;
                self.settle(plugin.name(), &request, outcome, report)?;
            }

            self.aggregator.flush(self.session.findings(), &self.sink)?;
        }
        Ok(())
    }

    fn settle(
        &self,
        plugin: &str,
        request: &HttpRequest,
        outcome: Result<CampaignOutcome, ScanError>,
        report: &mut EngineReport,
    ) -> Result<(), ScanError> {
        match outcome {
            Ok(CampaignOutcome::Completed { probes, confirmed }) => {
                report.probes += probes;
                debug!("{} on {}: {} probes, {} confirmed", plugin, request.url, probes, confirmed);
                Ok(())
            }
            Ok(CampaignOutcome::Exhausted) => {
                trace!("{} already ran", plugin);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!("{} aborted the scan: {}", plugin, e);
                Err(e)
            }
            Err(e) => {
                warn!("{} failed on {}: {}", plugin, request.url, e);
                self.sink.on_log("warn", &format!("[!] {} failed on {}: {}", plugin, request.url, e));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::ScanEventSink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        findings: Mutex<Vec<String>>,
        warnings: Mutex<Vec<String>>,
    }

    impl ScanEventSink for Recorder {
        fn on_log(&self, level: &str, message: &str) {
            if level == "warn" {
                self.warnings.lock().unwrap().push(message.to_string());
            }
        }

        fn on_finding(&self, finding: &Finding) {
            self.findings.lock().unwrap().push(finding.resource.as_str().to_string());
        }

        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    fn site() -> MockTransport {
        MockTransport::new()
            .page("/admin/", 200, "<html>admin panel</html>")
            .page("/admin/secret/", 200, "<html>secret stuff</html>")
    }

    fn config(dir: &Path) -> ScanConfig {
        let wordlist = dir.join("dirs.txt");
        std::fs::write(&wordlist, "admin\nsecret\nnope\n").unwrap();
        ScanConfig {
            plugins: vec!["dir_bruter".to_string()],
            wordlist: wordlist.display().to_string(),
            output: dir.join("findings.jsonl").display().to_string(),
            snapshot: dir.join("session.json").display().to_string(),
            ..ScanConfig::default()
        }
    }

    #[tokio::test]
    async fn test_crawls_confirmed_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let recorder = Arc::new(Recorder::default());
        let mut engine = ScanEngine::from_config(&config, Arc::new(site()), recorder.clone()).unwrap();
        engine.add_target("http://h/").unwrap();

        let report = engine.run().await.unwrap();
        assert_eq!(report.targets_scanned, 3);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(
            *recorder.findings.lock().unwrap(),
            vec!["http://h/admin/".to_string(), "http://h/admin/secret/".to_string()]
        );

        let written = std::fs::read_to_string(dir.path().join("findings.jsonl")).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(SessionSnapshot::exists(&dir.path().join("session.json")));
    }

    #[tokio::test]
    async fn test_max_targets_bounds_the_crawl() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig { max_targets: 1, ..config(dir.path()) };
        let recorder = Arc::new(Recorder::default());
        let mut engine = ScanEngine::from_config(&config, Arc::new(site()), recorder).unwrap();
        engine.add_target("http://h/").unwrap();

        let report = engine.run().await.unwrap();
        assert_eq!(report.targets_scanned, 1);
        assert_eq!(report.targets_dropped, 1);
        assert_eq!(report.findings.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_does_not_report_twice() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut first = ScanEngine::from_config(&config, Arc::new(site()), Arc::new(Recorder::default())).unwrap();
        first.add_target("http://h/").unwrap();
        first.run().await.unwrap();

        let resumed = ScanConfig { resume: true, ..config };
        let recorder = Arc::new(Recorder::default());
        let mut second = ScanEngine::from_config(&resumed, Arc::new(site()), recorder.clone()).unwrap();
        second.add_target("http://h/").unwrap();
        let report = second.run().await.unwrap();

        assert_eq!(report.findings.len(), 2);
        assert!(recorder.findings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_campaign_errors_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            wordlist: dir.path().join("missing.txt").display().to_string(),
            ..config(dir.path())
        };
        let recorder = Arc::new(Recorder::default());
        let mut engine = ScanEngine::from_config(&config, Arc::new(site()), recorder.clone()).unwrap();
        engine.add_target("http://h/").unwrap();

        let report = engine.run().await.unwrap();
        assert_eq!(report.targets_scanned, 1);
        assert!(report.findings.is_empty());
        assert!(!recorder.warnings.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ScanConfig { workers: 0, ..ScanConfig::default() };
        assert!(ScanEngine::from_config(&config, Arc::new(MockTransport::new()), Arc::new(Recorder::default())).is_err());
    }
}
