use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use regex::Regex;

use crate::core::frontier::FrontierEntry;
use crate::core::session::ScanSession;
use crate::core::store::{DedupStore, Finding};
use crate::core::verifier::Verification;
use crate::error::ScanError;
use crate::http::{HttpRequest, Response};
use crate::plugins::{CampaignOutcome, Discoverer, Plugin, RunOnce};

const NAME: &str = "oracle_discovery";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OracleApp {
    PageEngine,
    Reports,
}

struct OraclePage {
    path: &'static str,
    app: OracleApp,
    signature: Regex,
}

/// Requests a few well-known Oracle Application Server pages under the site
/// root and reports the ones that identify themselves. Runs once.
pub struct OracleDiscovery {
    pages: Vec<OraclePage>,
    ppe_version: Regex,
    reports_version: Regex,
    run_once: RunOnce,
}

impl OracleDiscovery {
    pub fn new() -> Result<Self, ScanError> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| ScanError::Config(e.to_string()));
        Ok(Self {
            pages: vec![
                OraclePage {
                    path: "/portal/page",
                    app: OracleApp::PageEngine,
                    signature: compile(
                        r"(?s)^<html><head><title>PPE is working</title></head><body>PPE .*?is working\.</body></html>",
                    )?,
                },
                OraclePage {
                    path: "/reports/rwservlet/showenv",
                    app: OracleApp::Reports,
                    signature: compile(r"(?s)^.*<title>Oracle Application Server Reports Services - Servlet</title>.*")?,
                },
            ],
            ppe_version: compile(
                r"^<html><head><title>PPE is working</title></head><body>PPE version (.*?) is working\.</body></html>",
            )?,
            reports_version: compile(r"Reports Servlet .*? (.*)")?,
            run_once: RunOnce::new(true),
        })
    }

    fn describe(&self, app: OracleApp, response: &Response) -> String {
        let url = response.resource.as_str();
        match app {
            OracleApp::PageEngine => match self.ppe_version.captures(&response.body) {
                Some(caps) => format!(
                    "Oracle Parallel Page Engine version \"{}\" was detected at: \"{}\".",
                    &caps[1], url
                ),
                None => format!("Oracle Parallel Page Engine was detected at: {}", url),
            },
            OracleApp::Reports => match self.reports_version.captures(&response.body) {
                Some(caps) => format!("Oracle reports version \"{}\" was detected at: {}", caps[1].trim(), url),
                None => {
                    error!("failed to parse the Oracle reports version from {}", url);
                    format!("Oracle reports was detected at: {}", url)
                }
            },
        }
    }
}

impl Plugin for OracleDiscovery {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Fetches well-known Oracle Application Server URLs and parses what they reveal"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["grep.path_disclosure"]
    }
}

#[async_trait]
impl Discoverer for OracleDiscovery {
    async fn discover(&self, session: &Arc<ScanSession>, request: &HttpRequest) -> Result<CampaignOutcome, ScanError> {
        if !self.run_once.enter() {
            return Ok(CampaignOutcome::Exhausted);
        }

        let base = request.resource().base_url();
        let cached = session.dispatcher().with_cache(true);
        let mut probes = 0;
        let mut confirmed = 0;

        for page in &self.pages {
            let target = match base.join(page.path) {
                Ok(target) => target,
                Err(e) => {
                    debug!("cannot build {} under {}: {}", page.path, base, e);
                    continue;
                }
            };
            session.visited().add(target.clone())?;
            probes += 1;

            let response = match cached.send(&HttpRequest::get(target.url().clone())).await {
                Ok(response) => response,
                Err(e) => {
                    debug!("{} skipped: {}", target, e);
                    continue;
                }
            };

            let verdict = session.classifier().is_not_found(&response).await?;
            if verdict.is_not_found() {
                continue;
            }
            if verdict.needs_verification()
                && session.verifier().verify(&target, target.file_name(), false).await? == Verification::FalsePositive
            {
                continue;
            }

            session.push(FrontierEntry::from_response(&response, NAME));

            if page.signature.is_match(&response.body) {
                let description = self.describe(page.app, &response);
                let finding = Finding::new(NAME, "oracle_application", target.clone(), description.clone(), response.id)
                    .with_title("Oracle application");
                if session.report(finding)?.is_some() {
                    confirmed += 1;
                    info!("{}", description);
                }
            } else {
                debug!(
                    "oracle_discovery found the URL {} but failed to parse it, content: {:?}",
                    target, response.body
                );
            }
        }

        Ok(CampaignOutcome::Completed { probes, confirmed })
    }
}
