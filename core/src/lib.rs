pub mod core;
pub mod error;
pub mod http;
pub mod plugins;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::classifier::{ClassifierSettings, DEFAULT_SIMILARITY};
use crate::core::dispatcher::{DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS};
use crate::core::session::SessionSettings;
use crate::core::store::{Finding, DEFAULT_SPILL_THRESHOLD};
use crate::error::ScanError;
use crate::plugins::auth::generic::GenericAuthOptions;
use crate::plugins::crawl::dir_bruter::DirBruterOptions;
use crate::plugins::{
    DirBruter, GenericAuth, Ldapi, ModSecurity, OracleDiscovery, PluginSet, ShiftOutInBetweenDots,
};
use crate::utils::payload_loader::CandidateList;

pub use crate::core::engine::{EngineReport, ScanEngine};
pub use crate::core::result_aggregator::ResultAggregator;
pub use crate::core::session::ScanSession;
pub use crate::core::target_manager::TargetManager;
pub use crate::http::HttpClient;

/// Plugins enabled when the configuration names none.
pub const DEFAULT_PLUGINS: &[&str] = &["dir_bruter", "oracle_discovery", "ldapi"];

pub const KNOWN_PLUGINS: &[&str] = &[
    "dir_bruter",
    "oracle_discovery",
    "ldapi",
    "shift_out_in_between_dots",
    "mod_security",
    "generic",
];

/// Scan configuration, read from a JSON file and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub target: String,
    pub list_file: String,
    pub workers: usize,
    pub chunk_size: usize,
    pub timeout: u64,
    pub proxy: String,
    pub headers: String,
    pub recursive: bool,
    pub wordlist: String,
    pub signatures: String,
    pub not_found_codes: Vec<u16>,
    pub similarity_threshold: f64,
    pub spill_threshold: usize,
    pub spill_dir: String,
    pub max_targets: usize,
    pub output: String,
    pub snapshot: String,
    pub resume: bool,
    pub plugins: Vec<String>,
    pub auth: Option<GenericAuthOptions>,
    pub verbose: bool,
    pub dry_run: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            list_file: String::new(),
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: 10,
            proxy: String::new(),
            headers: String::new(),
            recursive: true,
            wordlist: String::new(),
            signatures: String::new(),
            not_found_codes: vec![404],
            similarity_threshold: DEFAULT_SIMILARITY,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            spill_dir: String::new(),
            max_targets: 0,
            output: String::new(),
            snapshot: String::new(),
            resume: false,
            plugins: Vec::new(),
            auth: None,
            verbose: false,
            dry_run: false,
        }
    }
}

impl ScanConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.workers == 0 {
            return Err(ScanError::Config("workers must be > 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ScanError::Config("chunk size must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ScanError::Config(format!(
                "similarity threshold {} is outside 0..1",
                self.similarity_threshold
            )));
        }
        if self.not_found_codes.is_empty() {
            return Err(ScanError::Config("at least one not-found status code is needed".to_string()));
        }
        if let Some(unknown) = self.plugins.iter().find(|p| !KNOWN_PLUGINS.contains(&p.as_str())) {
            return Err(ScanError::Config(format!("unknown plugin: {}", unknown)));
        }
        Ok(())
    }

    pub fn header_list(&self) -> Vec<String> {
        if self.headers.is_empty() {
            Vec::new()
        } else {
            self.headers
                .split(';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }

    pub fn parsed_headers(&self) -> Vec<(String, String)> {
        parse_custom_headers(&self.header_list())
    }

    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }

    pub fn output_path(&self) -> Option<&Path> {
        if self.output.is_empty() { None } else { Some(Path::new(&self.output)) }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        if self.snapshot.is_empty() { None } else { Some(Path::new(&self.snapshot)) }
    }

    pub fn enabled_plugins(&self) -> Vec<&str> {
        if self.plugins.is_empty() {
            DEFAULT_PLUGINS.to_vec()
        } else {
            self.plugins.iter().map(String::as_str).collect()
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            workers: self.workers,
            chunk_size: self.chunk_size,
            classifier: ClassifierSettings {
                not_found_codes: self.not_found_codes.iter().copied().collect(),
                similarity_threshold: self.similarity_threshold,
            },
            spill_threshold: self.spill_threshold,
            spill_dir: if self.spill_dir.is_empty() {
                std::env::temp_dir()
            } else {
                PathBuf::from(&self.spill_dir)
            },
        }
    }

    /// Instantiates the enabled plugins. `dir_bruter` without a wordlist is
    /// skipped when it was only enabled by default.
    pub fn build_plugins(&self) -> Result<PluginSet, ScanError> {
        let mut set = PluginSet::default();
        for name in self.enabled_plugins() {
            match name {
                "dir_bruter" => {
                    if self.wordlist.is_empty() {
                        if self.plugins.is_empty() {
                            log::debug!("dir_bruter skipped: no wordlist configured");
                            continue;
                        }
                        return Err(ScanError::Config("dir_bruter needs a wordlist".to_string()));
                    }
                    set.discoverers.push(Arc::new(DirBruter::new(DirBruterOptions {
                        wordlist: CandidateList::file(&self.wordlist),
                        recursive: self.recursive,
                    })));
                }
                "oracle_discovery" => set.discoverers.push(Arc::new(OracleDiscovery::new()?)),
                "ldapi" => {
                    let plugin = if self.signatures.is_empty() {
                        Ldapi::new()
                    } else {
                        Ldapi::with_signatures(CandidateList::file(&self.signatures).to_vec()?)
                    };
                    set.auditors.push(Arc::new(plugin));
                }
                "shift_out_in_between_dots" => set.manglers.push(Arc::new(ShiftOutInBetweenDots)),
                "mod_security" => set.manglers.push(Arc::new(ModSecurity)),
                "generic" => {
                    let options = self
                        .auth
                        .clone()
                        .ok_or_else(|| ScanError::Config("generic auth needs an auth section".to_string()))?;
                    set.authenticators.push(Arc::new(GenericAuth::new(options)?));
                }
                other => return Err(ScanError::Config(format!("unknown plugin: {}", other))),
            }
        }
        Ok(set)
    }
}

pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next().unwrap_or("").trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

/// Output abstraction for the scan pipeline.
pub trait ScanEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_finding(&self, finding: &Finding);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ScanEventSink>;

/// Terminal output sink for CLI usage.
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ScanEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        use std::io::Write;
        let colored = match level {
            "success" => message.green().to_string(),
            "error"   => message.red().to_string(),
            "warn"    => message.yellow().to_string(),
            "phase"   => message.bright_cyan().bold().to_string(),
            _         => message.to_string(),
        };
        print!("{}\r\n", colored);
        std::io::stdout().flush().ok();
    }

    fn on_finding(&self, finding: &Finding) {
        use colored::*;
        use std::io::Write;
        let out = |text: &str| {
            print!("{}\r\n", text);
            std::io::stdout().flush().ok();
        };
        out(&format!(
            "\n{} #{} {} [{}]",
            "[+]".green().bold(),
            finding.seq,
            finding.title.red().bold(),
            finding.severity
        ));
        out(&format!("    Resource: {}", finding.resource.as_str().white()));
        out(&format!("    Evidence: {}", finding.evidence.bright_yellow()));
        out(&format!(
            "    Plugin:   {} | Kind [{}] | Response [{}]",
            finding.plugin.cyan(),
            finding.kind.blue(),
            finding.response_id.to_string().dimmed()
        ));
        out(&"──────────────────────────────────────────".dimmed().to_string());
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        use std::io::Write;
        if total > 0 {
            print!("{}\r\n", format!("[*] {} ({}/{})", phase, current, total).bright_cyan());
        } else {
            print!("{}\r\n", format!("[*] {}", phase).bright_cyan());
        }
        std::io::stdout().flush().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.json");
        std::fs::write(&path, r#"{"target":"http://h/","notFoundCodes":[404,410],"maxTargets":5}"#).unwrap();
        let config = ScanConfig::from_file(&path).unwrap();
        assert_eq!(config.target, "http://h/");
        assert_eq!(config.max_targets, 5);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert!(config.recursive);
        let settings = config.session_settings();
        assert!(settings.classifier.not_found_codes.contains(&410));
        assert_eq!(settings.classifier.similarity_threshold, DEFAULT_SIMILARITY);
    }

    #[test]
    fn test_validate() {
        assert!(ScanConfig::default().validate().is_ok());
        let config = ScanConfig { workers: 0, ..ScanConfig::default() };
        assert!(config.validate().is_err());
        let config = ScanConfig { plugins: vec!["sqli".to_string()], ..ScanConfig::default() };
        assert!(config.validate().is_err());
        let config = ScanConfig { similarity_threshold: 1.5, ..ScanConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_plugins_skip_dir_bruter_without_wordlist() {
        let set = ScanConfig::default().build_plugins().unwrap();
        assert_eq!(set.names(), vec!["oracle_discovery", "ldapi"]);
    }

    #[test]
    fn test_explicit_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let wordlist = dir.path().join("dirs.txt");
        std::fs::write(&wordlist, "admin\nimages\n").unwrap();
        let config = ScanConfig {
            plugins: vec!["dir_bruter".into(), "mod_security".into()],
            wordlist: wordlist.display().to_string(),
            ..ScanConfig::default()
        };
        let set = config.build_plugins().unwrap();
        assert_eq!(set.names(), vec!["dir_bruter", "mod_security"]);

        let config = ScanConfig { plugins: vec!["dir_bruter".into()], ..ScanConfig::default() };
        assert!(config.build_plugins().is_err());
        let config = ScanConfig { plugins: vec!["generic".into()], ..ScanConfig::default() };
        assert!(config.build_plugins().is_err());
    }

    #[test]
    fn test_parse_custom_headers() {
        let config = ScanConfig { headers: "Cookie: a=b; X-Test:1;;".to_string(), ..ScanConfig::default() };
        assert_eq!(
            config.parsed_headers(),
            vec![("Cookie".to_string(), "a=b".to_string()), ("X-Test".to_string(), "1".to_string())]
        );
    }
}
