use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::core::store::{Finding, FindingRegistry};
use crate::error::ScanError;
use crate::SinkRef;

/// Streams findings out of the registry in sequence order: to the event sink
/// and, when a path is given, as JSON lines to a file.
pub struct ResultAggregator {
    file: Option<File>,
    last_seq: u64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            file: None,
            last_seq: 0,
        }
    }

    pub fn with_output(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(file),
            last_seq: 0,
        })
    }

    /// Skips findings up to `seq`, e.g. the ones restored from a snapshot.
    pub fn resume_after(mut self, seq: u64) -> Self {
        self.last_seq = seq;
        self
    }

    /// Emits every finding recorded since the last call. Returns how many.
    pub fn flush(&mut self, registry: &FindingRegistry, sink: &SinkRef) -> Result<usize, ScanError> {
        let fresh: Vec<Finding> = registry
            .findings()?
            .into_iter()
            .filter(|f| f.seq > self.last_seq)
            .collect();

        for finding in &fresh {
            sink.on_finding(finding);
            if let Some(file) = self.file.as_mut() {
                match serde_json::to_string(finding) {
                    Ok(line) => {
                        if let Err(e) = writeln!(file, "{}", line) {
                            sink.on_log("error", &format!("[!] Failed to write finding #{}: {}", finding.seq, e));
                        }
                    }
                    Err(e) => sink.on_log("error", &format!("[!] Failed to encode finding #{}: {}", finding.seq, e)),
                }
            }
            self.last_seq = finding.seq;
        }
        Ok(fresh.len())
    }

    pub fn report_summary(findings: &[Finding], sink: &SinkRef) {
        if findings.is_empty() {
            sink.on_log("success", "[+] No findings.");
            return;
        }
        sink.on_log("warn", &format!("[+] {} finding(s):", findings.len()));
        for f in findings {
            sink.on_log(
                if f.severity >= crate::core::store::Severity::Medium { "error" } else { "info" },
                &format!("  #{} [{}] {} → {} ({})", f.seq, f.severity, f.title, f.resource, f.evidence),
            );
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}
