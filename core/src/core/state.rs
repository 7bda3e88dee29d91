//! Session state persistence.
//!
//! A snapshot holds the findings (with their sequence numbers) and the
//! visited resources of one session. It is written at teardown with an
//! atomic write (tmp + rename) so a killed process never leaves a torn file,
//! and can seed a later session that resumes the same scan.

use std::fs;
use std::path::{Path, PathBuf};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::store::Finding;
use crate::error::ScanError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub findings: Vec<Finding>,
    pub visited: Vec<String>,
    pub saved_at: String,
}

impl SessionSnapshot {
    pub fn new(findings: Vec<Finding>, visited: Vec<String>) -> Self {
        Self {
            findings,
            visited,
            saved_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ScanError> {
        let tmp = tmp_path(path);
        let json = serde_json::to_string_pretty(self).map_err(|e| ScanError::Snapshot(e.to_string()))?;
        fs::write(&tmp, json).map_err(|e| ScanError::Snapshot(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, path).map_err(|e| ScanError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let data = fs::read_to_string(path).map_err(|e| ScanError::Snapshot(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&data).map_err(|e| ScanError::Snapshot(format!("{}: {}", path.display(), e)))
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Resource;

    #[test]
    fn test_save_load_keeps_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut finding = Finding::new(
            "dir_bruter",
            "directory",
            Resource::parse("http://h/images/").unwrap(),
            "HTTP 200",
            7,
        );
        finding.seq = 3;
        SessionSnapshot::new(vec![finding], vec!["http://h/images/".to_string()])
            .save(&path)
            .unwrap();

        assert!(SessionSnapshot::exists(&path));
        assert!(!tmp_path(&path).exists());
        let loaded = SessionSnapshot::load(&path).unwrap();
        assert_eq!(loaded.findings[0].seq, 3);
        assert_eq!(loaded.findings[0].response_id, 7);
        assert_eq!(loaded.visited, vec!["http://h/images/"]);
        assert!(chrono::DateTime::parse_from_rfc3339(&loaded.saved_at).is_ok(), "{}", loaded.saved_at);
    }

    #[test]
    fn test_load_garbage_is_snapshot_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(SessionSnapshot::load(&path), Err(ScanError::Snapshot(_))));
    }
}
