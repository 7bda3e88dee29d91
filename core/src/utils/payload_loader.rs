use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// An ordered list of candidate values (wordlist entries, payloads,
/// signatures).
///
/// `iter()` starts a fresh traversal on every call: file-backed lists are
/// re-opened, so two campaigns never share a cursor. Entries that are empty
/// after trimming are skipped; file-backed lists also skip `#` comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateList {
    Inline(Vec<String>),
    File(PathBuf),
}

pub type CandidateIter = Box<dyn Iterator<Item = String> + Send>;

impl CandidateList {
    pub fn inline<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CandidateList::Inline(values.into_iter().map(Into::into).collect())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        CandidateList::File(path.into())
    }

    pub fn iter(&self) -> Result<CandidateIter, ScanError> {
        match self {
            CandidateList::Inline(values) => {
                let values = values.clone();
                Ok(Box::new(values.into_iter().filter(|v| {
                    let keep = !v.trim().is_empty();
                    if !keep {
                        trace!("skipping blank candidate");
                    }
                    keep
                })))
            }
            CandidateList::File(path) => {
                let file = fs::File::open(path).map_err(|source| ScanError::Wordlist {
                    path: path.clone(),
                    source,
                })?;
                Ok(Box::new(
                    BufReader::new(file)
                        .split(b'\n')
                        .map_while(Result::ok)
                        .filter_map(|raw| match String::from_utf8(raw) {
                            Ok(line) => wordlist_entry(&line),
                            Err(e) => {
                                trace!("skipping line that is not UTF-8: {}", e);
                                None
                            }
                        }),
                ))
            }
        }
    }

    /// Reads the whole list; for signature sets that are used as a unit.
    pub fn to_vec(&self) -> Result<Vec<String>, ScanError> {
        Ok(self.iter()?.collect())
    }

    pub fn source(&self) -> String {
        match self {
            CandidateList::Inline(values) => format!("<{} inline entries>", values.len()),
            CandidateList::File(path) => path.display().to_string(),
        }
    }
}

fn wordlist_entry(line: &str) -> Option<String> {
    let entry = line.trim();
    if entry.is_empty() || entry.starts_with('#') {
        trace!("skipping wordlist line {:?}", line);
        return None;
    }
    Some(entry.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn wordlist(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_file_skips_comments_and_blanks() {
        let file = wordlist(&["admin", "backup", "#comment", "", "   ", "  images  "]);
        let list = CandidateList::file(file.path());
        let entries = list.to_vec().unwrap();
        assert_eq!(entries, vec!["admin", "backup", "images"]);
    }

    #[test]
    fn test_non_utf8_line_is_skipped_alone() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"admin\ncaf\xe9\nbackup\r\nimages\n").unwrap();
        let entries = CandidateList::file(file.path()).to_vec().unwrap();
        assert_eq!(entries, vec!["admin", "backup", "images"]);
    }

    #[test]
    fn test_iteration_restarts() {
        let file = wordlist(&["a", "b", "c"]);
        let list = CandidateList::file(file.path());
        let mut first = list.iter().unwrap();
        assert_eq!(first.next().as_deref(), Some("a"));
        let second: Vec<String> = list.iter().unwrap().collect();
        assert_eq!(second, vec!["a", "b", "c"]);
        assert_eq!(first.next().as_deref(), Some("b"));
    }

    #[test]
    fn test_inline_keeps_hash_but_drops_blank() {
        let list = CandidateList::inline(["#notacomment", " ", "x"]);
        assert_eq!(list.to_vec().unwrap(), vec!["#notacomment", "x"]);
    }

    #[test]
    fn test_missing_file_is_wordlist_error() {
        let err = CandidateList::file("/nonexistent/vigil/words.txt").iter().err().unwrap();
        assert!(matches!(err, ScanError::Wordlist { .. }));
        assert!(!err.is_fatal());
    }
}
