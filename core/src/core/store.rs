//! Session-scoped dedup structures.
//!
//! Both structures serialize every mutation through a mutex so that
//! `add_if_absent` answers "new" exactly once per key, whatever the number of
//! concurrent callers. A poisoned lock means that guarantee is gone and is
//! reported as a fatal [`ScanError::Invariant`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use rand::distr::{Alphanumeric, SampleString};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::http::Resource;

/// Above this many entries the visited set moves to disk.
pub const DEFAULT_SPILL_THRESHOLD: usize = 100_000;

/// Common contract of the visited set and the findings registry.
pub trait DedupStore {
    type Key: ?Sized;
    type Entry;

    fn contains(&self, key: &Self::Key) -> Result<bool, ScanError>;

    /// Inserts the entry; an existing entry is kept as is.
    fn add(&self, entry: Self::Entry) -> Result<(), ScanError> {
        self.add_if_absent(entry).map(|_| ())
    }

    /// Atomic test-and-insert. `true` only for the first insertion of a key.
    fn add_if_absent(&self, entry: Self::Entry) -> Result<bool, ScanError>;

    fn len(&self) -> Result<usize, ScanError>;

    fn is_empty(&self) -> Result<bool, ScanError> {
        self.len().map(|n| n == 0)
    }
}

/// SQLite table of resource identities, private to one session.
struct DiskSet {
    conn: Connection,
    path: PathBuf,
}

impl DiskSet {
    fn create(dir: &Path) -> Result<Self, ScanError> {
        let name = format!("vigil-visited-{}.db", Alphanumeric.sample_string(&mut rand::rng(), 12));
        let path = dir.join(name);
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "OFF")?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute_batch("CREATE TABLE IF NOT EXISTS visited (id TEXT PRIMARY KEY) WITHOUT ROWID;")?;
        Ok(Self { conn, path })
    }

    fn insert(&self, id: &str) -> Result<bool, ScanError> {
        let changed = self
            .conn
            .execute("INSERT OR IGNORE INTO visited (id) VALUES (?1)", params![id])?;
        Ok(changed == 1)
    }

    fn contains(&self, id: &str) -> Result<bool, ScanError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM visited WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn len(&self) -> Result<usize, ScanError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM visited", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn bulk_insert<'a>(&mut self, ids: impl Iterator<Item = &'a String>) -> Result<(), ScanError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO visited (id) VALUES (?1)")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn all(&self) -> Result<Vec<String>, ScanError> {
        let mut stmt = self.conn.prepare("SELECT id FROM visited")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl Drop for DiskSet {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

enum Backend {
    Memory(HashSet<String>),
    Disk(DiskSet),
}

/// Resources already probed in this session. Monotonic.
pub struct VisitedSet {
    backend: Mutex<Backend>,
    spill_threshold: usize,
    spill_dir: PathBuf,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::with_spill(DEFAULT_SPILL_THRESHOLD, std::env::temp_dir())
    }

    pub fn with_spill(threshold: usize, dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Mutex::new(Backend::Memory(HashSet::new())),
            spill_threshold: threshold,
            spill_dir: dir.into(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Backend>, ScanError> {
        self.backend.lock().map_err(|_| ScanError::poisoned("visited set"))
    }

    pub fn is_on_disk(&self) -> Result<bool, ScanError> {
        Ok(matches!(*self.lock()?, Backend::Disk(_)))
    }

    /// Every identity seen so far, in no particular order.
    pub fn identities(&self) -> Result<Vec<String>, ScanError> {
        match &*self.lock()? {
            Backend::Memory(set) => Ok(set.iter().cloned().collect()),
            Backend::Disk(disk) => disk.all(),
        }
    }

    fn spill(&self, backend: &mut Backend) -> Result<(), ScanError> {
        let Backend::Memory(set) = backend else {
            return Ok(());
        };
        let mut disk = DiskSet::create(&self.spill_dir)?;
        disk.bulk_insert(set.iter())?;
        info!(
            "visited set passed {} entries, moved to {}",
            set.len(),
            disk.path.display()
        );
        *backend = Backend::Disk(disk);
        Ok(())
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupStore for VisitedSet {
    type Key = Resource;
    type Entry = Resource;

    fn contains(&self, key: &Resource) -> Result<bool, ScanError> {
        match &*self.lock()? {
            Backend::Memory(set) => Ok(set.contains(key.as_str())),
            Backend::Disk(disk) => disk.contains(key.as_str()),
        }
    }

    fn add_if_absent(&self, entry: Resource) -> Result<bool, ScanError> {
        let mut backend = self.lock()?;
        let inserted = match &mut *backend {
            Backend::Memory(set) => set.insert(entry.as_str().to_string()),
            Backend::Disk(disk) => return disk.insert(entry.as_str()),
        };
        let over = matches!(&*backend, Backend::Memory(set) if set.len() > self.spill_threshold);
        if inserted && over {
            self.spill(&mut backend)?;
        }
        Ok(inserted)
    }

    fn len(&self) -> Result<usize, ScanError> {
        match &*self.lock()? {
            Backend::Memory(set) => Ok(set.len()),
            Backend::Disk(disk) => disk.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Uniqueness of a finding: (plugin, kind, resource).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FindingKey {
    pub plugin: String,
    pub kind: String,
    pub resource: Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// report order, assigned by the registry
    pub seq: u64,
    pub plugin: String,
    pub kind: String,
    pub title: String,
    pub severity: Severity,
    pub resource: Resource,
    pub evidence: String,
    pub response_id: u64,
}

impl Finding {
    pub fn new(
        plugin: &str,
        kind: &str,
        resource: Resource,
        evidence: impl Into<String>,
        response_id: u64,
    ) -> Self {
        Self {
            seq: 0,
            plugin: plugin.to_string(),
            kind: kind.to_string(),
            title: kind.to_string(),
            severity: Severity::Info,
            resource,
            evidence: evidence.into(),
            response_id,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn key(&self) -> FindingKey {
        FindingKey {
            plugin: self.plugin.clone(),
            kind: self.kind.clone(),
            resource: self.resource.clone(),
        }
    }
}

#[derive(Default)]
struct Registry {
    index: HashMap<FindingKey, usize>,
    findings: Vec<Finding>,
}

/// Reported findings, at most one per [`FindingKey`], numbered in the order
/// they were first recorded.
#[derive(Default)]
pub struct FindingRegistry {
    inner: Mutex<Registry>,
}

impl FindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from previously saved findings, keeping their
    /// sequence numbers.
    pub fn from_findings(mut findings: Vec<Finding>) -> Self {
        findings.sort_by_key(|f| f.seq);
        let mut registry = Registry::default();
        for finding in findings {
            let key = finding.key();
            if !registry.index.contains_key(&key) {
                registry.index.insert(key, registry.findings.len());
                registry.findings.push(finding);
            }
        }
        Self {
            inner: Mutex::new(registry),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Registry>, ScanError> {
        self.inner.lock().map_err(|_| ScanError::poisoned("findings registry"))
    }

    /// Stores the finding if its key is new and returns its sequence number.
    pub fn record(&self, mut finding: Finding) -> Result<Option<u64>, ScanError> {
        let mut registry = self.lock()?;
        let key = finding.key();
        if registry.index.contains_key(&key) {
            debug!("duplicate finding {} / {} at {} dropped", key.plugin, key.kind, key.resource);
            return Ok(None);
        }
        let seq = registry.findings.last().map(|f| f.seq + 1).unwrap_or(1);
        finding.seq = seq;
        let position = registry.findings.len();
        registry.index.insert(key, position);
        registry.findings.push(finding);
        Ok(Some(seq))
    }

    /// All findings ordered by sequence number.
    pub fn findings(&self) -> Result<Vec<Finding>, ScanError> {
        Ok(self.lock()?.findings.clone())
    }

    /// Findings recorded by one plugin under one kind.
    pub fn by_kind(&self, plugin: &str, kind: &str) -> Result<Vec<Finding>, ScanError> {
        Ok(self
            .lock()?
            .findings
            .iter()
            .filter(|f| f.plugin == plugin && f.kind == kind)
            .cloned()
            .collect())
    }
}

impl DedupStore for FindingRegistry {
    type Key = FindingKey;
    type Entry = Finding;

    fn contains(&self, key: &FindingKey) -> Result<bool, ScanError> {
        Ok(self.lock()?.index.contains_key(key))
    }

    fn add_if_absent(&self, entry: Finding) -> Result<bool, ScanError> {
        self.record(entry).map(|seq| seq.is_some())
    }

    fn len(&self) -> Result<usize, ScanError> {
        Ok(self.lock()?.findings.len())
    }
}
