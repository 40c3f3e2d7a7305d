//! Shared pipeline state.
//!
//! Configuration, the per-path file tracker and the archive ledger live
//! behind a single lock so a reader never sees one of them updated without
//! the others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use autoproc_directory_watcher::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ProcessingConfig;

/// Processing state of a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Seen, waiting for writes to settle.
    Detected,

    /// Claimed for processing; format being determined.
    Validating,

    /// Backup, conversion and archiving under way.
    Converting,

    /// Processing finished. The original was archived if archiving was
    /// enabled at the time, otherwise it was left in place.
    Archived,

    /// Processing failed; see [`WatchedFile::failure`].
    Failed,
}

impl FileState {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Validating | Self::Converting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Failed)
    }
}

/// Tracker entry for one input path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
    pub fingerprint: Option<Fingerprint>,
    pub state: FileState,

    /// JSON output written for this file, if any.
    pub output: Option<PathBuf>,

    /// Why processing failed.
    pub failure: Option<String>,
}

impl WatchedFile {
    fn new(path: &Path, fingerprint: Option<Fingerprint>, state: FileState) -> Self {
        Self {
            path: path.to_path_buf(),
            detected_at: Utc::now(),
            fingerprint,
            state,
            output: None,
            failure: None,
        }
    }

    /// Size at detection.
    pub fn size(&self) -> Option<u64> {
        self.fingerprint.map(|f| f.size)
    }
}

/// Ledger record of an original moved into the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub original: PathBuf,
    pub archived: PathBuf,
    pub archived_at: DateTime<Utc>,
    pub fingerprint: Option<Fingerprint>,
}

impl ArchiveEntry {
    fn matches(&self, path: &Path, fingerprint: Fingerprint) -> bool {
        self.original == path && self.fingerprint == Some(fingerprint)
    }
}

/// Result of trying to claim a path for processing.
#[derive(Debug, Clone)]
pub enum Claim {
    /// The caller owns the path until it calls `complete` or `fail`.
    /// Carries the configuration snapshot to process with.
    Granted(ProcessingConfig),

    /// This version of the file was already processed.
    Duplicate,

    /// Another attempt is running.
    InFlight,
}

/// Number of files in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub detected: usize,
    pub validating: usize,
    pub converting: usize,

    /// Files processed successfully since startup.
    pub archived: usize,

    /// Files whose last attempt failed and that are still in the input
    /// directory.
    pub failed: usize,
}

#[derive(Debug)]
struct Inner {
    config: ProcessingConfig,

    /// Files waiting to settle or being processed.
    files: HashMap<PathBuf, WatchedFile>,

    /// Last version processed without archiving, per path still present in
    /// the input directory.
    completed: HashMap<PathBuf, Fingerprint>,

    /// Failed files, kept for `status` and retry decisions until the path
    /// is processed or disappears.
    failed: HashMap<PathBuf, WatchedFile>,

    ledger: Vec<ArchiveEntry>,
    processed: usize,
}

impl Inner {
    /// Whether this version of `path` was already handled.
    fn is_done(&self, path: &Path, fingerprint: Fingerprint, retry_failed: bool) -> bool {
        self.ledger.iter().any(|e| e.matches(path, fingerprint))
            || self.completed.get(path) == Some(&fingerprint)
            || (!retry_failed
                && self
                    .failed
                    .get(path)
                    .is_some_and(|f| f.fingerprint == Some(fingerprint)))
    }
}

/// Cloneable handle to the pipeline state.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<RwLock<Inner>>,
}

impl SharedState {
    pub fn new(config: ProcessingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                config,
                files: HashMap::new(),
                completed: HashMap::new(),
                failed: HashMap::new(),
                ledger: Vec::new(),
                processed: 0,
            })),
        }
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> ProcessingConfig {
        self.inner.read().await.config.clone()
    }

    /// Mutate the configuration. This is the only write path.
    pub async fn update<R>(&self, f: impl FnOnce(&mut ProcessingConfig) -> R) -> R {
        let mut inner = self.inner.write().await;
        f(&mut inner.config)
    }

    /// Record a detection event. Entries being processed and versions
    /// already handled are left alone.
    pub async fn detected(&self, path: &Path, fingerprint: Option<Fingerprint>) {
        let mut inner = self.inner.write().await;
        if inner.files.get(path).is_some_and(|f| f.state.is_in_flight()) {
            return;
        }
        if let Some(fingerprint) = fingerprint {
            if inner.is_done(path, fingerprint, false) {
                return;
            }
        }
        inner.files.insert(
            path.to_path_buf(),
            WatchedFile::new(path, fingerprint, FileState::Detected),
        );
    }

    /// Forget a path that left the input directory. Entries being
    /// processed are kept; the attempt finishes on its own.
    pub async fn removed(&self, path: &Path) {
        let mut inner = self.inner.write().await;
        if inner
            .files
            .get(path)
            .is_some_and(|f| f.state == FileState::Detected)
        {
            inner.files.remove(path);
        }
        inner.completed.remove(path);
        inner.failed.remove(path);
    }

    /// Atomically check and claim `path` at `fingerprint`.
    ///
    /// A version already in the ledger or already completed is a duplicate.
    /// A version that failed is a duplicate too unless `retry_failed`.
    pub async fn claim(&self, path: &Path, fingerprint: Fingerprint, retry_failed: bool) -> Claim {
        let mut inner = self.inner.write().await;

        if inner.files.get(path).is_some_and(|f| f.state.is_in_flight()) {
            return Claim::InFlight;
        }
        if inner.is_done(path, fingerprint, retry_failed) {
            return Claim::Duplicate;
        }

        inner.files.insert(
            path.to_path_buf(),
            WatchedFile::new(path, Some(fingerprint), FileState::Validating),
        );
        Claim::Granted(inner.config.clone())
    }

    /// Move a claimed path to `state`.
    pub async fn transition(&self, path: &Path, state: FileState) {
        let mut inner = self.inner.write().await;
        if let Some(file) = inner.files.get_mut(path) {
            debug!("{}: {:?} -> {state:?}", path.display(), file.state);
            file.state = state;
        }
    }

    /// Finish a claimed path successfully and stop tracking it. Archived
    /// versions are remembered by the ledger, others by their fingerprint.
    pub async fn complete(&self, path: &Path, archive: Option<ArchiveEntry>) {
        let mut inner = self.inner.write().await;
        let file = inner.files.remove(path);
        inner.failed.remove(path);
        inner.processed += 1;
        match archive {
            Some(entry) => {
                inner.completed.remove(path);
                inner.ledger.push(entry);
            }
            None => {
                if let Some(fingerprint) = file.and_then(|f| f.fingerprint) {
                    inner.completed.insert(path.to_path_buf(), fingerprint);
                }
            }
        }
    }

    /// Finish a claimed path with a failure.
    pub async fn fail(&self, path: &Path, output: Option<PathBuf>, reason: String) {
        let mut inner = self.inner.write().await;
        if let Some(mut file) = inner.files.remove(path) {
            file.state = FileState::Failed;
            file.output = output;
            file.failure = Some(reason);
            inner.completed.remove(path);
            inner.failed.insert(path.to_path_buf(), file);
        }
    }

    /// Append reconstructed ledger entries, skipping ones already present.
    pub async fn extend_ledger(&self, entries: impl IntoIterator<Item = ArchiveEntry>) {
        let mut inner = self.inner.write().await;
        for entry in entries {
            if !inner.ledger.iter().any(|e| e.archived == entry.archived) {
                inner.ledger.push(entry);
            }
        }
    }

    /// Tracker entry of a file waiting or being processed, or of a failed
    /// file.
    pub async fn file(&self, path: &Path) -> Option<WatchedFile> {
        let inner = self.inner.read().await;
        inner
            .files
            .get(path)
            .or_else(|| inner.failed.get(path))
            .cloned()
    }

    /// Where `path` stands, including files no longer tracked because they
    /// were processed.
    pub async fn state_of(&self, path: &Path) -> Option<FileState> {
        let inner = self.inner.read().await;
        if let Some(file) = inner.files.get(path) {
            return Some(file.state);
        }
        if inner.failed.contains_key(path) {
            return Some(FileState::Failed);
        }
        let processed =
            inner.completed.contains_key(path) || inner.ledger.iter().any(|e| e.original == path);
        processed.then_some(FileState::Archived)
    }

    pub async fn ledger(&self) -> Vec<ArchiveEntry> {
        self.inner.read().await.ledger.clone()
    }

    /// Number of entries held for deduplication and reporting, ledger
    /// excluded.
    pub async fn tracked(&self) -> usize {
        let inner = self.inner.read().await;
        inner.files.len() + inner.completed.len() + inner.failed.len()
    }

    pub async fn counts(&self) -> StateCounts {
        let inner = self.inner.read().await;
        let mut counts = StateCounts {
            archived: inner.processed,
            failed: inner.failed.len(),
            ..StateCounts::default()
        };
        for file in inner.files.values() {
            match file.state {
                FileState::Detected => counts.detected += 1,
                FileState::Validating => counts.validating += 1,
                FileState::Converting => counts.converting += 1,
                FileState::Archived | FileState::Failed => {}
            }
        }
        counts
    }

    /// Failed paths with their reasons, sorted by path.
    pub async fn failures(&self) -> Vec<(PathBuf, String)> {
        let inner = self.inner.read().await;
        let mut failures: Vec<_> = inner
            .failed
            .values()
            .map(|f| (f.path.clone(), f.failure.clone().unwrap_or_default()))
            .collect();
        failures.sort();
        failures
    }
}
