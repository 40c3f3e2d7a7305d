//! Write-quiescence tracking.
//!
//! A file is reported stable once its [`Fingerprint`] has been observed
//! unchanged for the configured window. This is a heuristic: a writer that
//! pauses for longer than the window will be read early.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::event::Fingerprint;

#[derive(Debug, Clone)]
struct Pending {
    fingerprint: Option<Fingerprint>,
    since: Instant,
}

/// A file that has stopped changing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableFile {
    /// Path to the file.
    pub path: PathBuf,

    /// Fingerprint that stayed unchanged.
    pub fingerprint: Fingerprint,
}

/// Tracks files that were recently created or modified.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    /// Create a debouncer with the given quiescence window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record activity on `path`. Restarts the window if the fingerprint
    /// differs from the last observation. Returns `true` if the path was
    /// not pending before.
    pub fn observe(&mut self, path: &Path, fingerprint: Option<Fingerprint>, now: Instant) -> bool {
        match self.pending.get_mut(path) {
            Some(pending) => {
                if pending.fingerprint != fingerprint {
                    pending.fingerprint = fingerprint;
                    pending.since = now;
                }
                false
            }
            None => {
                self.pending.insert(
                    path.to_path_buf(),
                    Pending {
                        fingerprint,
                        since: now,
                    },
                );
                true
            }
        }
    }

    /// Stop tracking `path`.
    pub fn forget(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Re-check every pending file with `probe` and return those that have
    /// been unchanged for the whole window. Files that vanished are dropped.
    pub fn poll<F>(&mut self, now: Instant, mut probe: F) -> Vec<StableFile>
    where
        F: FnMut(&Path) -> Option<Fingerprint>,
    {
        let mut stable = Vec::new();

        self.pending.retain(|path, pending| {
            let Some(current) = probe(path) else {
                return false;
            };

            if pending.fingerprint != Some(current) {
                pending.fingerprint = Some(current);
                pending.since = now;
                return true;
            }

            if now.duration_since(pending.since) >= self.window {
                stable.push(StableFile {
                    path: path.clone(),
                    fingerprint: current,
                });
                return false;
            }

            true
        });

        stable.sort_by(|a, b| a.path.cmp(&b.path));
        stable
    }

    /// Number of files waiting to settle.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no files are waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
