//! Scanning of files already present in the watched directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DirectoryConfig;
use crate::error::{Result, WatcherError};
use crate::event::Fingerprint;

/// A file found by a directory scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Full path to the file.
    pub path: PathBuf,

    /// Size and modification time at scan time.
    pub fingerprint: Fingerprint,

    /// When the file was indexed.
    pub indexed_at: DateTime<Utc>,
}

impl IndexedFile {
    /// Create an indexed file from a path. Returns `None` if the path is
    /// not a regular file.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let fingerprint = Fingerprint::of(&path)?;

        Some(Self {
            path,
            fingerprint,
            indexed_at: Utc::now(),
        })
    }

    /// When the file was last modified.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.fingerprint.modified.map(DateTime::<Utc>::from)
    }
}

/// Lists the regular files directly inside a directory.
pub struct FileIndexer {
    config: DirectoryConfig,
}

impl FileIndexer {
    /// Create a new file indexer.
    pub fn new(config: DirectoryConfig) -> Self {
        Self { config }
    }

    /// Scan the top level of the directory, skipping excluded paths.
    pub fn scan(&self) -> Result<Vec<IndexedFile>> {
        let root = &self.config.path;
        if !root.is_dir() {
            return Err(WatcherError::DirectoryNotFound(root.display().to_string()));
        }

        let start = std::time::Instant::now();
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {e}", root.display());
                    continue;
                }
            };

            let path = entry.path();
            if self.config.should_exclude(path) {
                debug!("Excluded from scan: {}", path.display());
                continue;
            }

            if let Some(indexed) = IndexedFile::from_path(path) {
                files.push(indexed);
            }
        }

        info!(
            "Scanned {} files in {} ({:?})",
            files.len(),
            root.display(),
            start.elapsed()
        );
        Ok(files)
    }

    /// The scanned directory.
    pub fn root(&self) -> &Path {
        &self.config.path
    }
}
