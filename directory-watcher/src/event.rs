//! File events from directory watching.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file event emitted by the watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file.
    pub path: PathBuf,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Size and modification time observed with the event, if the file
    /// still existed.
    pub fingerprint: Option<Fingerprint>,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
            fingerprint: None,
        }
    }

    /// Attach the observed fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Option<Fingerprint>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Observed size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        self.fingerprint.map(|f| f.size)
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// A file appeared or changed; it may still be being written.
    Detected,

    /// The file's size and modification time have been unchanged for the
    /// quiescence window.
    Stable,

    /// The file was removed or renamed away.
    Removed,
}

impl FileEventKind {
    /// Map a raw notify event kind. Access and metadata-only changes are
    /// not interesting and map to `None`.
    pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        use notify::event::{ModifyKind, RenameMode};

        match kind {
            notify::EventKind::Create(_) => Some(Self::Detected),
            notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Self::Removed),
            notify::EventKind::Modify(ModifyKind::Metadata(_)) => None,
            notify::EventKind::Modify(_) => Some(Self::Detected),
            notify::EventKind::Remove(_) => Some(Self::Removed),
            _ => None,
        }
    }
}

/// Size and modification time of one version of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// File size in bytes.
    pub size: u64,

    /// Last modification time, where the platform reports one.
    pub modified: Option<SystemTime>,
}

impl Fingerprint {
    /// Read the fingerprint of a regular file. Returns `None` if the path
    /// does not exist or is not a file.
    pub fn of(path: &Path) -> Option<Self> {
        let metadata = path.metadata().ok()?;
        metadata.is_file().then(|| Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_event_creation() {
        let event = FileEvent::new(FileEventKind::Detected, "/in/file.csv");
        assert_eq!(event.kind, FileEventKind::Detected);
        assert_eq!(event.path, Path::new("/in/file.csv"));
        assert_eq!(event.size(), None);
    }

    #[test]
    fn test_notify_kind_mapping() {
        use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RenameMode};

        assert_eq!(
            FileEventKind::from_notify(&notify::EventKind::Create(CreateKind::File)),
            Some(FileEventKind::Detected)
        );
        assert_eq!(
            FileEventKind::from_notify(&notify::EventKind::Modify(ModifyKind::Data(
                DataChange::Content
            ))),
            Some(FileEventKind::Detected)
        );
        assert_eq!(
            FileEventKind::from_notify(&notify::EventKind::Modify(ModifyKind::Name(
                RenameMode::From
            ))),
            Some(FileEventKind::Removed)
        );
        assert_eq!(
            FileEventKind::from_notify(&notify::EventKind::Access(AccessKind::Any)),
            None
        );
    }

    #[test]
    fn test_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        fs::write(&path, "id\n1\n").unwrap();

        let fingerprint = Fingerprint::of(&path).unwrap();
        assert_eq!(fingerprint.size, 5);
        assert_eq!(Fingerprint::of(dir.path()), None);
        assert_eq!(Fingerprint::of(&dir.path().join("missing")), None);
    }
}
