//! Configuration types for directory watching.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time a file must stay unchanged before it is reported stable.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(500);

/// Configuration for the watched input directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Path to the directory.
    pub path: PathBuf,

    /// Patterns to exclude (glob patterns).
    pub exclude_patterns: Vec<String>,

    /// How long size and modification time must stay unchanged before a
    /// file is handed on.
    pub quiescence: Duration,

    /// How often pending files are re-checked.
    pub poll_interval: Duration,

    /// Whether to follow symbolic links during the initial scan.
    pub follow_symlinks: bool,

    /// Capacity of the raw event queue between notify and the debouncer.
    pub queue_capacity: usize,
}

impl DirectoryConfig {
    /// Create a new directory config.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exclude_patterns: Self::default_excludes(),
            quiescence: DEFAULT_QUIESCENCE,
            poll_interval: DEFAULT_QUIESCENCE / 5,
            follow_symlinks: false,
            queue_capacity: 1000,
        }
    }

    /// Set the quiescence window. The poll interval follows at a fifth of
    /// the window, never below 10ms.
    pub fn with_quiescence(mut self, window: Duration) -> Self {
        self.quiescence = window;
        self.poll_interval = (window / 5).max(Duration::from_millis(10));
        self
    }

    /// Set the poll interval explicitly.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Get default exclude patterns.
    fn default_excludes() -> Vec<String> {
        vec![
            // Hidden files, including our own in-progress writes
            "**/.*".to_string(),
            // Editor swap and backup files
            "**/*.swp".to_string(),
            "**/*~".to_string(),
            "**/~$*".to_string(),
            // Partial downloads and temporary files
            "**/*.part".to_string(),
            "**/*.crdownload".to_string(),
            "**/*.tmp".to_string(),
            "**/*.temp".to_string(),
            // System files
            "**/Thumbs.db".to_string(),
            "**/desktop.ini".to_string(),
        ]
    }

    /// Check if a path should be excluded. Patterns are matched against the
    /// path relative to the watched directory.
    pub fn should_exclude(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.path).unwrap_or(path);
        let path_str = relative.to_string_lossy();

        self.exclude_patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern).is_ok_and(|glob| glob.matches(&path_str))
        })
    }
}
