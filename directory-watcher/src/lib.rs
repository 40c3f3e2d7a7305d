//! # Directory Watcher
//!
//! This crate watches the pipeline's input directory and reports files once
//! they have finished being written.
//!
//! ## Features
//!
//! - **Real-time Watching**: notify-based, non-recursive
//! - **Initial Scan**: files present at start are reported like new ones
//! - **Exclusion Patterns**: temporary and editor files are ignored
//! - **Quiescence Debouncing**: a file is only handed on once its size and
//!   modification time stop changing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► ExcludePatterns ──► Debouncer ──► FileEvent queue  │
//! │                                    ▲                            │
//! │  FileIndexer (initial scan) ───────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod indexer;
pub mod watcher;

pub use config::DirectoryConfig;
pub use debounce::{Debouncer, StableFile};
pub use error::{Result, WatcherError};
pub use event::{FileEvent, FileEventKind, Fingerprint};
pub use indexer::{FileIndexer, IndexedFile};
pub use watcher::DirectoryWatcher;
