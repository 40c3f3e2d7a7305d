//! # Ingestion Pipeline
//!
//! Watches an input directory, converts what lands there, archives the
//! originals and runs scheduled bulk exports, all steerable through a
//! line-oriented command interface.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Coordinator                             │
//! │        (commands, start/stop, the one config mutator)            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  DirectoryWatcher ──► IngestWorker ──► Converter ──► Archive     │
//! │                          (JoinSet)        │                      │
//! │  Scheduler ──► Exporter ◄─────────────────┘ codec                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  SharedState: config + file tracker + archive ledger (RwLock)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use autoproc_pipeline::{Coordinator, PipelineSettings};
//!
//! let coordinator = Coordinator::new(PipelineSettings::new("in", "out", "archive")).await?;
//! coordinator.start().await?;
//! coordinator.run_command_loop(stdin, stdout).await?;
//! ```

pub mod archive;
pub mod command;
pub mod config;
pub mod converter;
pub mod coordinator;
pub mod error;
pub mod export;
mod files;
pub mod ingest;
pub mod scheduler;
pub mod state;

pub use archive::ArchiveManager;
pub use command::{Command, CommandError};
pub use config::{PipelineSettings, ProcessingConfig};
pub use converter::{Converter, Outcome, ProcessedFile};
pub use coordinator::{Coordinator, Directories, Response, Setting, StatusReport};
pub use error::{PipelineError, Result};
pub use export::{ExportJob, ExportMode, ExportReport, ExportSource, Exporter, Trigger};
pub use ingest::IngestWorker;
pub use scheduler::Scheduler;
pub use state::{ArchiveEntry, FileState, SharedState, StateCounts, WatchedFile};
