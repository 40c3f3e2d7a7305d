//! Classification and conversion of a single input file.
//!
//! ```text
//! Detected ─► Validating ─► Converting ─┬─► Archived
//!                  │                     └─► Failed
//!                  └──────────────────────────► Failed
//! ```

use std::path::{Path, PathBuf};

use autoproc_codec::Format;
use autoproc_directory_watcher::Fingerprint;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveManager;
use crate::config::ProcessingConfig;
use crate::error::{PipelineError, Result};
use crate::files::{split_name, write_atomic};
use crate::state::{ArchiveEntry, Claim, FileState, SharedState};

/// Determine the format of `path` from its extension, or from `contents`
/// when the extension is absent or unrecognized.
pub fn classify(path: &Path, contents: &[u8]) -> Option<Format> {
    Format::from_path(path).or_else(|| Format::sniff(contents))
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub source: PathBuf,
    pub format: Format,

    /// `<output_dir>/<stem>.json` when auto-JSON was on.
    pub output: Option<PathBuf>,

    pub backup: Option<PathBuf>,
    pub archived: Option<PathBuf>,

    /// Non-fatal step failures, such as a failed backup.
    pub warnings: Vec<String>,
}

/// Result of asking for a file to be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed(ProcessedFile),

    /// This version of the file was already handled.
    Duplicate(PathBuf),
}

/// Drives one file through the processing state machine.
#[derive(Debug, Clone)]
pub struct Converter {
    state: SharedState,
}

impl Converter {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Process `path`.
    ///
    /// `fingerprint` is the version reported by the watcher; `None` reads it
    /// from disk. Failed versions are only reprocessed if `retry_failed`.
    pub async fn process(
        &self,
        path: &Path,
        fingerprint: Option<Fingerprint>,
        retry_failed: bool,
    ) -> Result<Outcome> {
        let fingerprint = match fingerprint.or_else(|| Fingerprint::of(path)) {
            Some(fingerprint) => fingerprint,
            None => {
                return Err(PipelineError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "not a regular file"),
                ));
            }
        };

        let config = match self.state.claim(path, fingerprint, retry_failed).await {
            Claim::Granted(config) => config,
            Claim::Duplicate => {
                debug!("Skipping already processed file: {}", path.display());
                return Ok(Outcome::Duplicate(path.to_path_buf()));
            }
            Claim::InFlight => return Err(PipelineError::AlreadyInFlight(path.to_path_buf())),
        };

        info!("Processing file: {}", path.display());
        let mut run = Run::default();
        match self.run(path, fingerprint, &config, &mut run).await {
            Ok(processed) => {
                self.state.complete(path, run.archive).await;
                Ok(Outcome::Processed(processed))
            }
            Err(e) => {
                error!("Failed to process {}: {e}", path.display());
                self.state.fail(path, run.output, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        config: &ProcessingConfig,
        run: &mut Run,
    ) -> Result<ProcessedFile> {
        let mut contents = None;
        let format = match Format::from_path(path) {
            Some(format) => format,
            None => {
                let bytes = fs::read(path)
                    .await
                    .map_err(|e| PipelineError::io(path, e))?;
                let format = classify(path, &bytes)
                    .ok_or_else(|| PipelineError::UnknownFormat(path.to_path_buf()))?;
                contents = Some(bytes);
                format
            }
        };
        debug!("{} classified as {format}", path.display());

        self.state.transition(path, FileState::Converting).await;
        let archive = ArchiveManager::new(config);
        let mut warnings = Vec::new();

        let backup = if config.backup_enabled {
            match archive.backup(path).await {
                Ok(backup) => Some(backup),
                Err(e) => {
                    warn!("Backup of {} failed: {e}", path.display());
                    warnings.push(format!("backup failed: {e}"));
                    None
                }
            }
        } else {
            None
        };

        if config.auto_convert_json {
            let bytes = match contents.take() {
                Some(bytes) => bytes,
                None => fs::read(path)
                    .await
                    .map_err(|e| PipelineError::io(path, e))?,
            };
            let json = tokio::task::spawn_blocking(move || {
                let records = autoproc_codec::parse(&bytes, format)?;
                autoproc_codec::render(&records, Format::Json)
            })
            .await??;

            let (stem, _) = split_name(path);
            let output = config.output_dir.join(format!("{stem}.json"));
            write_atomic(&output, &json).await?;
            info!("Converted to JSON: {}", output.display());
            run.output = Some(output);
        }

        let archived = if config.archive_enabled {
            let entry = archive.archive(path, Some(fingerprint)).await?;
            let archived = entry.archived.clone();
            run.archive = Some(entry);
            Some(archived)
        } else {
            None
        };

        Ok(ProcessedFile {
            source: path.to_path_buf(),
            format,
            output: run.output.clone(),
            backup,
            archived,
            warnings,
        })
    }
}

/// Side effects that must be recorded even if a later step fails.
#[derive(Default)]
struct Run {
    output: Option<PathBuf>,
    archive: Option<ArchiveEntry>,
}
