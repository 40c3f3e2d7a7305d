//! Bulk export of output files into one target format.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use autoproc_codec::{Format, RecordSet};
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::ProcessingConfig;
use crate::error::{PipelineError, Result};
use crate::files::{self, split_name, timestamp, unique_path, write_atomic};

/// How an export lays out its artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// One artifact per source file.
    #[default]
    PerFile,

    /// All sources' rows in a single artifact.
    Combined,
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerFile => f.write_str("per-file"),
            Self::Combined => f.write_str("combined"),
        }
    }
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per-file" | "per_file" | "perfile" => Ok(Self::PerFile),
            "combined" => Ok(Self::Combined),
            other => Err(format!("unknown export mode: {other}")),
        }
    }
}

/// Which files an export reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSource {
    /// Recognized-format files directly inside the output directory.
    OutputDir,

    /// An explicit list of files.
    Paths(Vec<PathBuf>),
}

/// When a scheduled job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Repeatedly, this long after the previous firing.
    Every(Duration),

    /// Every day at this local time.
    DailyAt(NaiveTime),

    /// At the next scheduler tick, then never again.
    Once,
}

/// A bulk conversion task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub format: Format,
    pub source: ExportSource,

    /// Defaults to `<output_dir>/exports`.
    pub destination: Option<PathBuf>,

    pub mode: ExportMode,
    pub trigger: Trigger,
}

impl ExportJob {
    /// A one-off per-file export of the output directory.
    pub fn new(format: Format) -> Self {
        Self {
            id: Uuid::new_v4(),
            format,
            source: ExportSource::OutputDir,
            destination: None,
            mode: ExportMode::PerFile,
            trigger: Trigger::Once,
        }
    }

    pub fn with_source(mut self, source: ExportSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_mode(mut self, mode: ExportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }
}

/// What one firing of a job did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub job_id: Uuid,
    pub format: Format,

    /// Artifacts written.
    pub written: Vec<PathBuf>,

    /// Sources that could not be read or parsed, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Runs export jobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exporter;

impl Exporter {
    /// Run `job` once against the given configuration snapshot.
    pub async fn run(&self, job: &ExportJob, config: &ProcessingConfig) -> Result<ExportReport> {
        let destination = job
            .destination
            .clone()
            .unwrap_or_else(|| config.export_dir());
        files::ensure_dir(&destination).await?;

        let sources = match &job.source {
            ExportSource::OutputDir => {
                let output_dir = config.output_dir.clone();
                tokio::task::spawn_blocking(move || eligible_files(&output_dir)).await?
            }
            ExportSource::Paths(paths) => paths.clone(),
        };
        debug!("Export {} reads {} sources", job.id, sources.len());

        let stamp = timestamp(Local::now());
        let mut report = ExportReport {
            job_id: job.id,
            format: job.format,
            written: Vec::new(),
            skipped: Vec::new(),
        };
        let mut combined = RecordSet::new();

        for source in sources {
            let records = match read_records(&source).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("Skipping export source {}: {e}", source.display());
                    report.skipped.push((source, e.to_string()));
                    continue;
                }
            };

            match job.mode {
                ExportMode::Combined => combined.extend(records),
                ExportMode::PerFile => {
                    let (stem, _) = split_name(&source);
                    let target = unique_path(
                        &destination,
                        &format!("{stem}_{stamp}"),
                        job.format.extension(),
                    );
                    write_records(records, job.format, &target).await?;
                    report.written.push(target);
                }
            }
        }

        if job.mode == ExportMode::Combined {
            let target = unique_path(
                &destination,
                &format!("export_{stamp}"),
                job.format.extension(),
            );
            write_records(combined, job.format, &target).await?;
            report.written.push(target);
        }

        info!(
            "Export {} finished: {} written, {} skipped",
            job.id,
            report.written.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Regular, non-hidden files of a recognized format directly in `dir`.
fn eligible_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(walkdir::DirEntry::into_path)
        .filter(|path| Format::from_path(path).is_some())
        .collect()
}

async fn read_records(path: &Path) -> Result<RecordSet> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let format = crate::converter::classify(path, &bytes)
        .ok_or_else(|| PipelineError::UnknownFormat(path.to_path_buf()))?;
    let records = tokio::task::spawn_blocking(move || autoproc_codec::parse(&bytes, format)).await??;
    Ok(records)
}

async fn write_records(records: RecordSet, format: Format, target: &Path) -> Result<()> {
    let bytes = tokio::task::spawn_blocking(move || autoproc_codec::render(&records, format)).await??;
    write_atomic(target, &bytes).await
}
