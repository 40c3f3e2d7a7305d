//! Runtime flags and construction settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use autoproc_codec::Format;
use serde::{Deserialize, Serialize};

use crate::export::ExportMode;

/// The live, mutable processing configuration.
///
/// Owned by [`SharedState`](crate::state::SharedState). Readers get a
/// cloned snapshot; all writes go through
/// [`SharedState::update`](crate::state::SharedState::update).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Convert every processed file to JSON in the output directory.
    pub auto_convert_json: bool,

    /// Move processed originals into the archive directory.
    pub archive_enabled: bool,

    /// Copy originals into the backup directory before processing.
    pub backup_enabled: bool,

    /// Watched directory.
    pub input_dir: PathBuf,

    /// Where converted files land.
    pub output_dir: PathBuf,

    /// Where processed originals are moved.
    pub archive_dir: PathBuf,

    /// Where pre-processing copies are kept.
    pub backup_dir: PathBuf,
}

impl ProcessingConfig {
    /// Create a config with the default flags. The backup directory is
    /// `<output_dir>/backups`.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        let output_dir = output_dir.into();
        Self {
            auto_convert_json: false,
            archive_enabled: true,
            backup_enabled: true,
            input_dir: input_dir.into(),
            backup_dir: output_dir.join("backups"),
            output_dir,
            archive_dir: archive_dir.into(),
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn with_auto_convert_json(mut self, enabled: bool) -> Self {
        self.auto_convert_json = enabled;
        self
    }

    pub fn with_archive(mut self, enabled: bool) -> Self {
        self.archive_enabled = enabled;
        self
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    /// Default directory for export artifacts.
    pub fn export_dir(&self) -> PathBuf {
        self.output_dir.join("exports")
    }

    /// Every directory the pipeline writes to or watches.
    pub fn directories(&self) -> [&Path; 4] {
        [
            &self.input_dir,
            &self.output_dir,
            &self.archive_dir,
            &self.backup_dir,
        ]
    }
}

impl From<&PipelineSettings> for ProcessingConfig {
    fn from(settings: &PipelineSettings) -> Self {
        let config = Self::new(
            &settings.input_dir,
            &settings.output_dir,
            &settings.archive_dir,
        )
        .with_auto_convert_json(settings.auto_convert_json)
        .with_archive(settings.archive_enabled)
        .with_backup(settings.backup_enabled);

        match &settings.backup_dir {
            Some(dir) => config.with_backup_dir(dir),
            None => config,
        }
    }
}

/// Settings the pipeline is constructed with. Loadable from TOML; every
/// field is optional there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,

    /// Defaults to `<output_dir>/backups`.
    pub backup_dir: Option<PathBuf>,

    pub auto_convert_json: bool,
    pub archive_enabled: bool,
    pub backup_enabled: bool,

    /// Write-quiescence window in milliseconds.
    pub debounce_ms: u64,

    /// Interval of the recurring export job in minutes. `0` disables it.
    pub export_interval_minutes: u64,

    /// Format of the recurring export job.
    pub export_format: Format,

    /// Whether exports write one artifact per source or one combined.
    pub export_mode: ExportMode,

    /// Maximum number of files converted at once.
    pub max_concurrent: usize,

    /// How often the scheduler checks for due jobs, in milliseconds.
    pub scheduler_tick_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./input"),
            output_dir: PathBuf::from("./output"),
            archive_dir: PathBuf::from("./archive"),
            backup_dir: None,
            auto_convert_json: false,
            archive_enabled: true,
            backup_enabled: true,
            debounce_ms: 500,
            export_interval_minutes: 60,
            export_format: Format::Csv,
            export_mode: ExportMode::PerFile,
            max_concurrent: 4,
            scheduler_tick_ms: 1000,
        }
    }
}

impl PipelineSettings {
    /// Settings rooted at three directories, everything else default.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            archive_dir: archive_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn with_auto_convert_json(mut self, enabled: bool) -> Self {
        self.auto_convert_json = enabled;
        self
    }

    pub fn with_archive(mut self, enabled: bool) -> Self {
        self.archive_enabled = enabled;
        self
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_export_interval_minutes(mut self, minutes: u64) -> Self {
        self.export_interval_minutes = minutes;
        self
    }

    pub fn with_export_mode(mut self, mode: ExportMode) -> Self {
        self.export_mode = mode;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Interval of the recurring export, `None` when disabled.
    pub fn export_interval(&self) -> Option<Duration> {
        (self.export_interval_minutes > 0)
            .then(|| Duration::from_secs(self.export_interval_minutes * 60))
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms.max(1))
    }

    pub fn processing_config(&self) -> ProcessingConfig {
        ProcessingConfig::from(self)
    }
}
