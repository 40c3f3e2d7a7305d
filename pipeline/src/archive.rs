//! Backups and archiving of processed originals.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use autoproc_directory_watcher::Fingerprint;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ProcessingConfig;
use crate::error::{PipelineError, Result};
use crate::files::{self, split_name, timestamp, unique_path};
use crate::state::ArchiveEntry;

const TIMESTAMP_DIGITS: usize = 17;

/// Copies originals to the backup directory and moves them to the archive.
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    input_dir: PathBuf,
    archive_dir: PathBuf,
    backup_dir: PathBuf,
}

impl ArchiveManager {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            archive_dir: config.archive_dir.clone(),
            backup_dir: config.backup_dir.clone(),
        }
    }

    /// Copy `path` to `<backup_dir>/<timestamp>_<file name>`.
    pub async fn backup(&self, path: &Path) -> Result<PathBuf> {
        files::ensure_dir(&self.backup_dir).await?;

        let (stem, ext) = split_name(path);
        let target = unique_path(
            &self.backup_dir,
            &format!("{}_{stem}", timestamp(Local::now())),
            &ext,
        );
        fs::copy(path, &target)
            .await
            .map_err(|e| PipelineError::io(&target, e))?;

        info!("Backup created: {}", target.display());
        Ok(target)
    }

    /// Move `path` into the archive under a timestamped name.
    pub async fn archive(
        &self,
        path: &Path,
        fingerprint: Option<Fingerprint>,
    ) -> Result<ArchiveEntry> {
        let archive_err = |source: std::io::Error| PipelineError::Archive {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(archive_err)?;

        let now = Local::now();
        let (stem, ext) = split_name(path);
        let target = unique_path(&self.archive_dir, &archive_name(&stem, now), &ext);

        match fs::rename(path, &target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                debug!("Archive is on another device, copying {}", path.display());
                fs::copy(path, &target).await.map_err(archive_err)?;
                fs::remove_file(path).await.map_err(archive_err)?;
            }
            Err(e) => return Err(archive_err(e)),
        }

        info!("Archived {} -> {}", path.display(), target.display());
        Ok(ArchiveEntry {
            original: path.to_path_buf(),
            archived: target,
            archived_at: now.with_timezone(&Utc),
            fingerprint,
        })
    }

    /// Rebuild ledger entries from the timestamped names already in the
    /// archive directory. A missing directory yields an empty ledger.
    pub fn scan_ledger(&self) -> Vec<ArchiveEntry> {
        if !self.archive_dir.is_dir() {
            return Vec::new();
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.archive_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping archive entry: {e}");
                    continue;
                }
            };
            let archived = entry.path();
            let Some(fingerprint) = Fingerprint::of(archived) else {
                continue;
            };
            let Some((original_name, archived_at)) =
                entry.file_name().to_str().and_then(parse_archive_name)
            else {
                debug!("Not an archive name: {}", archived.display());
                continue;
            };

            entries.push(ArchiveEntry {
                original: self.input_dir.join(original_name),
                archived: archived.to_path_buf(),
                archived_at,
                fingerprint: Some(fingerprint),
            });
        }

        info!(
            "Reconstructed {} archive entries from {}",
            entries.len(),
            self.archive_dir.display()
        );
        entries
    }
}

/// `<stem>_<YYYYmmddHHMMSSmmm>`, without extension.
pub fn archive_name(stem: &str, at: DateTime<Local>) -> String {
    format!("{stem}_{}", timestamp(at))
}

/// Split an archived file name back into the original file name and the
/// archive time.
pub fn parse_archive_name(file_name: &str) -> Option<(String, DateTime<Utc>)> {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };
    let (original_stem, tail) = stem.rsplit_once('_')?;
    if original_stem.is_empty() {
        return None;
    }

    let digits = match tail.split_once('-') {
        Some((digits, counter)) if counter.bytes().all(|b| b.is_ascii_digit()) => digits,
        Some(_) => return None,
        None => tail,
    };
    if digits.len() != TIMESTAMP_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let number = |range: std::ops::Range<usize>| digits.get(range)?.parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(i32::try_from(number(0..4)?).ok()?, number(4..6)?, number(6..8)?)?;
    let naive: NaiveDateTime =
        date.and_hms_milli_opt(number(8..10)?, number(10..12)?, number(12..14)?, number(14..17)?)?;
    let archived_at = Local
        .from_local_datetime(&naive)
        .earliest()
        .map_or_else(|| naive.and_utc(), |t| t.with_timezone(&Utc));

    let original = match ext {
        Some(ext) => format!("{original_stem}.{ext}"),
        None => original_stem.to_string(),
    };
    Some((original, archived_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs as stdfs;
    use tempfile::TempDir;

    fn manager(root: &TempDir) -> ArchiveManager {
        let config = ProcessingConfig::new(
            root.path().join("in"),
            root.path().join("out"),
            root.path().join("arch"),
        );
        ArchiveManager::new(&config)
    }

    #[test]
    fn test_parse_archive_name() {
        let (name, at) = parse_archive_name("sales_2024_20240309070501123.csv").unwrap();
        assert_eq!(name, "sales_2024.csv");
        let local = at.with_timezone(&Local);
        assert_eq!(local.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-03-09 07:05:01.123");

        assert_eq!(
            parse_archive_name("a_20240309070501123-2.json").map(|(n, _)| n),
            Some("a.json".to_string())
        );
        assert_eq!(parse_archive_name("plain.csv"), None);
        assert_eq!(parse_archive_name("a_2024.csv"), None);
        assert_eq!(parse_archive_name("a_20241309070501123.csv"), None);
    }

    #[tokio::test]
    async fn test_archive_moves_and_scan_rebuilds() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        stdfs::create_dir_all(root.path().join("in")).unwrap();
        let original = root.path().join("in").join("a.csv");
        stdfs::write(&original, "id\n1\n").unwrap();
        let fingerprint = Fingerprint::of(&original);

        let entry = manager.archive(&original, fingerprint).await.unwrap();
        assert!(!original.exists());
        assert!(entry.archived.exists());

        let rebuilt = manager.scan_ledger();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].original, original);
        assert_eq!(rebuilt[0].archived, entry.archived);
        assert_eq!(rebuilt[0].fingerprint, fingerprint);
    }

    #[tokio::test]
    async fn test_backup_copies() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        let original = root.path().join("a.csv");
        stdfs::write(&original, "id\n").unwrap();

        let backup = manager.backup(&original).await.unwrap();
        assert!(original.exists());
        assert_eq!(stdfs::read(&backup).unwrap(), b"id\n");
        assert!(backup.starts_with(root.path().join("out").join("backups")));
    }

    #[tokio::test]
    async fn test_archive_missing_source_fails() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        let result = manager.archive(&root.path().join("gone.csv"), None).await;
        assert!(matches!(result, Err(PipelineError::Archive { .. })));
    }
}
