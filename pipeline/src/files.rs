//! Filesystem helpers shared by conversion, archiving and export.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Timestamp format used in archive, backup and export file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

pub fn timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `<dir>/<name>.<ext>`, or `<dir>/<name>-<n>.<ext>` with the smallest `n`
/// that does not exist yet.
pub fn unique_path(dir: &Path, name: &str, ext: &str) -> PathBuf {
    let with_ext = |base: String| {
        if ext.is_empty() {
            dir.join(base)
        } else {
            dir.join(format!("{base}.{ext}"))
        }
    };

    let candidate = with_ext(name.to_string());
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| with_ext(format!("{name}-{n}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

pub async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))
}

/// Write `bytes` to `path` through a hidden temp file in the same
/// directory so readers never see a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    fs::write(&temp_path, bytes)
        .await
        .map_err(|e| PipelineError::io(&temp_path, e))?;

    if let Err(e) = fs::rename(&temp_path, path).await {
        if let Err(cleanup) = fs::remove_file(&temp_path).await {
            debug!("Could not remove {}: {cleanup}", temp_path.display());
        }
        return Err(PipelineError::io(path, e));
    }
    Ok(())
}

/// Absolute form of `path` with its directory canonicalized. The final
/// component is kept as spelled, so a symlinked file keeps its own name.
pub async fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return fs::canonicalize(path).await;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    Ok(fs::canonicalize(parent).await?.join(name))
}

/// File stem and extension as strings, lossy.
pub fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    (stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(timestamp(at), "20240309070501000");
    }

    #[test]
    fn test_unique_path_adds_counter() {
        let dir = TempDir::new().unwrap();
        let first = unique_path(dir.path(), "a_1", "csv");
        assert_eq!(first, dir.path().join("a_1.csv"));

        std::fs::write(&first, "x").unwrap();
        assert_eq!(unique_path(dir.path(), "a_1", "csv"), dir.path().join("a_1-1.csv"));
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.json");

        write_atomic(&path, b"[]").await.unwrap();
        write_atomic(&path, b"[1]").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"[1]");
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_resolve_spellings_agree() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("in")).unwrap();
        let canonical = std::fs::canonicalize(dir.path().join("in")).unwrap().join("a.csv");

        let direct = resolve(&dir.path().join("in").join("a.csv")).await.unwrap();
        let dotted = resolve(&dir.path().join("in").join(".").join("a.csv")).await.unwrap();
        let detour = resolve(&dir.path().join("in").join("..").join("in").join("a.csv"))
            .await
            .unwrap();

        assert_eq!(direct, canonical);
        assert_eq!(dotted, canonical);
        assert_eq!(detour, canonical);
        assert!(resolve(&dir.path().join("missing").join("a.csv")).await.is_err());
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name(Path::new("/in/report.final.csv")),
            ("report.final".to_string(), "csv".to_string())
        );
        assert_eq!(split_name(Path::new("/in/README")), ("README".to_string(), String::new()));
    }
}
