//! autoproc: automatic file processing
//!
//! Watches an input directory, converts and archives what lands there and
//! runs scheduled exports. Commands are read from stdin, one per line; type
//! `ajuda` for the list.
//!
//! Usage:
//!     autoproc --input ./input --output ./output --archive ./archive --start

use std::path::{Path, PathBuf};

use anyhow::Context;
use autoproc_pipeline::{Coordinator, ExportMode, PipelineSettings};
use clap::Parser;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BANNER: &str = "=== Sistema de Processamento Automático de Arquivos ===
Digite 'ajuda' para ver os comandos disponíveis
";

#[derive(Parser, Debug, Default)]
#[command(name = "autoproc", about = "Automatic file ingestion, conversion and archiving")]
struct Args {
    /// TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to watch for new files
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory for converted files and exports
    #[arg(long)]
    output: Option<PathBuf>,

    /// Directory processed originals are moved to
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Directory for pre-processing copies (default: <output>/backups)
    #[arg(long)]
    backup: Option<PathBuf>,

    /// Interval of the recurring CSV export in minutes, 0 to disable
    #[arg(long)]
    interval_minutes: Option<u64>,

    /// How long a file must stay unchanged before it is processed
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// per-file or combined
    #[arg(long)]
    export_mode: Option<ExportMode>,

    /// Start watching immediately
    #[arg(long)]
    start: bool,
}

fn load_settings(args: &Args) -> anyhow::Result<PipelineSettings> {
    let mut settings = match &args.config {
        Some(path) => read_settings(path)?,
        None => PipelineSettings::default(),
    };

    if let Some(input) = &args.input {
        settings.input_dir = input.clone();
    }
    if let Some(output) = &args.output {
        settings.output_dir = output.clone();
    }
    if let Some(archive) = &args.archive {
        settings.archive_dir = archive.clone();
    }
    if let Some(backup) = &args.backup {
        settings.backup_dir = Some(backup.clone());
    }
    if let Some(minutes) = args.interval_minutes {
        settings.export_interval_minutes = minutes;
    }
    if let Some(debounce) = args.debounce_ms {
        settings.debounce_ms = debounce;
    }
    if let Some(mode) = args.export_mode {
        settings.export_mode = mode;
    }
    Ok(settings)
}

fn read_settings(path: &Path) -> anyhow::Result<PipelineSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid settings in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only command responses.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;

    tracing::info!("Starting autoproc");
    tracing::info!("  Input: {}", settings.input_dir.display());
    tracing::info!("  Output: {}", settings.output_dir.display());
    tracing::info!("  Archive: {}", settings.archive_dir.display());

    let coordinator = Coordinator::new(settings)
        .await
        .context("failed to set up directories")?;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(BANNER.as_bytes())
        .await?;

    if args.start {
        coordinator.start().await?;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    coordinator.run_command_loop(stdin, stdout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_settings_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autoproc.toml");
        std::fs::write(
            &path,
            r#"
input_dir = "/data/in"
output_dir = "/data/out"
auto_convert_json = true
export_interval_minutes = 15
export_mode = "combined"
"#,
        )
        .unwrap();

        let args = Args {
            config: Some(path),
            output: Some(PathBuf::from("/elsewhere")),
            debounce_ms: Some(1000),
            ..Args::default()
        };
        let settings = load_settings(&args).unwrap();

        assert_eq!(settings.input_dir, PathBuf::from("/data/in"));
        assert_eq!(settings.output_dir, PathBuf::from("/elsewhere"));
        assert_eq!(settings.archive_dir, PathBuf::from("./archive"));
        assert!(settings.auto_convert_json);
        assert_eq!(settings.export_interval_minutes, 15);
        assert_eq!(settings.export_mode, ExportMode::Combined);
        assert_eq!(settings.debounce_ms, 1000);
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = load_settings(&Args::default()).unwrap();
        assert_eq!(settings, PipelineSettings::default());
    }

    #[test]
    fn test_bad_settings_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "debounce_ms = \"soon\"").unwrap();

        let args = Args {
            config: Some(path),
            ..Args::default()
        };
        assert!(load_settings(&args).is_err());
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "autoproc",
            "--input",
            "in",
            "--export-mode",
            "per-file",
            "--interval-minutes",
            "0",
            "--start",
        ]);
        assert_eq!(args.input, Some(PathBuf::from("in")));
        assert_eq!(args.export_mode, Some(ExportMode::PerFile));
        assert_eq!(args.interval_minutes, Some(0));
        assert!(args.start);
    }
}
