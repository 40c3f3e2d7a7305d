//! Coordinator and command loop.
//!
//! The coordinator owns the shared state and every long-running part of the
//! pipeline. All commands, manual or from the watcher side, go through it.

use std::fmt;
use std::path::{Path, PathBuf};

use autoproc_codec::Format;
use autoproc_directory_watcher::{DirectoryConfig, DirectoryWatcher};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive::ArchiveManager;
use crate::command::{Command, HELP};
use crate::config::{PipelineSettings, ProcessingConfig};
use crate::converter::{Converter, Outcome, ProcessedFile};
use crate::error::{PipelineError, Result};
use crate::export::{ExportJob, ExportReport, Trigger};
use crate::files;
use crate::ingest::IngestWorker;
use crate::scheduler::Scheduler;
use crate::state::{SharedState, StateCounts};

/// New locations for the pipeline directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directories {
    pub input: PathBuf,
    pub output: PathBuf,
    pub archive: PathBuf,

    /// Defaults to `<output>/backups`.
    pub backup: Option<PathBuf>,
}

/// A toggleable processing flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    ConvertJson,
    Archive,
    Backup,
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub config: ProcessingConfig,
    pub running: bool,
    pub counts: StateCounts,
    pub archived_total: usize,
    pub failures: Vec<(PathBuf, String)>,
    pub scheduled_jobs: usize,
}

/// Result of a successfully dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Started(PathBuf),
    AlreadyRunning,
    Stopped,
    NotRunning,
    Toggled { setting: Setting, enabled: bool },
    Processed(ProcessedFile),
    Duplicate(PathBuf),
    Exported(ExportReport),
    Status(StatusReport),
    Help,
    Goodbye,
}

struct Watch {
    watcher: DirectoryWatcher,
    ingest: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Watch {
    async fn shutdown(mut self) {
        self.watcher.stop().await;
        self.cancel.cancel();
        if let Err(e) = self.ingest.await {
            warn!("Ingest worker ended abnormally: {e}");
        }
    }
}

/// Single point of control for the pipeline.
pub struct Coordinator {
    settings: PipelineSettings,
    state: SharedState,
    converter: Converter,
    scheduler: Scheduler,
    watch: Mutex<Option<Watch>>,
    default_job: Mutex<Option<Uuid>>,
}

impl Coordinator {
    /// Create the directories and rebuild the archive ledger. Failing to
    /// create a directory is the only fatal error.
    pub async fn new(settings: PipelineSettings) -> Result<Self> {
        let mut config = settings.processing_config();
        prepare_directories(&mut config).await?;

        let state = SharedState::new(config.clone());
        let manager = ArchiveManager::new(&config);
        let ledger = tokio::task::spawn_blocking(move || manager.scan_ledger()).await?;
        state.extend_ledger(ledger).await;

        let scheduler = Scheduler::new(state.clone(), settings.scheduler_tick());
        info!("Pipeline ready, watching {}", config.input_dir.display());

        Ok(Self {
            converter: Converter::new(state.clone()),
            state,
            scheduler,
            watch: Mutex::new(None),
            default_job: Mutex::new(None),
            settings,
        })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn is_running(&self) -> bool {
        self.watch.lock().await.is_some()
    }

    /// Run one command.
    pub async fn dispatch(&self, command: Command) -> Result<Response> {
        match command {
            Command::Start => {
                if self.start().await? {
                    Ok(Response::Started(self.state.config().await.input_dir))
                } else {
                    Ok(Response::AlreadyRunning)
                }
            }
            Command::Stop => Ok(if self.stop().await {
                Response::Stopped
            } else {
                Response::NotRunning
            }),
            Command::ConvertJson(enabled) => Ok(self.toggle(Setting::ConvertJson, enabled).await),
            Command::Archive(enabled) => Ok(self.toggle(Setting::Archive, enabled).await),
            Command::Backup(enabled) => Ok(self.toggle(Setting::Backup, enabled).await),
            Command::Process(path) => match self.process(&path).await? {
                Outcome::Processed(processed) => Ok(Response::Processed(processed)),
                Outcome::Duplicate(path) => Ok(Response::Duplicate(path)),
            },
            Command::Export(format) => Ok(Response::Exported(self.export(format).await?)),
            Command::Status => Ok(Response::Status(self.status().await)),
            Command::Help => Ok(Response::Help),
            Command::Quit => {
                self.stop().await;
                Ok(Response::Goodbye)
            }
        }
    }

    async fn toggle(&self, setting: Setting, enabled: bool) -> Response {
        self.state
            .update(|config| match setting {
                Setting::ConvertJson => config.auto_convert_json = enabled,
                Setting::Archive => config.archive_enabled = enabled,
                Setting::Backup => config.backup_enabled = enabled,
            })
            .await;
        info!("{setting:?} set to {enabled}");
        Response::Toggled { setting, enabled }
    }

    /// Process one file now, bypassing the debounce. A relative path that
    /// does not exist is looked up in the input directory. Failed files
    /// are retried.
    ///
    /// The path is resolved against the canonical directories first, so
    /// every spelling of a file maps to the key the watcher uses.
    pub async fn process(&self, path: &Path) -> Result<Outcome> {
        let path = if path.is_relative() && !path.exists() {
            self.state.config().await.input_dir.join(path)
        } else {
            path.to_path_buf()
        };
        let path = files::resolve(&path)
            .await
            .map_err(|e| PipelineError::io(&path, e))?;
        self.converter.process(&path, None, true).await
    }

    /// Export the output directory to `format` immediately.
    pub async fn export(&self, format: Format) -> Result<ExportReport> {
        let job = ExportJob::new(format).with_mode(self.settings.export_mode);
        self.scheduler.run_now(&job).await
    }

    pub async fn status(&self) -> StatusReport {
        let scheduled_jobs = self.scheduler.jobs().await.len();
        StatusReport {
            config: self.state.config().await,
            running: self.is_running().await,
            counts: self.state.counts().await,
            archived_total: self.state.ledger().await.len(),
            failures: self.state.failures().await,
            scheduled_jobs,
        }
    }

    /// Start the watcher and the scheduler. Returns `false` if already
    /// running.
    pub async fn start(&self) -> Result<bool> {
        let mut watch = self.watch.lock().await;
        if watch.is_some() {
            return Ok(false);
        }
        *watch = Some(self.spawn_watch().await?);
        drop(watch);

        self.ensure_default_job().await;
        self.scheduler.start().await;
        Ok(true)
    }

    /// Stop the watcher and the scheduler, letting in-flight conversions
    /// and exports finish. Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let watch = self.watch.lock().await.take();
        let was_running = watch.is_some();
        if let Some(watch) = watch {
            watch.shutdown().await;
        }
        self.scheduler.stop().await;
        if was_running {
            info!("Pipeline stopped");
        }
        was_running
    }

    /// Point the pipeline at new directories, creating them. A running
    /// watcher is restarted on the new input directory.
    pub async fn set_directories(&self, dirs: Directories) -> Result<()> {
        let backup = dirs.backup.unwrap_or_else(|| dirs.output.join("backups"));
        let mut resolved =
            ProcessingConfig::new(dirs.input, dirs.output, dirs.archive).with_backup_dir(backup);
        prepare_directories(&mut resolved).await?;

        let mut watch = self.watch.lock().await;
        let was_running = match watch.take() {
            Some(running) => {
                running.shutdown().await;
                true
            }
            None => false,
        };

        let config = self
            .state
            .update(|config| {
                config.input_dir = resolved.input_dir;
                config.output_dir = resolved.output_dir;
                config.archive_dir = resolved.archive_dir;
                config.backup_dir = resolved.backup_dir;
                config.clone()
            })
            .await;
        info!(
            "Directories changed: input {}, output {}, archive {}",
            config.input_dir.display(),
            config.output_dir.display(),
            config.archive_dir.display()
        );

        let manager = ArchiveManager::new(&config);
        let ledger = tokio::task::spawn_blocking(move || manager.scan_ledger()).await?;
        self.state.extend_ledger(ledger).await;

        if was_running {
            *watch = Some(self.spawn_watch().await?);
        }
        Ok(())
    }

    async fn spawn_watch(&self) -> Result<Watch> {
        let config = self.state.config().await;
        let directory =
            DirectoryConfig::new(&config.input_dir).with_quiescence(self.settings.debounce());
        let (mut watcher, events) = DirectoryWatcher::channel(directory);
        watcher.start()?;

        let cancel = CancellationToken::new();
        let worker = IngestWorker::new(self.state.clone(), self.settings.max_concurrent);
        let ingest = tokio::spawn(worker.run(events, cancel.clone()));

        Ok(Watch {
            watcher,
            ingest,
            cancel,
        })
    }

    async fn ensure_default_job(&self) {
        let Some(interval) = self.settings.export_interval() else {
            return;
        };
        let mut default_job = self.default_job.lock().await;
        if default_job.is_none() {
            let job = ExportJob::new(self.settings.export_format)
                .with_mode(self.settings.export_mode)
                .with_trigger(Trigger::Every(interval));
            *default_job = Some(self.scheduler.schedule(job).await);
        }
    }

    /// Read commands line by line from `input` and write responses to
    /// `output` until `sair` or end of input. Bad commands are reported
    /// and the loop continues.
    pub async fn run_command_loop<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let out_err = |e: std::io::Error| PipelineError::io(Path::new("<output>"), e);
        let mut lines = input.lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => return Err(PipelineError::io(Path::new("<input>"), e)),
            };
            if line.trim().is_empty() {
                continue;
            }

            let result = match line.parse::<Command>() {
                Ok(command) => self.dispatch(command).await,
                Err(e) => Err(e.into()),
            };
            let (text, quit) = match result {
                Ok(response) => (response.to_string(), matches!(response, Response::Goodbye)),
                Err(e) => {
                    warn!("Command '{}' failed: {e}", line.trim());
                    (format!("Erro: {e}"), false)
                }
            };

            output.write_all(text.as_bytes()).await.map_err(out_err)?;
            output.write_all(b"\n").await.map_err(out_err)?;
            output.flush().await.map_err(out_err)?;

            if quit {
                return Ok(());
            }
        }

        self.stop().await;
        Ok(())
    }
}

/// Create the configured directories and replace each with its canonical
/// path. Watcher events, manual requests and ledger entries all derive
/// from these, so a file has one identity however it was named.
async fn prepare_directories(config: &mut ProcessingConfig) -> Result<()> {
    for dir in [
        &mut config.input_dir,
        &mut config.output_dir,
        &mut config.archive_dir,
        &mut config.backup_dir,
    ] {
        files::ensure_dir(dir).await?;
        match tokio::fs::canonicalize(&*dir).await {
            Ok(canonical) => *dir = canonical,
            Err(e) => return Err(PipelineError::io(dir, e)),
        }
    }
    Ok(())
}

fn on_off(enabled: bool, on: &'static str, off: &'static str) -> &'static str {
    if enabled { on } else { off }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        writeln!(f, "Status do sistema:")?;
        writeln!(f, "  Diretório de entrada: {}", c.input_dir.display())?;
        writeln!(f, "  Diretório de saída: {}", c.output_dir.display())?;
        writeln!(f, "  Diretório de arquivo: {}", c.archive_dir.display())?;
        writeln!(f, "  Diretório de backups: {}", c.backup_dir.display())?;
        writeln!(
            f,
            "  Conversão para JSON: {}",
            on_off(c.auto_convert_json, "ativada", "desativada")
        )?;
        writeln!(
            f,
            "  Arquivamento: {}",
            on_off(c.archive_enabled, "ativado", "desativado")
        )?;
        writeln!(
            f,
            "  Backups: {}",
            on_off(c.backup_enabled, "ativados", "desativados")
        )?;
        writeln!(
            f,
            "  Monitoramento: {}",
            on_off(self.running, "ativo", "inativo")
        )?;
        writeln!(f, "  Exportações programadas: {}", self.scheduled_jobs)?;
        writeln!(
            f,
            "  Arquivos: {} detectados, {} em processamento, {} concluídos, {} com falha",
            self.counts.detected,
            self.counts.validating + self.counts.converting,
            self.counts.archived,
            self.counts.failed
        )?;
        write!(f, "  Arquivados (total): {}", self.archived_total)?;
        for (path, reason) in &self.failures {
            write!(f, "\n  Falha: {}: {reason}", path.display())?;
        }
        Ok(())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started(dir) => write!(f, "Monitorando diretório de entrada: {}", dir.display()),
            Self::AlreadyRunning => f.write_str("Monitoramento já está ativo"),
            Self::Stopped => f.write_str("Monitoramento interrompido"),
            Self::NotRunning => f.write_str("Monitoramento não está ativo"),
            Self::Toggled { setting, enabled } => match setting {
                Setting::ConvertJson => write!(
                    f,
                    "Conversão automática para JSON: {}",
                    on_off(*enabled, "ativada", "desativada")
                ),
                Setting::Archive => write!(
                    f,
                    "Arquivamento de arquivos processados: {}",
                    on_off(*enabled, "ativado", "desativado")
                ),
                Setting::Backup => write!(
                    f,
                    "Criação de backups: {}",
                    on_off(*enabled, "ativada", "desativada")
                ),
            },
            Self::Processed(processed) => {
                write!(
                    f,
                    "Arquivo processado ({}): {}",
                    processed.format,
                    processed.source.display()
                )?;
                if let Some(backup) = &processed.backup {
                    write!(f, "\n  Backup criado: {}", backup.display())?;
                }
                if let Some(output) = &processed.output {
                    write!(f, "\n  Convertido para JSON: {}", output.display())?;
                }
                if let Some(archived) = &processed.archived {
                    write!(f, "\n  Arquivo movido para: {}", archived.display())?;
                }
                for warning in &processed.warnings {
                    write!(f, "\n  Aviso: {warning}")?;
                }
                Ok(())
            }
            Self::Duplicate(path) => write!(f, "Arquivo já processado: {}", path.display()),
            Self::Exported(report) => {
                write!(
                    f,
                    "Exportação manual concluída ({}): {} arquivo(s)",
                    report.format,
                    report.written.len()
                )?;
                for path in &report.written {
                    write!(f, "\n  {}", path.display())?;
                }
                for (path, reason) in &report.skipped {
                    write!(f, "\n  Ignorado: {}: {reason}", path.display())?;
                }
                Ok(())
            }
            Self::Status(status) => write!(f, "{status}"),
            Self::Help => f.write_str(HELP),
            Self::Goodbye => f.write_str("Encerrando o programa..."),
        }
    }
}
