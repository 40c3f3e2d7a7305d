//! Directory watcher implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::DirectoryConfig;
use crate::debounce::Debouncer;
use crate::error::{Result, WatcherError};
use crate::event::{FileEvent, FileEventKind, Fingerprint};
use crate::indexer::{FileIndexer, IndexedFile};

type RawEvent = (FileEventKind, PathBuf);

/// Watches one directory and reports files once they stop changing.
///
/// Files already present at [`start`](Self::start) are reported as if they
/// had just been created. Every file is reported as
/// [`FileEventKind::Detected`] when first seen and
/// [`FileEventKind::Stable`] once it has been unchanged for the
/// configured quiescence window.
pub struct DirectoryWatcher {
    /// Watched directory configuration.
    config: Arc<DirectoryConfig>,

    /// Consumer of debounced events.
    event_tx: mpsc::Sender<FileEvent>,

    /// Internal notify watcher.
    watcher: Option<RecommendedWatcher>,

    /// Debounce task.
    task: Option<JoinHandle<()>>,

    /// Cancels the debounce task.
    cancel: CancellationToken,
}

impl DirectoryWatcher {
    /// Create a new directory watcher that sends events to `event_tx`.
    pub fn new(config: DirectoryConfig, event_tx: mpsc::Sender<FileEvent>) -> Self {
        Self {
            config: Arc::new(config),
            event_tx,
            watcher: None,
            task: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a watcher together with the receiving end of its event queue.
    pub fn channel(config: DirectoryConfig) -> (Self, mpsc::Receiver<FileEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity);
        (Self::new(config, event_tx), event_rx)
    }

    /// The watched directory configuration.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Check if the watcher is running.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let path = self.config.path.clone();
        if self.is_running() {
            return Err(WatcherError::AlreadyWatching(path.display().to_string()));
        }
        if !path.is_dir() {
            return Err(WatcherError::DirectoryNotFound(path.display().to_string()));
        }

        let (raw_tx, raw_rx) = mpsc::channel::<RawEvent>(self.config.queue_capacity);
        let filter = self.config.clone();

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(kind) = FileEventKind::from_notify(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        if filter.should_exclude(&path) {
                            trace!("Ignoring excluded path: {}", path.display());
                            continue;
                        }
                        if let Err(e) = raw_tx.blocking_send((kind, path)) {
                            error!("Failed to forward file event: {e}");
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        // Registered before scanning so nothing created in between is missed;
        // the debouncer collapses files seen by both.
        let existing = FileIndexer::new((*self.config).clone()).scan()?;

        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(run_debounce(
            self.config.clone(),
            existing,
            raw_rx,
            self.event_tx.clone(),
            self.cancel.clone(),
        )));
        self.watcher = Some(watcher);

        info!("Directory watcher started: {}", path.display());
        Ok(())
    }

    /// Stop watching. Returns once the debounce task has exited; files that
    /// were still settling are dropped and will be picked up by the next
    /// initial scan.
    pub async fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.config.path) {
                debug!("Unwatch failed for {}: {e}", self.config.path.display());
            }
        }

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Debounce task ended abnormally: {e}");
            }
            info!("Directory watcher stopped: {}", self.config.path.display());
        }
    }
}

async fn emit(event_tx: &mpsc::Sender<FileEvent>, event: FileEvent) -> bool {
    trace!("{:?} {}", event.kind, event.path.display());
    if event_tx.send(event).await.is_err() {
        debug!("Event receiver dropped, stopping debounce task");
        return false;
    }
    true
}

async fn run_debounce(
    config: Arc<DirectoryConfig>,
    existing: Vec<IndexedFile>,
    mut raw_rx: mpsc::Receiver<RawEvent>,
    event_tx: mpsc::Sender<FileEvent>,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(config.quiescence);

    let now = Instant::now();
    for file in existing {
        debouncer.observe(&file.path, Some(file.fingerprint), now);
        let event = FileEvent::new(FileEventKind::Detected, file.path)
            .with_fingerprint(Some(file.fingerprint));
        if !emit(&event_tx, event).await {
            return;
        }
    }

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            raw = raw_rx.recv() => {
                let Some((kind, path)) = raw else {
                    break;
                };
                match kind {
                    FileEventKind::Detected => {
                        let Some(fingerprint) = Fingerprint::of(&path) else {
                            continue;
                        };
                        if debouncer.observe(&path, Some(fingerprint), Instant::now()) {
                            let event = FileEvent::new(FileEventKind::Detected, path)
                                .with_fingerprint(Some(fingerprint));
                            if !emit(&event_tx, event).await {
                                break;
                            }
                        }
                    }
                    FileEventKind::Removed => {
                        debouncer.forget(&path);
                        if !emit(&event_tx, FileEvent::new(FileEventKind::Removed, path)).await {
                            break;
                        }
                    }
                    FileEventKind::Stable => {}
                }
            }
            _ = ticker.tick() => {
                for stable in debouncer.poll(Instant::now(), Fingerprint::of) {
                    debug!("File settled: {}", stable.path.display());
                    let event = FileEvent::new(FileEventKind::Stable, stable.path)
                        .with_fingerprint(Some(stable.fingerprint));
                    if !emit(&event_tx, event).await {
                        return;
                    }
                }
            }
        }
    }

    if !debouncer.is_empty() {
        debug!("{} files still settling at shutdown", debouncer.len());
    }
}
