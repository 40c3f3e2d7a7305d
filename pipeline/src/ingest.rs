//! Consumer of watcher events.

use std::sync::Arc;

use autoproc_directory_watcher::{FileEvent, FileEventKind};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::converter::{Converter, Outcome};
use crate::error::PipelineError;
use crate::state::SharedState;

/// Feeds stable files into a bounded pool of conversion tasks.
pub struct IngestWorker {
    converter: Converter,
    state: SharedState,
    max_concurrent: usize,
}

impl IngestWorker {
    pub fn new(state: SharedState, max_concurrent: usize) -> Self {
        Self {
            converter: Converter::new(state.clone()),
            state,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Consume `events` until cancelled or the sender goes away, then wait
    /// for conversions already started.
    pub async fn run(self, mut events: mpsc::Receiver<FileEvent>, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Conversion task failed: {e}");
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match event.kind {
                        FileEventKind::Detected => {
                            debug!("New file detected: {}", event.path.display());
                            self.state.detected(&event.path, event.fingerprint).await;
                        }
                        FileEventKind::Removed => {
                            self.state.removed(&event.path).await;
                        }
                        FileEventKind::Stable => {
                            let permit = tokio::select! {
                                _ = cancel.cancelled() => break,
                                permit = semaphore.clone().acquire_owned() => match permit {
                                    Ok(permit) => permit,
                                    Err(_) => break,
                                },
                            };
                            let converter = self.converter.clone();
                            tasks.spawn(async move {
                                let _permit = permit;
                                convert(&converter, event).await;
                            });
                        }
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} conversions to finish", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Conversion task failed: {e}");
            }
        }
        debug!("Ingest worker stopped");
    }
}

async fn convert(converter: &Converter, event: FileEvent) {
    match converter.process(&event.path, event.fingerprint, false).await {
        Ok(Outcome::Processed(processed)) => {
            for warning in &processed.warnings {
                warn!("{}: {warning}", processed.source.display());
            }
        }
        Ok(Outcome::Duplicate(_)) => {}
        Err(PipelineError::AlreadyInFlight(path)) => {
            debug!("Already being processed: {}", path.display());
        }
        // Already logged and recorded as Failed by the converter.
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::state::FileState;
    use autoproc_directory_watcher::Fingerprint;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stable_events_are_converted_and_drained() {
        let root = TempDir::new().unwrap();
        let config = ProcessingConfig::new(
            root.path().join("in"),
            root.path().join("out"),
            root.path().join("arch"),
        )
        .with_backup(false);
        fs::create_dir_all(&config.input_dir).unwrap();
        let state = SharedState::new(config.clone());

        let paths: Vec<_> = (0..5)
            .map(|i| {
                let path = config.input_dir.join(format!("f{i}.csv"));
                fs::write(&path, format!("id\n{i}\n")).unwrap();
                path
            })
            .collect();

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(IngestWorker::new(state.clone(), 2).run(rx, cancel.clone()));

        for path in &paths {
            let fingerprint = Fingerprint::of(path);
            tx.send(FileEvent::new(FileEventKind::Detected, path).with_fingerprint(fingerprint))
                .await
                .unwrap();
            tx.send(FileEvent::new(FileEventKind::Stable, path).with_fingerprint(fingerprint))
                .await
                .unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        for path in &paths {
            assert_eq!(state.state_of(path).await, Some(FileState::Archived));
            assert!(!path.exists());
        }
        assert_eq!(state.ledger().await.len(), 5);
    }

    #[tokio::test]
    async fn test_cancel_drains_running_conversion_and_skips_queued() {
        const ROWS: usize = 300_000;

        let root = TempDir::new().unwrap();
        let config = ProcessingConfig::new(
            root.path().join("in"),
            root.path().join("out"),
            root.path().join("arch"),
        )
        .with_auto_convert_json(true)
        .with_backup(false);
        fs::create_dir_all(&config.input_dir).unwrap();
        let state = SharedState::new(config.clone());

        let big = config.input_dir.join("big.csv");
        let mut csv = String::from("id,name\n");
        for i in 0..ROWS {
            csv.push_str(&format!("{i},name{i}\n"));
        }
        fs::write(&big, csv).unwrap();
        let queued: Vec<_> = (0..3)
            .map(|i| {
                let path = config.input_dir.join(format!("q{i}.csv"));
                fs::write(&path, "id\n1\n").unwrap();
                path
            })
            .collect();

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(IngestWorker::new(state.clone(), 1).run(rx, cancel.clone()));

        for path in std::iter::once(&big).chain(&queued) {
            let event =
                FileEvent::new(FileEventKind::Stable, path).with_fingerprint(Fingerprint::of(path));
            tx.send(event).await.unwrap();
        }

        for _ in 0..500 {
            if state.state_of(&big).await.is_some_and(FileState::is_in_flight) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(state.state_of(&big).await.is_some_and(FileState::is_in_flight));
        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(state.state_of(&big).await, Some(FileState::Archived));
        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(config.output_dir.join("big.json")).unwrap()).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(ROWS));

        for path in &queued {
            assert!(path.exists());
            assert_eq!(state.state_of(path).await, None);
        }
        assert_eq!(state.ledger().await.len(), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn test_removed_before_stable_is_forgotten() {
        let state = SharedState::new(ProcessingConfig::new("in", "out", "arch"));
        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(IngestWorker::new(state.clone(), 1).run(rx, CancellationToken::new()));

        tx.send(FileEvent::new(FileEventKind::Detected, "in/a.csv")).await.unwrap();
        tx.send(FileEvent::new(FileEventKind::Removed, "in/a.csv")).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(state.counts().await.detected, 0);
    }
}
