//! End-to-end tests for the ingestion pipeline.
//!
//! Each test runs a coordinator against its own temporary input, output and
//! archive directories.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use autoproc_codec::Format;
use autoproc_pipeline::{
    Command, Coordinator, Directories, ExportMode, FileState, Outcome, PipelineError,
    PipelineSettings, Response,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn settings(root: &TempDir) -> PipelineSettings {
    PipelineSettings::new(
        root.path().join("input"),
        root.path().join("output"),
        root.path().join("archive"),
    )
    .with_debounce(Duration::from_millis(50))
    .with_export_interval_minutes(0)
    .with_scheduler_tick(Duration::from_millis(20))
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

async fn wait_for_terminal(coordinator: &Coordinator, path: &Path) -> FileState {
    for _ in 0..500 {
        if let Some(state) = coordinator.state().state_of(path).await {
            if state.is_terminal() {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never finished processing", path.display());
}

#[tokio::test]
async fn test_watched_csv_is_converted_and_archived() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root).with_auto_convert_json(true))
        .await
        .unwrap();
    assert!(coordinator.start().await.unwrap());

    let input = root.path().join("input").join("a.csv");
    fs::write(&input, "id,name\n1,x\n").unwrap();

    assert_eq!(wait_for_terminal(&coordinator, &input).await, FileState::Archived);
    coordinator.stop().await;

    let output = root.path().join("output").join("a.json");
    assert_eq!(read_json(&output), serde_json::json!([{"id": 1, "name": "x"}]));

    assert!(!input.exists());
    let archived = files_in(&root.path().join("archive"));
    assert_eq!(archived.len(), 1);
    let name = archived[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("a_") && name.ends_with(".csv"), "{name}");
    assert_eq!(name.len(), "a_".len() + 17 + ".csv".len());
    assert_eq!(files_in(&root.path().join("output").join("backups")).len(), 1);
}

#[tokio::test]
async fn test_existing_files_are_picked_up_on_start() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root)).await.unwrap();
    let input = root.path().join("input").join("early.xml");
    fs::write(&input, "<rows><row><id>1</id></row></rows>").unwrap();

    coordinator.start().await.unwrap();
    assert_eq!(wait_for_terminal(&coordinator, &input).await, FileState::Archived);
    coordinator.stop().await;

    assert_eq!(coordinator.state().ledger().await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_processing_writes_once() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(
        settings(&root)
            .with_auto_convert_json(true)
            .with_archive(false),
    )
    .await
    .unwrap();

    let input = root.path().join("input").join("a.csv");
    fs::write(&input, "id\n1\n").unwrap();

    assert!(matches!(
        coordinator.process(&input).await.unwrap(),
        Outcome::Processed(_)
    ));
    let output = root.path().join("output").join("a.json");
    let first_write = fs::metadata(&output).unwrap().modified().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        coordinator.process(&input).await.unwrap(),
        Outcome::Duplicate(input.clone())
    );
    assert_eq!(fs::metadata(&output).unwrap().modified().unwrap(), first_write);
    assert!(coordinator.state().ledger().await.is_empty());
    assert_eq!(files_in(&root.path().join("output").join("backups")).len(), 1);
}

#[tokio::test]
async fn test_spellings_of_one_file_are_processed_once() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(
        settings(&root)
            .with_auto_convert_json(true)
            .with_archive(false),
    )
    .await
    .unwrap();

    let input = root.path().join("input").join("a.csv");
    fs::write(&input, "id\n1\n").unwrap();
    let detour = root.path().join("input").join("..").join("input").join("a.csv");
    let bare = Path::new("a.csv");

    let (direct, dotted, named) = tokio::join!(
        coordinator.process(&input),
        coordinator.process(&detour),
        coordinator.process(bare),
    );
    let results = [direct, dotted, named];
    let processed = results
        .iter()
        .filter(|r| matches!(r, Ok(Outcome::Processed(_))))
        .count();
    assert_eq!(processed, 1, "{results:?}");
    assert!(results.iter().all(|r| matches!(
        r,
        Ok(Outcome::Processed(_)) | Ok(Outcome::Duplicate(_)) | Err(PipelineError::AlreadyInFlight(_))
    )));

    assert!(matches!(
        coordinator.process(&detour).await.unwrap(),
        Outcome::Duplicate(_)
    ));
    assert_eq!(coordinator.status().await.counts.archived, 1);
    assert_eq!(coordinator.state().tracked().await, 1);
    assert_eq!(files_in(&root.path().join("output").join("backups")).len(), 1);
}

#[tokio::test]
async fn test_toggling_archive_affects_only_later_files() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root)).await.unwrap();
    let a = root.path().join("input").join("a.csv");
    let b = root.path().join("input").join("b.csv");
    fs::write(&a, "id\n1\n").unwrap();
    fs::write(&b, "id\n2\n").unwrap();

    coordinator.process(&a).await.unwrap();
    let response = coordinator.dispatch(Command::Archive(false)).await.unwrap();
    assert_eq!(response.to_string(), "Arquivamento de arquivos processados: desativado");
    coordinator.process(&b).await.unwrap();

    assert!(!a.exists());
    assert!(b.exists());
    assert_eq!(files_in(&root.path().join("archive")).len(), 1);
    assert_eq!(coordinator.status().await.counts.archived, 2);
}

#[tokio::test]
async fn test_unclassifiable_file_fails_and_is_reported() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root)).await.unwrap();
    let input = root.path().join("input").join("mystery.bin");
    fs::write(&input, [0u8, 159, 146, 150, 0, 1]).unwrap();

    let result = coordinator.dispatch(Command::Process(input.clone())).await;
    assert!(matches!(result, Err(PipelineError::UnknownFormat(_))));
    assert!(input.exists());

    let status = coordinator.status().await;
    assert_eq!(status.counts.failed, 1);
    assert_eq!(status.failures.len(), 1);
    assert_eq!(status.failures[0].0, input);
    assert!(status.to_string().contains("mystery.bin"));
}

#[tokio::test]
async fn test_concurrent_watch_and_manual_process_convert_once() {
    let root = TempDir::new().unwrap();
    let coordinator = Arc::new(
        Coordinator::new(settings(&root).with_auto_convert_json(true))
            .await
            .unwrap(),
    );
    let input = root.path().join("input").join("race.csv");
    fs::write(&input, "id,name\n1,x\n2,y\n").unwrap();
    coordinator.start().await.unwrap();

    let manual = {
        let coordinator = coordinator.clone();
        let input = input.clone();
        tokio::spawn(async move { coordinator.process(&input).await })
    };
    let manual = manual.await.unwrap();
    assert!(
        matches!(
            manual,
            Ok(Outcome::Processed(_))
                | Ok(Outcome::Duplicate(_))
                | Err(PipelineError::AlreadyInFlight(_))
                | Err(PipelineError::Io { .. })
        ),
        "{manual:?}"
    );

    assert_eq!(wait_for_terminal(&coordinator, &input).await, FileState::Archived);
    // Give a late watcher event the chance to run.
    tokio::time::sleep(Duration::from_millis(300)).await;
    coordinator.stop().await;

    assert_eq!(coordinator.state().ledger().await.len(), 1);
    assert_eq!(files_in(&root.path().join("archive")).len(), 1);
    assert_eq!(files_in(&root.path().join("output").join("backups")).len(), 1);
    assert_eq!(
        read_json(&root.path().join("output").join("race.json")),
        serde_json::json!([{"id": 1, "name": "x"}, {"id": 2, "name": "y"}])
    );
}

#[tokio::test]
async fn test_export_json_per_file_and_combined() {
    let root = TempDir::new().unwrap();
    let output = root.path().join("output");

    let coordinator = Coordinator::new(settings(&root)).await.unwrap();
    fs::write(output.join("a.csv"), "id\n1\n").unwrap();
    fs::write(output.join("b.csv"), "id\n2\n").unwrap();

    let Response::Exported(report) = coordinator
        .dispatch(Command::Export(Format::Json))
        .await
        .unwrap()
    else {
        panic!("expected an export report");
    };
    assert_eq!(report.written.len(), 2);
    assert!(report.written.iter().all(|p| p.starts_with(output.join("exports"))));
    drop(coordinator);

    let combined = Coordinator::new(settings(&root).with_export_mode(ExportMode::Combined))
        .await
        .unwrap();
    let report = combined.export(Format::Json).await.unwrap();
    assert_eq!(report.written.len(), 1);
    assert_eq!(
        read_json(&report.written[0]),
        serde_json::json!([{"id": 1}, {"id": 2}])
    );
}

#[tokio::test]
async fn test_ledger_survives_restart() {
    let root = TempDir::new().unwrap();
    let input = root.path().join("input").join("a.csv");
    {
        let coordinator = Coordinator::new(settings(&root)).await.unwrap();
        fs::write(&input, "id\n1\n").unwrap();
        coordinator.process(&input).await.unwrap();
    }

    let restarted = Coordinator::new(settings(&root)).await.unwrap();
    let status = restarted.status().await;
    assert_eq!(status.archived_total, 1);
    assert_eq!(restarted.state().ledger().await[0].original, input);
}

#[tokio::test]
async fn test_default_export_job_is_scheduled_on_start() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root).with_export_interval_minutes(60))
        .await
        .unwrap();

    assert_eq!(coordinator.status().await.scheduled_jobs, 0);
    coordinator.start().await.unwrap();
    assert!(!coordinator.start().await.unwrap());
    assert_eq!(coordinator.status().await.scheduled_jobs, 1);

    coordinator.stop().await;
    coordinator.start().await.unwrap();
    assert_eq!(coordinator.status().await.scheduled_jobs, 1);
    assert!(coordinator.stop().await);
    assert!(!coordinator.stop().await);
}

#[tokio::test]
async fn test_set_directories_restarts_watcher() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root)).await.unwrap();
    coordinator.start().await.unwrap();

    let moved = root.path().join("moved");
    coordinator
        .set_directories(Directories {
            input: moved.join("in"),
            output: moved.join("out"),
            archive: moved.join("arch"),
            backup: None,
        })
        .await
        .unwrap();
    assert!(coordinator.is_running().await);
    assert!(moved.join("out").join("backups").is_dir());

    let input = moved.join("in").join("late.json");
    fs::write(&input, r#"[{"id": 1}]"#).unwrap();
    assert_eq!(wait_for_terminal(&coordinator, &input).await, FileState::Archived);
    coordinator.stop().await;

    assert_eq!(files_in(&moved.join("arch")).len(), 1);
}

#[tokio::test]
async fn test_command_loop() {
    let root = TempDir::new().unwrap();
    let coordinator = Coordinator::new(settings(&root)).await.unwrap();
    let input = root.path().join("input").join("a.csv");
    fs::write(&input, "id\n1\n").unwrap();

    let script = format!(
        "ajuda\n\nconverter json on\ndançar\nbackup off\nprocessar {}\nstatus\nsair\nstatus\n",
        input.display()
    );
    let mut output = Vec::new();
    coordinator
        .run_command_loop(script.as_bytes(), &mut output)
        .await
        .unwrap();
    let output = String::from_utf8(output).unwrap();

    assert!(output.contains("Comandos disponíveis:"));
    assert!(output.contains("Conversão automática para JSON: ativada"));
    assert!(output.contains("Erro: unknown command: dançar"));
    assert!(output.contains("Criação de backups: desativada"));
    assert!(output.contains("Convertido para JSON:"));
    assert!(output.contains("Conversão para JSON: ativada"));
    assert!(output.contains("Backups: desativados"));
    assert!(output.ends_with("Encerrando o programa...\n"));
    assert_eq!(output.matches("Status do sistema:").count(), 1);

    assert!(root.path().join("output").join("a.json").exists());
    assert!(!coordinator.is_running().await);
}
