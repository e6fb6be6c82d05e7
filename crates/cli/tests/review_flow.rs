use providers::{AssessRequest, Assessment, ImportanceProvider, ProviderError, ProviderRegistry};
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use sweeper_core::config::AppConfig;
use sweeper_core::pipeline;

/// Everything under a `logs` directory is disposable.
struct LogsAreJunk;

#[async_trait::async_trait]
impl ImportanceProvider for LogsAreJunk {
    async fn assess(&self, request: &AssessRequest) -> Result<Assessment, ProviderError> {
        Ok(Assessment {
            important: !request.components.iter().any(|c| c == "logs"),
            level: Some("Low".into()),
            rationale: Some("by directory".into()),
        })
    }
}

#[tokio::test]
async fn interactive_review_moves_only_rejected_buckets() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("caches");
    let backup = temp.path().join("backup");
    let junk = root.join("editor").join("logs").join("session.log");
    let keep = root.join("editor").join("index.db");
    for path in [&junk, &keep] {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; 20 * 1024]).unwrap();
    }

    let mut cfg = AppConfig::default();
    cfg.scan.roots = vec![root.to_string_lossy().into_owned()];
    cfg.scan.protected_paths = vec![];
    cfg.classifier.requests_per_second = 0.0;
    cfg.safety.backup_dir = backup.to_string_lossy().into_owned();
    cfg.safety.dry_run = false;

    let registry = ProviderRegistry::new()
        .with_provider("mock", Arc::new(LogsAreJunk))
        .set_preferred("mock");
    let mut run = pipeline::classify(&cfg, &registry).await.unwrap();

    // Both buckets are 20 KB; "editor:important" sorts before
    // "editor:non-important", so answer keep, then remove.
    let mut input = Cursor::new("y\nn\n");
    let mut output = Vec::new();
    let removed =
        cli::prompt::collect_decisions(&mut run.session, &mut input, &mut output).unwrap();
    assert_eq!(removed, 1);

    let report = pipeline::commit(&cfg, &run.session, false).await.unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].original, junk);
    assert!(!junk.exists());
    assert!(keep.exists());

    let text = cli::report::commit_text(&report);
    assert!(text.contains("1 files moved"));

    let rows = pipeline::open_ledger(&cfg)
        .await
        .unwrap()
        .entries(None)
        .await
        .unwrap();
    assert_eq!(cli::report::ledger_json(&rows)["entries"].as_array().unwrap().len(), 1);
}
