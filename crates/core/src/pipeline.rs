use crate::backup::{BackupMover, CommitReport};
use crate::classifier::{RetryPolicy, RetryingClassifier};
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::filter::{PathFilter, ProtectedPaths, ScanBudget};
use crate::models::FileRecord;
use crate::rate::RateLimiter;
use crate::review::ReviewSession;
use crate::scanner::{ScanStats, Scanner};
use anyhow::Context;
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use storage::Ledger;
use tracing::{info, warn};

pub struct ClassifiedRun {
    pub stats: ScanStats,
    pub session: ReviewSession,
    pub verdict_count: usize,
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new().with_provider("noop", Arc::new(NoopProvider));

    if let Some(api_key) = config.api_key() {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key,
            base_url: config.base_url(),
            chat_model: config.classifier.model.clone(),
        });
        reg = reg.with_provider("openai", Arc::new(provider));
    } else {
        warn!("No OpenAI credential found; only the noop provider is registered");
    }

    reg.set_preferred(&config.classifier.provider)
}

pub fn protected_paths(config: &AppConfig) -> anyhow::Result<ProtectedPaths> {
    ProtectedPaths::new(&config.protected_paths()).context("invalid protected path pattern")
}

pub fn build_filter(config: &AppConfig) -> anyhow::Result<PathFilter> {
    PathFilter::new(
        protected_paths(config)?,
        &config.scan.exclude,
        config.scan.min_file_size_kb,
        Arc::new(ScanBudget::new(config.scan.max_files)),
    )
    .context("invalid exclude pattern")
}

/// Walks the configured roots on a blocking thread.
pub async fn scan(config: &AppConfig) -> anyhow::Result<(Vec<FileRecord>, ScanStats)> {
    let filter = build_filter(config)?;
    let roots = config.roots();
    let programs = config.scan.programs.clone();
    info!("Starting scan of {} roots...", roots.len());
    let scanner = Scanner::new(roots, filter, programs);
    tokio::task::spawn_blocking(move || scanner.run())
        .await
        .context("scan task failed")
}

pub fn build_classifier(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<RetryingClassifier> {
    config.validate()?;
    let provider = registry
        .provider(None)
        .with_context(|| format!("classifier provider {:?} unavailable", config.classifier.provider))?;
    let policy = RetryPolicy {
        max_attempts: config.classifier.max_attempts,
        base_delay: Duration::from_millis(config.classifier.base_delay_ms),
        max_delay: Duration::from_millis(config.classifier.max_delay_ms),
    };
    let limiter = RateLimiter::new(
        config.classifier.requests_per_second,
        config.classifier.workers,
    );
    Ok(RetryingClassifier::new(provider, policy, Arc::new(limiter)))
}

/// Scan, classify and group. A fatal provider error aborts the whole run.
pub async fn classify(
    config: &AppConfig,
    registry: &ProviderRegistry,
) -> anyhow::Result<ClassifiedRun> {
    let classifier = build_classifier(config, registry)?;
    let (records, stats) = scan(config).await?;
    if stats.halted_by_limit {
        warn!(
            "Scan stopped at the {} file limit; remaining files were not considered",
            config.scan.max_files
        );
    }

    let dispatcher = Dispatcher::new(classifier, config.classifier.workers);
    let verdicts = dispatcher
        .run(records)
        .await
        .context("classification aborted")?;
    let verdict_count = verdicts.len();

    let session = ReviewSession::new(verdicts, &protected_paths(config)?);
    Ok(ClassifiedRun {
        stats,
        session,
        verdict_count,
    })
}

/// Relocates the resolved deletion set under the session's run id, so a
/// repeated commit of the same session skips what it already moved. Dry
/// runs use a throwaway ledger.
pub async fn commit(
    config: &AppConfig,
    session: &ReviewSession,
    dry_run: bool,
) -> anyhow::Result<CommitReport> {
    let ledger = if dry_run {
        Ledger::in_memory().await?
    } else {
        open_ledger(config).await?
    };
    let mover = BackupMover::new(
        config.backup_dir(),
        session.run_id(),
        ledger,
        protected_paths(config)?,
    );
    mover.commit(&session.resolved_deletion_set(), dry_run).await
}

pub async fn open_ledger(config: &AppConfig) -> anyhow::Result<Ledger> {
    let path = config.ledger_path();
    Ledger::open(&path.to_string_lossy())
        .await
        .with_context(|| format!("failed to open ledger at {}", path.display()))
}
