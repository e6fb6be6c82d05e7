//! Bounded-attempt retry around the remote importance provider.

use crate::error::ClassifyError;
use crate::models::{FileRecord, Importance, Level, Verdict};
use crate::rate::RateLimiter;
use providers::{AssessRequest, Assessment, ImportanceProvider, ProviderError};
use std::path::Component;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Run-wide cancellation flag, set once a fatal error is seen.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct RetryingClassifier {
    provider: Arc<dyn ImportanceProvider>,
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    cancel: Cancellation,
}

impl RetryingClassifier {
    pub fn new(
        provider: Arc<dyn ImportanceProvider>,
        policy: RetryPolicy,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            provider,
            policy,
            limiter,
            cancel: Cancellation::default(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Classifies one record. Retryable failures degrade to `unknown` once
    /// the attempt budget is spent; only fatal errors are returned.
    pub async fn classify(&self, record: Arc<FileRecord>) -> Result<Verdict, ClassifyError> {
        let started = Instant::now();
        let request = request_for(&record);
        let attempts = self.policy.max_attempts.max(1);
        let path = record.path.display().to_string();

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(ClassifyError::Cancelled);
            }
            self.limiter.acquire().await;

            let err = match self.provider.assess(&request).await {
                Ok(assessment) => {
                    let verdict = verdict_from(record.clone(), assessment, started, attempt);
                    info!(
                        path = %path,
                        attempt,
                        outcome = verdict.importance.as_str(),
                        level = ?verdict.level,
                        "classified: {}",
                        verdict.rationale
                    );
                    return Ok(verdict);
                }
                Err(err) => err,
            };

            if err.is_fatal() {
                error!(path = %path, attempt, error = %err, "fatal classification error");
                self.cancel.cancel();
                return Err(ClassifyError::Fatal {
                    path: record.path.clone(),
                    message: err.to_string(),
                });
            }

            if !err.is_retryable() {
                warn!(path = %path, attempt, error = %err, outcome = "unknown", "unusable response");
                return Ok(unknown(record, err.to_string(), started, attempt));
            }

            if attempt == attempts {
                warn!(
                    path = %path,
                    attempt,
                    error = %err,
                    outcome = "unknown",
                    "failed after retries"
                );
                return Ok(unknown(
                    record,
                    format!("failed after {attempts} attempts: {err}"),
                    started,
                    attempt,
                ));
            }

            let delay = backoff(&self.policy, attempt, &err);
            warn!(
                path = %path,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "retrying classification"
            );
            sleep_with_cancellation(&self.cancel, delay).await?;
        }

        // The loop always returns on its final attempt.
        Ok(unknown(record, "no attempts made".to_string(), started, 0))
    }
}

fn backoff(policy: &RetryPolicy, attempt: u32, err: &ProviderError) -> Duration {
    let delay = policy.delay_for(attempt);
    match err.retry_after() {
        Some(hint) => delay.max(hint),
        None => delay,
    }
}

async fn sleep_with_cancellation(
    cancel: &Cancellation,
    delay: Duration,
) -> Result<(), ClassifyError> {
    let started = tokio::time::Instant::now();
    while started.elapsed() < delay {
        if cancel.is_cancelled() {
            return Err(ClassifyError::Cancelled);
        }
        let remaining = delay.saturating_sub(started.elapsed());
        tokio::time::sleep(remaining.min(Duration::from_millis(100))).await;
    }
    if cancel.is_cancelled() {
        debug!("cancelled during backoff");
        return Err(ClassifyError::Cancelled);
    }
    Ok(())
}

pub fn request_for(record: &FileRecord) -> AssessRequest {
    AssessRequest {
        path: record.path.to_string_lossy().into_owned(),
        components: record
            .path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect(),
        size_bytes: record.size,
        program: record.program.clone(),
        modified: record.modified_rfc3339(),
        category: record.category.clone(),
    }
}

fn verdict_from(
    record: Arc<FileRecord>,
    assessment: Assessment,
    started: Instant,
    attempts: u32,
) -> Verdict {
    Verdict {
        record,
        importance: if assessment.important {
            Importance::Important
        } else {
            Importance::NonImportant
        },
        level: assessment.level.as_deref().and_then(Level::parse),
        rationale: assessment.rationale.unwrap_or_default(),
        latency: started.elapsed(),
        attempts,
    }
}

fn unknown(record: Arc<FileRecord>, rationale: String, started: Instant, attempts: u32) -> Verdict {
    Verdict {
        record,
        importance: Importance::Unknown,
        level: None,
        rationale,
        latency: started.elapsed(),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Replays a fixed script of responses, one per call.
    struct Scripted {
        script: Mutex<Vec<Result<Assessment, ProviderError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<Assessment, ProviderError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl ImportanceProvider for Scripted {
        async fn assess(&self, _request: &AssessRequest) -> Result<Assessment, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ProviderError::Transient("script exhausted".into())))
        }
    }

    fn important() -> Result<Assessment, ProviderError> {
        Ok(Assessment {
            important: true,
            level: Some("High".into()),
            rationale: Some("system file".into()),
        })
    }

    fn record() -> Arc<FileRecord> {
        Arc::new(FileRecord {
            path: PathBuf::from("/tmp/app/cache.log"),
            size: 2 * 1024 * 1024,
            program: "app".into(),
            accessed: None,
            modified: Some(0),
            category: Some("log".into()),
        })
    }

    fn classifier(provider: Arc<Scripted>, attempts: u32) -> RetryingClassifier {
        RetryingClassifier::new(
            provider,
            RetryPolicy {
                max_attempts: attempts,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            Arc::new(RateLimiter::unlimited()),
        )
    }

    #[tokio::test]
    async fn rate_limits_are_retried_transparently() {
        let provider = Scripted::new(vec![
            Err(ProviderError::rate_limited("429")),
            Err(ProviderError::rate_limited("429")),
            Err(ProviderError::rate_limited("429")),
            important(),
        ]);
        let verdict = classifier(provider.clone(), 5)
            .classify(record())
            .await
            .unwrap();
        assert_eq!(verdict.importance, Importance::Important);
        assert_eq!(verdict.level, Some(Level::High));
        assert_eq!(verdict.attempts, 4);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_unknown() {
        let provider = Scripted::new(vec![
            Err(ProviderError::Transient("503".into())),
            Err(ProviderError::rate_limited("429")),
            Err(ProviderError::Transient("reset".into())),
        ]);
        let verdict = classifier(provider.clone(), 3)
            .classify(record())
            .await
            .unwrap();
        assert_eq!(verdict.importance, Importance::Unknown);
        assert!(verdict.rationale.contains("failed after 3 attempts"));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn invalid_responses_are_unknown_without_retry() {
        let provider = Scripted::new(vec![Err(ProviderError::Invalid("not json".into()))]);
        let verdict = classifier(provider.clone(), 5)
            .classify(record())
            .await
            .unwrap();
        assert_eq!(verdict.importance, Importance::Unknown);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn fatal_errors_propagate_and_cancel() {
        let provider = Scripted::new(vec![Err(ProviderError::Fatal("invalid api key".into()))]);
        let classifier = classifier(provider, 5);
        let err = classifier.classify(record()).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Fatal { .. }));
        assert!(classifier.cancellation().is_cancelled());

        let again = classifier.classify(record()).await.unwrap_err();
        assert!(matches!(again, ClassifyError::Cancelled));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));

        let hinted = ProviderError::RateLimited {
            message: "slow".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(backoff(&policy, 1, &hinted), Duration::from_secs(2));
    }

    #[test]
    fn requests_carry_metadata_only() {
        let req = request_for(&record());
        assert_eq!(req.components, vec!["tmp", "app", "cache.log"]);
        assert_eq!(req.size_bytes, 2 * 1024 * 1024);
        assert_eq!(req.program, "app");
        assert_eq!(req.category.as_deref(), Some("log"));
    }
}
