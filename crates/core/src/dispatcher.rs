//! Fans file records out to concurrent classification workers.

use crate::classifier::RetryingClassifier;
use crate::error::{ClassifyError, DispatchError};
use crate::models::{FileRecord, Verdict};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, Instrument};

pub struct Dispatcher {
    classifier: RetryingClassifier,
    workers: usize,
}

impl Dispatcher {
    pub fn new(classifier: RetryingClassifier, workers: usize) -> Self {
        Self {
            classifier,
            workers: workers.max(1),
        }
    }

    /// Classifies every distinct record exactly once. Verdicts come back in
    /// completion order. A fatal error from any worker aborts the others and
    /// discards everything collected so far.
    pub async fn run<I>(&self, records: I) -> Result<Vec<Verdict>, DispatchError>
    where
        I: IntoIterator<Item = FileRecord>,
    {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for record in records {
            if seen.insert(record.path.clone()) {
                unique.push(Arc::new(record));
            } else {
                debug!(path = %record.path.display(), "duplicate record dropped");
            }
        }

        let expected = unique.len();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let workers = self.workers.min(expected);
        let queue = Arc::new(WorkQueue::new(unique));

        info!("Starting classification of {} files with {} workers", expected, workers);
        let started = Instant::now();
        let cancel = self.classifier.cancellation().clone();
        let (tx, mut rx) = mpsc::channel::<Verdict>(workers * 4);
        let mut join_set = JoinSet::new();
        for worker in 1..=workers {
            let queue = queue.clone();
            let classifier = self.classifier.clone();
            let tx = tx.clone();
            join_set.spawn(
                run_worker(worker, queue, classifier, tx).instrument(info_span!("worker", id = worker)),
            );
        }
        drop(tx);

        let mut verdicts = Vec::with_capacity(expected);
        loop {
            tokio::select! {
                Some(verdict) = rx.recv() => {
                    verdicts.push(verdict);
                    if verdicts.len() % 100 == 0 {
                        info!("Processed {}/{} files", verdicts.len(), expected);
                    }
                }
                Some(joined) = join_set.join_next() => match joined {
                    Ok(Ok(count)) => debug!(classified = count, "worker finished"),
                    Ok(Err(err)) => {
                        cancel.cancel();
                        join_set.abort_all();
                        return Err(err);
                    }
                    Err(join_err) => {
                        cancel.cancel();
                        join_set.abort_all();
                        return Err(DispatchError::WorkerPanicked(join_err.to_string()));
                    }
                },
                else => break,
            }
        }

        if verdicts.len() != expected {
            return Err(DispatchError::Incomplete {
                expected,
                collected: verdicts.len(),
            });
        }
        info!(
            "Classification complete in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(verdicts)
    }
}

/// Records waiting for a worker. Each worker pulls its next record when it
/// finishes the previous one, so a slow file never holds up the rest.
struct WorkQueue {
    pending: Mutex<VecDeque<Arc<FileRecord>>>,
}

impl WorkQueue {
    fn new(records: Vec<Arc<FileRecord>>) -> Self {
        Self {
            pending: Mutex::new(records.into()),
        }
    }

    fn next(&self) -> Option<Arc<FileRecord>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<WorkQueue>,
    classifier: RetryingClassifier,
    tx: mpsc::Sender<Verdict>,
) -> Result<usize, DispatchError> {
    debug!("worker started");
    let mut count = 0usize;
    while let Some(record) = queue.next() {
        match classifier.classify(record).await {
            Ok(verdict) => {
                if tx.send(verdict).await.is_err() {
                    break;
                }
                count += 1;
            }
            Err(ClassifyError::Fatal { path, message }) => {
                return Err(DispatchError::Fatal {
                    worker,
                    path,
                    message,
                });
            }
            Err(ClassifyError::Cancelled) => {
                debug!("worker cancelled");
                break;
            }
        }
    }
    Ok(count)
}
