use crate::models::Importance;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("fatal classification error for {}: {message}", path.display())]
    Fatal { path: PathBuf, message: String },
    #[error("classification cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("worker {worker} aborted the run on {}: {message}", path.display())]
    Fatal {
        worker: usize,
        path: PathBuf,
        message: String,
    },
    #[error("classification worker failed: {0}")]
    WorkerPanicked(String),
    #[error("expected {expected} verdicts, collected {collected}")]
    Incomplete { expected: usize, collected: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReviewError {
    #[error("no bucket for {program}:{importance}")]
    UnknownBucket {
        program: String,
        importance: Importance,
    },
    #[error("invalid bucket key {0:?}, expected PROGRAM:LABEL[:LEVEL,...]")]
    InvalidKey(String),
}
