//! Reversible removal: approved files are moved under a per-run backup tree
//! and every move is recorded in the ledger.

use crate::filter::ProtectedPaths;
use crate::models::{BackupEntry, FileRecord};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use storage::Ledger;
use tracing::{debug, info, warn};

pub const RUN_ID_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub fn run_id_now() -> String {
    Utc::now().format(RUN_ID_FORMAT).to_string()
}

/// `<backup_root>/<run_id>/<original without its root>`.
pub fn backup_destination(backup_root: &Path, run_id: &str, original: &Path) -> PathBuf {
    let mut dest = backup_root.join(run_id);
    for component in original.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                dest.pop();
            }
            Component::Normal(part) => dest.push(part),
        }
    }
    dest
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub run_id: String,
    pub dry_run: bool,
    pub entries: Vec<BackupEntry>,
    pub already_backed_up: Vec<PathBuf>,
    pub failures: Vec<MoveFailure>,
}

impl CommitReport {
    pub fn moved_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

pub struct BackupMover {
    backup_root: PathBuf,
    run_id: String,
    ledger: Ledger,
    protected: ProtectedPaths,
}

impl BackupMover {
    pub fn new(
        backup_root: PathBuf,
        run_id: impl Into<String>,
        ledger: Ledger,
        protected: ProtectedPaths,
    ) -> Self {
        Self {
            backup_root,
            run_id: run_id.into(),
            ledger,
            protected,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Moves each record into the backup tree. Per-file problems, ledger
    /// errors included, are collected in the report and never stop the
    /// batch. A file whose move cannot be recorded is moved back.
    pub async fn commit(
        &self,
        deletion_set: &[Arc<FileRecord>],
        dry_run: bool,
    ) -> anyhow::Result<CommitReport> {
        let mut report = CommitReport {
            run_id: self.run_id.clone(),
            dry_run,
            ..CommitReport::default()
        };
        info!(
            run_id = %self.run_id,
            dry_run,
            "Committing {} files to {}",
            deletion_set.len(),
            self.backup_root.display()
        );

        for record in deletion_set {
            let original = &record.path;
            if self.protected.is_protected(original) {
                warn!(path = %original.display(), "refusing to move protected path");
                report.failures.push(MoveFailure {
                    path: original.clone(),
                    reason: "protected path".to_string(),
                });
                continue;
            }

            let key = original.to_string_lossy();
            match self.ledger.contains(&self.run_id, &key).await {
                Ok(true) => {
                    debug!(path = %original.display(), "already backed up in this run");
                    report.already_backed_up.push(original.clone());
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(path = %original.display(), error = %err, "ledger lookup failed");
                    report.failures.push(MoveFailure {
                        path: original.clone(),
                        reason: format!("ledger lookup failed: {err}"),
                    });
                    continue;
                }
            }

            let backup = backup_destination(&self.backup_root, &self.run_id, original);
            let entry = BackupEntry {
                run_id: self.run_id.clone(),
                original: original.clone(),
                backup: backup.clone(),
                moved_at: Utc::now(),
                size: record.size,
            };

            if dry_run {
                info!(
                    path = %original.display(),
                    backup = %backup.display(),
                    "[dry run] would move"
                );
                report.entries.push(entry);
                continue;
            }

            match move_file(original, &backup) {
                Ok(()) => {
                    if let Err(err) = self.ledger.append(&entry.to_ledger()).await {
                        let reason = match move_file(&backup, original) {
                            Ok(()) => format!("ledger append failed: {err}; file restored"),
                            Err(undo) => format!(
                                "ledger append failed: {err}; file left at {} ({undo})",
                                backup.display()
                            ),
                        };
                        warn!(path = %original.display(), "{reason}");
                        report.failures.push(MoveFailure {
                            path: original.clone(),
                            reason,
                        });
                        continue;
                    }
                    info!(
                        path = %original.display(),
                        backup = %backup.display(),
                        "moved to backup"
                    );
                    report.entries.push(entry);
                }
                Err(err) => {
                    warn!(path = %original.display(), error = %err, "move failed");
                    report.failures.push(MoveFailure {
                        path: original.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            moved = report.entries.len(),
            already = report.already_backed_up.len(),
            failed = report.failures.len(),
            "Commit finished, {:.2} MB relocated",
            report.moved_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(report)
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", to.display()),
        ));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(error = %rename_err, "rename failed, copying instead");
            fs::copy(from, to)?;
            if let Err(err) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(err);
            }
            Ok(())
        }
    }
}
