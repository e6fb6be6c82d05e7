//! Human-readable and JSON renderings of scan, review, commit and ledger
//! results.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt::Write;
use storage::LedgerRecord;
use sweeper_core::backup::CommitReport;
use sweeper_core::models::FileRecord;
use sweeper_core::review::{Bucket, ReviewSession};
use sweeper_core::scanner::ScanStats;

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn rejections(stats: &ScanStats) -> Vec<(&'static str, u64)> {
    let mut out: Vec<(&'static str, u64)> = stats
        .rejected
        .iter()
        .map(|(reason, count)| (reason.as_str(), *count))
        .collect();
    out.sort();
    out
}

fn levels(bucket: &Bucket) -> String {
    bucket
        .levels
        .iter()
        .map(|(level, count)| format!("{level}={count}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn scan_text(records: &[FileRecord], stats: &ScanStats) -> String {
    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "{:>10.2} MB  {:<20}  {}",
            record.size_mb(),
            record.program,
            record.path.display()
        );
    }
    let _ = writeln!(
        out,
        "scan: {} eligible of {} entries in {:.2}s{}",
        stats.eligible,
        stats.entries_seen,
        stats.elapsed.as_secs_f64(),
        if stats.halted_by_limit {
            " (stopped at file limit)"
        } else {
            ""
        }
    );
    for (reason, count) in rejections(stats) {
        let _ = writeln!(out, "  skipped {reason}: {count}");
    }
    out.push_str(&scan_errors_text(stats));
    out
}

pub fn scan_errors_text(stats: &ScanStats) -> String {
    let mut out = String::new();
    if stats.errors.is_empty() {
        return out;
    }
    let _ = writeln!(out, "scan errors: {}", stats.errors.len());
    for (path, reason) in &stats.errors {
        let _ = writeln!(out, "  {}: {}", path.display(), reason);
    }
    out
}

pub fn scan_json(records: &[FileRecord], stats: &ScanStats) -> Value {
    json!({
        "status": "ok",
        "records": records,
        "stats": stats_json(stats),
    })
}

fn stats_json(stats: &ScanStats) -> Value {
    let rejected: serde_json::Map<String, Value> = rejections(stats)
        .into_iter()
        .map(|(reason, count)| (reason.to_string(), json!(count)))
        .collect();
    json!({
        "entries_seen": stats.entries_seen,
        "eligible": stats.eligible,
        "rejected": rejected,
        "halted_by_limit": stats.halted_by_limit,
        "elapsed_secs": stats.elapsed.as_secs_f64(),
        "errors": stats.errors.iter().map(|(path, reason)| json!({
            "path": path,
            "reason": reason,
        })).collect::<Vec<_>>(),
    })
}

pub fn buckets_text(session: &ReviewSession) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<14} {:>7} {:>12}  levels",
        "program", "importance", "files", "size (MB)"
    );
    for bucket in session.summary() {
        let _ = writeln!(
            out,
            "{:<24} {:<14} {:>7} {:>12.2}  {}",
            bucket.key.program,
            bucket.key.importance.as_str(),
            bucket.count(),
            bucket.total_mb(),
            levels(bucket)
        );
    }
    let protected = session.protected_rejections();
    if !protected.is_empty() {
        let _ = writeln!(out, "protected paths withheld from review: {}", protected.len());
    }
    out
}

pub fn unknowns_text(session: &ReviewSession) -> String {
    let mut out = String::new();
    let mut unknowns = session.unknown_verdicts().peekable();
    if unknowns.peek().is_none() {
        return out;
    }
    let _ = writeln!(out, "unclassified files (kept unless removed explicitly):");
    for verdict in unknowns {
        let _ = writeln!(
            out,
            "  {}: {}",
            verdict.record.path.display(),
            verdict.rationale
        );
    }
    out
}

fn buckets_json(session: &ReviewSession) -> Value {
    session
        .summary()
        .iter()
        .map(|bucket| {
            let levels: serde_json::Map<String, Value> = bucket
                .levels
                .iter()
                .map(|(level, count)| (level.as_str().to_string(), json!(count)))
                .collect();
            json!({
                "program": bucket.key.program,
                "importance": bucket.key.importance,
                "files": bucket.count(),
                "total_bytes": bucket.total_bytes,
                "levels": levels,
                "keep": session.keeps(&bucket.key),
            })
        })
        .collect()
}

pub fn commit_text(report: &CommitReport) -> String {
    let mut out = String::new();
    let verb = if report.dry_run { "would move" } else { "moved" };
    for entry in &report.entries {
        let _ = writeln!(
            out,
            "{verb}: {} -> {}",
            entry.original.display(),
            entry.backup.display()
        );
    }
    for path in &report.already_backed_up {
        let _ = writeln!(out, "already backed up: {}", path.display());
    }
    for failure in &report.failures {
        let _ = writeln!(out, "failed: {}: {}", failure.path.display(), failure.reason);
    }
    let _ = writeln!(
        out,
        "run {}{}: {} files {verb} ({:.2} MB), {} already backed up, {} failed",
        report.run_id,
        if report.dry_run { " (dry run)" } else { "" },
        report.entries.len(),
        mb(report.moved_bytes()),
        report.already_backed_up.len(),
        report.failures.len()
    );
    out
}

pub fn run_json(
    stats: &ScanStats,
    session: &ReviewSession,
    commit: Option<&CommitReport>,
) -> Value {
    let unknowns: Vec<Value> = session
        .unknown_verdicts()
        .map(|v| json!({ "path": v.record.path, "reason": v.rationale }))
        .collect();
    json!({
        "status": "ok",
        "scan": stats_json(stats),
        "buckets": buckets_json(session),
        "unknown": unknowns,
        "commit": commit,
    })
}

fn format_ts(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

pub fn ledger_text(rows: &[LedgerRecord]) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        out.push_str("ledger is empty\n");
        return out;
    }
    for row in rows {
        let _ = writeln!(
            out,
            "{}  {}  {} -> {}  ({} bytes)",
            row.run_id,
            format_ts(row.moved_at),
            row.original_path,
            row.backup_path,
            row.size
        );
    }
    out
}

pub fn ledger_json(rows: &[LedgerRecord]) -> Value {
    json!({
        "status": "ok",
        "entries": rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use sweeper_core::backup::MoveFailure;
    use sweeper_core::models::BackupEntry;

    fn report(dry_run: bool) -> CommitReport {
        CommitReport {
            run_id: "20240101T000000Z".into(),
            dry_run,
            entries: vec![BackupEntry {
                run_id: "20240101T000000Z".into(),
                original: PathBuf::from("/tmp/app/cache.log"),
                backup: PathBuf::from("/b/20240101T000000Z/tmp/app/cache.log"),
                moved_at: Utc::now(),
                size: 2 * 1024 * 1024,
            }],
            already_backed_up: vec![PathBuf::from("/tmp/app/old.log")],
            failures: vec![MoveFailure {
                path: PathBuf::from("/tmp/app/gone.log"),
                reason: "No such file or directory".into(),
            }],
        }
    }

    #[test]
    fn commit_text_lists_every_outcome() {
        let text = commit_text(&report(false));
        assert!(text.contains("moved: /tmp/app/cache.log -> /b/20240101T000000Z/tmp/app/cache.log"));
        assert!(text.contains("already backed up: /tmp/app/old.log"));
        assert!(text.contains("failed: /tmp/app/gone.log: No such file or directory"));
        assert!(text.contains("1 files moved (2.00 MB), 1 already backed up, 1 failed"));

        let dry = commit_text(&report(true));
        assert!(dry.contains("would move: /tmp/app/cache.log"));
        assert!(dry.contains("(dry run)"));
    }

    #[test]
    fn ledger_rows_render() {
        let rows = vec![LedgerRecord {
            run_id: "r1".into(),
            original_path: "/tmp/a.log".into(),
            backup_path: "/b/r1/tmp/a.log".into(),
            moved_at: 0,
            size: 7,
        }];
        let text = ledger_text(&rows);
        assert!(text.contains("r1  1970-01-01T00:00:00+00:00  /tmp/a.log -> /b/r1/tmp/a.log  (7 bytes)"));
        assert_eq!(ledger_json(&rows)["entries"][0]["size"], 7);
        assert_eq!(ledger_text(&[]), "ledger is empty\n");
    }

    #[test]
    fn scan_errors_are_reported() {
        let stats = ScanStats {
            errors: vec![(PathBuf::from("/root/secret"), "permission denied".into())],
            ..ScanStats::default()
        };
        let text = scan_text(&[], &stats);
        assert!(text.contains("scan errors: 1"));
        assert!(text.contains("/root/secret: permission denied"));
        assert_eq!(
            scan_json(&[], &stats)["stats"]["errors"][0]["reason"],
            "permission denied"
        );
    }
}
