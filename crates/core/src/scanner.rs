//! Walks the configured roots and yields eligible file records.

use crate::filter::{PathFilter, Rejection};
use crate::models::FileRecord;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const FALLBACK_PROGRAM: &str = "Others";

#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub entries_seen: u64,
    pub eligible: u64,
    pub rejected: HashMap<Rejection, u64>,
    pub errors: Vec<(PathBuf, String)>,
    pub halted_by_limit: bool,
    pub elapsed: Duration,
}

/// Lazy, single-pass sequence of eligible records. Entries are visited
/// depth-first in file-name order so a fixed tree always yields the same
/// sequence.
pub struct Scanner {
    roots: VecDeque<PathBuf>,
    current: Option<(PathBuf, walkdir::IntoIter)>,
    visited: HashSet<PathBuf>,
    filter: PathFilter,
    programs: Vec<String>,
    stats: ScanStats,
    started: Instant,
    halted: bool,
}

impl Scanner {
    pub fn new(roots: Vec<PathBuf>, filter: PathFilter, programs: Vec<String>) -> Self {
        Self {
            roots: roots.into(),
            current: None,
            visited: HashSet::new(),
            filter,
            programs,
            stats: ScanStats::default(),
            started: Instant::now(),
            halted: false,
        }
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Drains the scanner, returning every record plus the final statistics.
    pub fn run(mut self) -> (Vec<FileRecord>, ScanStats) {
        let records: Vec<FileRecord> = self.by_ref().collect();
        let mut stats = self.stats;
        stats.elapsed = self.started.elapsed();
        info!(
            "Found {} files after filtering (out of {} total) in {:.2}s",
            stats.eligible,
            stats.entries_seen,
            stats.elapsed.as_secs_f64()
        );
        (records, stats)
    }

    fn reject(&mut self, reason: Rejection) {
        *self.stats.rejected.entry(reason).or_default() += 1;
    }

    fn record_error(&mut self, path: PathBuf, reason: String) {
        warn!(path = %path.display(), "skipping: {}", reason);
        self.stats.errors.push((path, reason));
    }
}

impl Iterator for Scanner {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            if self.halted {
                return None;
            }
            if self.filter.budget().is_exhausted() {
                self.halted = true;
                self.stats.halted_by_limit = true;
                info!(
                    "Reached max files limit ({}), stopping scan",
                    self.filter.budget().max()
                );
                return None;
            }

            if self.current.is_none() {
                let root = self.roots.pop_front()?;
                if !root.exists() {
                    warn!("Directory {} does not exist, skipping", root.display());
                    continue;
                }
                let walker = WalkDir::new(&root)
                    .follow_links(true)
                    .sort_by_file_name()
                    .into_iter();
                self.current = Some((root, walker));
            }
            let Some((root, walker)) = self.current.as_mut() else {
                continue;
            };
            let root = root.clone();

            let entry = match walker.next() {
                None => {
                    self.current = None;
                    continue;
                }
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.clone());
                    if err.loop_ancestor().is_some() {
                        debug!(path = %path.display(), "symlink loop, not descending");
                    } else {
                        self.record_error(path, err.to_string());
                    }
                    continue;
                }
            };

            let path = entry.path().to_path_buf();
            if entry.file_type().is_dir() {
                let real = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                let fresh = self.visited.insert(real);
                if !fresh || !self.filter.should_descend(&path) {
                    debug!(path = %path.display(), "not descending");
                    walker.skip_current_dir();
                }
                continue;
            }

            self.stats.entries_seen += 1;
            if self.stats.entries_seen % 1000 == 0 {
                info!(
                    "Scanned {} items, {} eligible",
                    self.stats.entries_seen, self.stats.eligible
                );
            }

            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    self.record_error(path, err.to_string());
                    continue;
                }
            };

            match self.filter.check(&path, &meta) {
                Ok(()) => {
                    self.stats.eligible += 1;
                    let program = program_name(&path, &root, &self.programs);
                    return Some(build_record(path, &meta, program));
                }
                Err(reason) => {
                    debug!(path = %path.display(), reason = reason.as_str(), "filtered");
                    self.reject(reason);
                }
            }
        }
    }
}

fn unix_secs(t: std::io::Result<std::time::SystemTime>) -> Option<i64> {
    t.ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

fn build_record(path: PathBuf, meta: &Metadata, program: String) -> FileRecord {
    let category = category_hint(&path);
    FileRecord {
        path,
        size: meta.len(),
        program,
        accessed: unix_secs(meta.accessed()),
        modified: unix_secs(meta.modified()),
        category,
    }
}

/// Known program names win (case-insensitive substring); otherwise the first
/// directory below the scan root names the owner.
pub fn program_name(path: &Path, root: &Path, known: &[String]) -> String {
    let lower = path.to_string_lossy().to_lowercase();
    if let Some(program) = known.iter().find(|p| lower.contains(&p.to_lowercase())) {
        return program.clone();
    }
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut components = rel.components();
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
        _ => FALLBACK_PROGRAM.to_string(),
    }
}

/// Coarse hint from the extension or the enclosing directory names.
pub fn category_hint(path: &Path) -> Option<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "log" => return Some("log".to_string()),
        "gz" if path.to_string_lossy().to_lowercase().contains("log") => {
            return Some("log".to_string())
        }
        "tmp" | "temp" | "swp" | "part" | "crdownload" => return Some("temp".to_string()),
        "cache" => return Some("cache".to_string()),
        _ => {}
    }
    let dirs = path
        .parent()
        .map(|p| p.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if dirs.contains("cache") {
        Some("cache".to_string())
    } else if dirs.contains("log") {
        Some("log".to_string())
    } else if dirs.contains("tmp") || dirs.contains("temp") {
        Some("temp".to_string())
    } else {
        None
    }
}
