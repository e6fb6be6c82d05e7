//! Groups verdicts into (program, importance) buckets and turns operator
//! decisions into the set of files to relocate.

use crate::backup::run_id_now;
use crate::error::ReviewError;
use crate::filter::ProtectedPaths;
use crate::models::{FileRecord, Importance, Level, Verdict};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BucketKey {
    pub program: String,
    pub importance: Importance,
}

impl BucketKey {
    pub fn new(program: impl Into<String>, importance: Importance) -> Self {
        Self {
            program: program.into(),
            importance,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.program, self.importance)
    }
}

/// Parses `PROGRAM:LABEL`; the label is taken after the last colon.
impl FromStr for BucketKey {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (program, label) = s
            .rsplit_once(':')
            .ok_or_else(|| ReviewError::InvalidKey(s.to_string()))?;
        let program = program.trim();
        if program.is_empty() {
            return Err(ReviewError::InvalidKey(s.to_string()));
        }
        let importance = label
            .parse::<Importance>()
            .map_err(|_| ReviewError::InvalidKey(s.to_string()))?;
        Ok(BucketKey::new(program, importance))
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub key: BucketKey,
    pub verdicts: Vec<Verdict>,
    pub total_bytes: u64,
    pub levels: BTreeMap<Level, usize>,
}

impl Bucket {
    fn new(key: BucketKey) -> Self {
        Self {
            key,
            verdicts: Vec::new(),
            total_bytes: 0,
            levels: BTreeMap::new(),
        }
    }

    fn push(&mut self, verdict: Verdict) {
        self.total_bytes += verdict.record.size;
        if let Some(level) = verdict.level {
            *self.levels.entry(level).or_default() += 1;
        }
        self.verdicts.push(verdict);
    }

    pub fn count(&self) -> usize {
        self.verdicts.len()
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// What happens to the files of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Keep,
    RemoveAll,
    /// Only files reported at one of these levels; the rest stay.
    RemoveLevels(BTreeSet<Level>),
}

impl Selection {
    pub fn removes(&self, verdict: &Verdict) -> bool {
        match self {
            Selection::Keep => false,
            Selection::RemoveAll => true,
            Selection::RemoveLevels(levels) => {
                matches!(verdict.level, Some(level) if levels.contains(&level))
            }
        }
    }
}

/// Parses a comma-separated level list such as `low,medium`.
pub fn parse_levels(text: &str) -> Option<BTreeSet<Level>> {
    let mut levels = BTreeSet::new();
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        levels.insert(Level::parse(part)?);
    }
    (!levels.is_empty()).then_some(levels)
}

/// A scripted removal: `PROGRAM:LABEL` removes the whole bucket,
/// `PROGRAM:LABEL:LEVEL[,LEVEL...]` only the files at those levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub key: BucketKey,
    pub levels: Option<BTreeSet<Level>>,
}

impl Removal {
    pub fn selection(&self) -> Selection {
        match &self.levels {
            Some(levels) => Selection::RemoveLevels(levels.clone()),
            None => Selection::RemoveAll,
        }
    }
}

impl FromStr for Removal {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(key) = s.parse::<BucketKey>() {
            return Ok(Removal { key, levels: None });
        }
        let (head, tail) = s
            .rsplit_once(':')
            .ok_or_else(|| ReviewError::InvalidKey(s.to_string()))?;
        let levels = parse_levels(tail).ok_or_else(|| ReviewError::InvalidKey(s.to_string()))?;
        Ok(Removal {
            key: head.parse()?,
            levels: Some(levels),
        })
    }
}

/// Operator choices per bucket. Anything not decided is kept.
#[derive(Debug, Clone, Default)]
pub struct ReviewDecision {
    selections: HashMap<BucketKey, Selection>,
}

impl ReviewDecision {
    pub fn set(&mut self, key: BucketKey, selection: Selection) {
        self.selections.insert(key, selection);
    }

    pub fn get(&self, key: &BucketKey) -> Option<&Selection> {
        self.selections.get(key)
    }

    pub fn keeps(&self, key: &BucketKey) -> bool {
        matches!(self.get(key), None | Some(Selection::Keep))
    }
}

/// Union of the records selected for removal across all buckets, ordered by
/// path.
pub fn resolve_deletion_set(
    buckets: &BTreeMap<BucketKey, Bucket>,
    decisions: &ReviewDecision,
) -> Vec<Arc<FileRecord>> {
    let mut selected: BTreeMap<_, Arc<FileRecord>> = BTreeMap::new();
    for bucket in buckets.values() {
        let Some(selection) = decisions.get(&bucket.key) else {
            continue;
        };
        for verdict in bucket.verdicts.iter().filter(|v| selection.removes(v)) {
            selected.insert(verdict.record.path.clone(), verdict.record.clone());
        }
    }
    selected.into_values().collect()
}

#[derive(Debug, Clone)]
pub struct ReviewSession {
    run_id: String,
    buckets: BTreeMap<BucketKey, Bucket>,
    decisions: ReviewDecision,
    protected_rejections: Vec<Verdict>,
}

impl ReviewSession {
    /// Verdicts for protected paths never reach a bucket.
    pub fn new(verdicts: Vec<Verdict>, protected: &ProtectedPaths) -> Self {
        let mut buckets: BTreeMap<BucketKey, Bucket> = BTreeMap::new();
        let mut protected_rejections = Vec::new();
        for verdict in verdicts {
            if protected.is_protected(&verdict.record.path) {
                warn!(path = %verdict.record.path.display(), "protected path excluded from review");
                protected_rejections.push(verdict);
                continue;
            }
            let key = BucketKey::new(verdict.record.program.clone(), verdict.importance);
            buckets
                .entry(key.clone())
                .or_insert_with(|| Bucket::new(key))
                .push(verdict);
        }
        info!("Review session holds {} buckets", buckets.len());
        Self {
            run_id: run_id_now(),
            buckets,
            decisions: ReviewDecision::default(),
            protected_rejections,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Names the backup subtree and ledger rows of every commit of this session.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Buckets by aggregate size descending, then program ascending.
    pub fn summary(&self) -> Vec<&Bucket> {
        let mut ordered: Vec<&Bucket> = self.buckets.values().collect();
        ordered.sort_by(|a, b| {
            b.total_bytes
                .cmp(&a.total_bytes)
                .then_with(|| a.key.program.cmp(&b.key.program))
                .then_with(|| a.key.importance.cmp(&b.key.importance))
        });
        ordered
    }

    pub fn bucket(&self, key: &BucketKey) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    pub fn decide(&mut self, key: &BucketKey, keep: bool) -> Result<(), ReviewError> {
        let selection = if keep {
            Selection::Keep
        } else {
            Selection::RemoveAll
        };
        self.select(key, selection)
    }

    /// Records the selection for a bucket. An empty level set keeps it.
    pub fn select(&mut self, key: &BucketKey, selection: Selection) -> Result<(), ReviewError> {
        if !self.buckets.contains_key(key) {
            return Err(ReviewError::UnknownBucket {
                program: key.program.clone(),
                importance: key.importance,
            });
        }
        let selection = match selection {
            Selection::RemoveLevels(levels) if levels.is_empty() => Selection::Keep,
            other => other,
        };
        info!(bucket = %key, selection = ?selection, "review decision");
        self.decisions.set(key.clone(), selection);
        Ok(())
    }

    pub fn apply(&mut self, removal: &Removal) -> Result<(), ReviewError> {
        self.select(&removal.key, removal.selection())
    }

    pub fn keeps(&self, key: &BucketKey) -> bool {
        self.decisions.keeps(key)
    }

    pub fn decisions(&self) -> &ReviewDecision {
        &self.decisions
    }

    pub fn resolved_deletion_set(&self) -> Vec<Arc<FileRecord>> {
        resolve_deletion_set(&self.buckets, &self.decisions)
    }

    pub fn protected_rejections(&self) -> &[Verdict] {
        &self.protected_rejections
    }

    pub fn unknown_verdicts(&self) -> impl Iterator<Item = &Verdict> {
        self.buckets
            .values()
            .filter(|b| b.key.importance == Importance::Unknown)
            .flat_map(|b| b.verdicts.iter())
    }

    pub fn total_files(&self) -> usize {
        self.buckets.values().map(Bucket::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
