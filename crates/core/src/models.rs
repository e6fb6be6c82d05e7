use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// A candidate file discovered by the scanner. The absolute path is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub program: String,
    pub accessed: Option<i64>,
    pub modified: Option<i64>,
    pub category: Option<String>,
}

impl FileRecord {
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }

    pub fn modified_rfc3339(&self) -> Option<String> {
        self.modified
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|t| t.to_rfc3339())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Importance {
    Important,
    NonImportant,
    Unknown,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Important => "important",
            Importance::NonImportant => "non-important",
            Importance::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "important" => Ok(Importance::Important),
            "non-important" | "nonimportant" | "unimportant" => Ok(Importance::NonImportant),
            "unknown" => Ok(Importance::Unknown),
            other => Err(format!("unknown importance label: {other}")),
        }
    }
}

/// Severity reported alongside the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn parse(s: &str) -> Option<Level> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Level::Low),
            "medium" => Some(Level::Medium),
            "high" => Some(Level::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub record: Arc<FileRecord>,
    pub importance: Importance,
    pub level: Option<Level>,
    pub rationale: String,
    pub latency: Duration,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub run_id: String,
    pub original: PathBuf,
    pub backup: PathBuf,
    pub moved_at: DateTime<Utc>,
    pub size: u64,
}

impl BackupEntry {
    pub fn to_ledger(&self) -> storage::LedgerRecord {
        storage::LedgerRecord {
            run_id: self.run_id.clone(),
            original_path: self.original.to_string_lossy().into_owned(),
            backup_path: self.backup.to_string_lossy().into_owned(),
            moved_at: self.moved_at.timestamp(),
            size: self.size as i64,
        }
    }

    pub fn from_ledger(record: &storage::LedgerRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            original: PathBuf::from(&record.original_path),
            backup: PathBuf::from(&record.backup_path),
            moved_at: DateTime::<Utc>::from_timestamp(record.moved_at, 0).unwrap_or_default(),
            size: record.size.max(0) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_labels_round_trip_through_text() {
        for label in [
            Importance::Important,
            Importance::NonImportant,
            Importance::Unknown,
        ] {
            assert_eq!(label.as_str().parse::<Importance>().unwrap(), label);
        }
        assert_eq!(
            "Non_Important".parse::<Importance>().unwrap(),
            Importance::NonImportant
        );
        assert!("maybe".parse::<Importance>().is_err());
    }

    #[test]
    fn importance_serializes_kebab_case() {
        let json = serde_json::to_string(&Importance::NonImportant).unwrap();
        assert_eq!(json, "\"non-important\"");
    }
}
