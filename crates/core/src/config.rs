use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub scan: ScanConfig,
    pub safety: SafetyConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Shared call budget across all workers; 0 disables the limiter.
    /// Anything else must be at least `MIN_REQUESTS_PER_SECOND`.
    pub requests_per_second: f64,
    pub workers: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            requests_per_second: 5.0,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub roots: Vec<String>,
    pub min_file_size_kb: u64,
    pub max_files: usize,
    pub protected_paths: Vec<String>,
    /// Glob patterns, e.g. `**/*.plist`.
    pub exclude: Vec<String>,
    /// Known program names, used only for bucket labels.
    pub programs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: vec![
                "~/Library/Caches".to_string(),
                "/Library/Caches".to_string(),
                "~/Library/Logs".to_string(),
                "/private/var/tmp".to_string(),
                "/private/var/log".to_string(),
            ],
            min_file_size_kb: 10,
            max_files: 10_000,
            protected_paths: vec![
                "/Library/Caches/com.apple.*".to_string(),
                "/private/var/db".to_string(),
                "/private/var/protected".to_string(),
                "/private/var/folders".to_string(),
            ],
            exclude: vec![],
            programs: vec!["Android Studio".to_string(), "Transporter".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub dry_run: bool,
    pub backup_dir: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            backup_dir: "~/SystemDataCleanupBackup".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Defaults to `<backup_dir>/ledger.db`.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Aggregate run log, written in addition to stderr.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// One call every 100 seconds.
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.01;

impl AppConfig {
    /// Rejects settings the classifier cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let rate = self.classifier.requests_per_second;
        if !rate.is_finite() || rate < 0.0 || (rate > 0.0 && rate < MIN_REQUESTS_PER_SECOND) {
            bail!(
                "classifier.requests_per_second must be 0 (unlimited) or at least {MIN_REQUESTS_PER_SECOND}, got {rate}"
            );
        }
        if self.classifier.max_attempts == 0 {
            bail!("classifier.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.scan.roots.iter().map(|r| expand_path(r)).collect()
    }

    pub fn protected_paths(&self) -> Vec<String> {
        self.scan
            .protected_paths
            .iter()
            .map(|p| expand_path(p).to_string_lossy().into_owned())
            .collect()
    }

    pub fn backup_dir(&self) -> PathBuf {
        expand_path(&self.safety.backup_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        match &self.ledger.path {
            Some(p) => expand_path(p),
            None => self.backup_dir().join("ledger.db"),
        }
    }

    pub fn api_key(&self) -> Option<String> {
        self.classifier
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }

    pub fn base_url(&self) -> String {
        self.classifier
            .base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com".to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("SWEEPER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("scan.roots")
            .with_list_parse_key("scan.protected_paths")
            .with_list_parse_key("scan.exclude")
            .with_list_parse_key("scan.programs"),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
