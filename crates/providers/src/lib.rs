//! Provider abstractions for the remote importance classification service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod noop;
pub mod openai;

/// Error taxonomy of a classification call. Only the retry class matters to
/// callers; the payload is a human-readable reason.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("invalid response: {0}")]
    Invalid(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        ProviderError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Rate limits and transient network/server failures may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Transient(_)
        )
    }

    /// No further classification is possible once one of these is seen.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Fatal(_) | ProviderError::UnknownProvider(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Metadata sent for a single file. File content is never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessRequest {
    pub path: String,
    pub components: Vec<String>,
    pub size_bytes: u64,
    pub program: String,
    pub modified: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub important: bool,
    /// Free-form level reported by the service (`Low`, `Medium`, `High`).
    pub level: Option<String>,
    pub rationale: Option<String>,
}

#[async_trait::async_trait]
pub trait ImportanceProvider: Send + Sync {
    async fn assess(&self, request: &AssessRequest) -> Result<Assessment, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ImportanceProvider>>,
    pub preferred: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: &str, provider: Arc<dyn ImportanceProvider>) -> Self {
        self.providers.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn provider(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn ImportanceProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no provider configured".into()))?;
        self.providers
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop::NoopProvider;

    #[test]
    fn retry_classes() {
        assert!(ProviderError::rate_limited("slow down").is_retryable());
        assert!(ProviderError::Transient("503".into()).is_retryable());
        assert!(!ProviderError::Fatal("bad key".into()).is_retryable());
        assert!(ProviderError::Fatal("bad key".into()).is_fatal());
        assert!(!ProviderError::Invalid("not json".into()).is_fatal());
        assert!(!ProviderError::Invalid("not json".into()).is_retryable());
    }

    #[test]
    fn registry_resolves_preferred_and_named() {
        let reg = ProviderRegistry::new()
            .with_provider("noop", Arc::new(NoopProvider))
            .set_preferred("noop");
        assert!(reg.provider(None).is_ok());
        assert!(reg.provider(Some("noop")).is_ok());
        match reg.provider(Some("openai")) {
            Err(ProviderError::UnknownProvider(name)) => assert_eq!(name, "openai"),
            _ => panic!("expected unknown provider"),
        }
        assert_eq!(reg.names(), vec!["noop".to_string()]);
    }

    #[test]
    fn registry_without_preference_is_fatal() {
        let reg = ProviderRegistry::new();
        let err = reg.provider(None).err().unwrap();
        assert!(err.is_fatal());
    }
}
