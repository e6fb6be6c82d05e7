use crate::{AssessRequest, Assessment, ImportanceProvider, ProviderError};

/// Offline stand-in: every file ends up `unknown`, so nothing is ever removed.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl ImportanceProvider for NoopProvider {
    async fn assess(&self, _request: &AssessRequest) -> Result<Assessment, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
