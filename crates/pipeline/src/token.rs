use invproc_core::models::TokenPair;
use providers::{OcrProvider, ProviderError};
use std::sync::Arc;

/// Obtains a provider token for exactly one privileged call.
///
/// Nothing is cached: every call issues a token and immediately refreshes
/// it, and only the refreshed pair is handed out.
#[derive(Clone)]
pub struct TokenManager {
    provider: Arc<dyn OcrProvider>,
}

impl TokenManager {
    pub fn new(provider: Arc<dyn OcrProvider>) -> Self {
        Self { provider }
    }

    pub async fn acquire_working_token(&self) -> Result<TokenPair, ProviderError> {
        let issued = self.provider.issue_token().await?;
        let refreshed = self.provider.refresh_token(&issued).await?;
        tracing::trace!("Working token acquired");
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use providers::TokenStage;

    #[tokio::test]
    async fn returns_refreshed_token() {
        let provider = ScriptedProvider::new();
        let tokens = TokenManager::new(provider.clone());

        let token = tokens.acquire_working_token().await.unwrap();
        assert_eq!(token.access_token, "refreshed-1");
        assert_eq!(provider.calls(), vec!["issue", "refresh"]);
    }

    #[tokio::test]
    async fn every_call_reacquires() {
        let provider = ScriptedProvider::new();
        let tokens = TokenManager::new(provider.clone());

        tokens.acquire_working_token().await.unwrap();
        let second = tokens.acquire_working_token().await.unwrap();
        assert_eq!(second.access_token, "refreshed-2");
        assert_eq!(provider.calls(), vec!["issue", "refresh", "issue", "refresh"]);
    }

    #[tokio::test]
    async fn refresh_failure_surfaces() {
        let provider = ScriptedProvider::new();
        provider.fail_refresh();
        let tokens = TokenManager::new(provider.clone());

        let err = tokens.acquire_working_token().await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::TokenAcquisition {
                stage: TokenStage::Refresh,
                ..
            }
        ));
    }
}
