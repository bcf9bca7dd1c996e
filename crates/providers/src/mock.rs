use super::{OcrProvider, ProviderError};
use async_trait::async_trait;
use invproc_core::models::TokenPair;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

/// Offline stand-in for the OCR provider.
///
/// Each batch reports `processing` for `polls_before_complete` status calls
/// and `completed` afterwards. Only batches still in progress are tracked.
#[derive(Default)]
pub struct MockOcrProvider {
    polls_before_complete: u32,
    polls: Mutex<HashMap<String, u32>>,
}

impl MockOcrProvider {
    pub fn new(polls_before_complete: u32) -> Arc<Self> {
        Arc::new(Self {
            polls_before_complete,
            polls: Mutex::new(HashMap::new()),
        })
    }

    fn random_id(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn token_pair() -> TokenPair {
        TokenPair {
            access_token: Self::random_id(24),
            refresh_token: Self::random_id(24),
        }
    }
}

#[async_trait]
impl OcrProvider for MockOcrProvider {
    async fn issue_token(&self) -> Result<TokenPair, ProviderError> {
        Ok(Self::token_pair())
    }

    async fn refresh_token(&self, _issued: &TokenPair) -> Result<TokenPair, ProviderError> {
        Ok(Self::token_pair())
    }

    async fn process_document(
        &self,
        _token: &TokenPair,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ProviderError> {
        // simulate network latency
        sleep(Duration::from_millis(50)).await;
        let batch_id = format!("MOCK-{}", Self::random_id(12));
        self.polls
            .lock()
            .map_err(|_| ProviderError::InvalidResponse("mock state poisoned".into()))?
            .insert(batch_id.clone(), 0);
        tracing::debug!(%batch_id, %file_name, size = bytes.len(), "Mock provider accepted document");
        Ok(batch_id)
    }

    async fn batch_status(
        &self,
        _token: &TokenPair,
        batch_id: &str,
    ) -> Result<Value, ProviderError> {
        let complete = {
            let mut polls = self
                .polls
                .lock()
                .map_err(|_| ProviderError::InvalidResponse("mock state poisoned".into()))?;
            // finished or never issued here counts as complete
            let complete = match polls.get_mut(batch_id) {
                Some(count) if *count < self.polls_before_complete => {
                    *count += 1;
                    false
                }
                _ => true,
            };
            if complete {
                polls.remove(batch_id);
            }
            complete
        };

        if complete {
            Ok(json!({
                "extraction_status": "completed",
                "batch_id": batch_id,
                "data": {"mock": true}
            }))
        } else {
            Ok(json!({"extraction_status": "in_progress", "batch_id": batch_id}))
        }
    }
}
