//! Seams between the orchestrator and LLM providers.

use crate::error::Result;

use async_trait::async_trait;
use std::sync::Arc;

/// Output of one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateResponse {
    pub texts: Vec<String>,
}

impl GenerateResponse {
    /// Non-empty texts joined by blank lines.
    pub fn joined(&self) -> String {
        self.texts
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A multi-turn conversation with one model.
#[async_trait]
pub trait ChatSession: Send {
    async fn generate_content(&mut self, text: &str) -> Result<GenerateResponse>;

    /// Serialized conversation so far. Empty when nothing worth keeping.
    fn current_history(&self) -> Result<Vec<u8>>;
}

/// A model that can open chat sessions.
pub trait LlmClient: Send + Sync {
    /// `provider/model`, for logs and user-facing warnings.
    fn describe(&self) -> String;

    /// Open a session. Undecodable `history` yields a fresh session.
    fn new_session(
        &self,
        system_prompt: &str,
        history: Option<Vec<u8>>,
    ) -> Result<Box<dyn ChatSession>>;
}

/// Builds clients for provider/model pairs.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn create_client(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmClient>>;

    /// The default client, used when a requested one can't be built.
    async fn fallback_client(&self) -> Result<Arc<dyn LlmClient>>;
}
