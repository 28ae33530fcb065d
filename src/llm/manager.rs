//! LLM manager: builds provider clients from configuration.

use crate::config::{LlmConfig, ProviderConfig};
use crate::error::{LlmError, Result};
use crate::llm::model::HttpChatClient;
use crate::llm::traits::{LlmClient, ProviderGateway};

use anyhow::Context as _;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves provider/model pairs to HTTP-backed clients.
pub struct LlmManager {
    config: LlmConfig,
    /// Shared HTTP client; carries the request timeout for every provider call.
    http_client: reqwest::Client,
}

impl LlmManager {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .with_context(|| "failed to build HTTP client")?;

        for (name, provider) in &config.providers {
            tracing::info!(provider = %name, api_type = ?provider.api_type, "LLM provider configured");
        }

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Configuration for a named provider, if it is usable.
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        let provider = self
            .config
            .providers
            .get(name)
            .ok_or_else(|| LlmError::UnknownProvider(name.into()))?;

        if provider.api_key.trim().is_empty() {
            return Err(LlmError::MissingProviderKey(name.into()).into());
        }

        Ok(provider)
    }

    pub fn client_for(&self, provider: &str, model: &str) -> Result<HttpChatClient> {
        if model.trim().is_empty() {
            return Err(LlmError::ProviderRequest(format!("no model given for {provider}")).into());
        }

        let provider_config = self.provider(provider)?;
        Ok(HttpChatClient::new(
            self.http_client.clone(),
            provider,
            provider_config.clone(),
            model,
            self.config.max_tokens,
        ))
    }
}

#[async_trait]
impl ProviderGateway for LlmManager {
    async fn create_client(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(self.client_for(provider, model)?))
    }

    async fn fallback_client(&self) -> Result<Arc<dyn LlmClient>> {
        let (provider, model) = self
            .config
            .default_route()
            .ok_or(LlmError::NoClientAvailable)?;
        Ok(Arc::new(self.client_for(provider, model)?))
    }
}
