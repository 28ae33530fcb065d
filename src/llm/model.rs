//! HTTP chat client: Anthropic Messages and OpenAI-compatible Chat Completions.

use crate::config::{ApiType, ProviderConfig};
use crate::error::{LlmError, Result};
use crate::llm::traits::{ChatSession, GenerateResponse, LlmClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bumped whenever [`StoredHistory`] changes shape.
const HISTORY_FORMAT_VERSION: u32 = 1;

/// Sent in place of an empty user message; providers reject empty turns.
const EMPTY_MESSAGE_PLACEHOLDER: &str = "(empty message)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// On-disk shape of a session's history.
#[derive(Debug, Serialize, Deserialize)]
struct StoredHistory {
    version: u32,
    turns: Vec<Turn>,
}

pub fn encode_history(turns: &[Turn]) -> Result<Vec<u8>> {
    if turns.is_empty() {
        return Ok(Vec::new());
    }
    let stored = StoredHistory {
        version: HISTORY_FORMAT_VERSION,
        turns: turns.to_vec(),
    };
    serde_json::to_vec(&stored).map_err(|error| LlmError::HistoryEncoding(error).into())
}

/// Decode a stored history. Unknown versions and malformed payloads are errors.
pub fn decode_history(payload: &[u8]) -> Result<Vec<Turn>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let stored: StoredHistory = serde_json::from_slice(payload).map_err(LlmError::HistoryEncoding)?;
    if stored.version != HISTORY_FORMAT_VERSION {
        return Err(LlmError::Other(anyhow::anyhow!(
            "unsupported history format version {}",
            stored.version
        ))
        .into());
    }
    Ok(stored.turns)
}

/// Client bound to one provider and model.
#[derive(Clone)]
pub struct HttpChatClient {
    http_client: reqwest::Client,
    provider: String,
    provider_config: ProviderConfig,
    model: String,
    max_tokens: u32,
}

impl HttpChatClient {
    pub fn new(
        http_client: reqwest::Client,
        provider: impl Into<String>,
        provider_config: ProviderConfig,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            http_client,
            provider: provider.into(),
            provider_config,
            model: model.into(),
            max_tokens,
        }
    }
}

impl LlmClient for HttpChatClient {
    fn describe(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    fn new_session(
        &self,
        system_prompt: &str,
        history: Option<Vec<u8>>,
    ) -> Result<Box<dyn ChatSession>> {
        let turns = match history.as_deref().map(decode_history).transpose() {
            Ok(turns) => turns.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(%error, model = %self.describe(), "discarding undecodable history");
                Vec::new()
            }
        };

        Ok(Box::new(HttpChatSession {
            client: self.clone(),
            system_prompt: system_prompt.to_string(),
            turns,
        }))
    }
}

/// A running conversation against an [`HttpChatClient`].
pub struct HttpChatSession {
    client: HttpChatClient,
    system_prompt: String,
    turns: Vec<Turn>,
}

impl HttpChatSession {
    async fn call_anthropic(&self) -> Result<Vec<String>> {
        let base_url = self.client.provider_config.base_url.trim_end_matches('/');
        let messages_url = format!("{base_url}/v1/messages");
        let body = anthropic_request_body(
            &self.client.model,
            &self.system_prompt,
            &self.turns,
            self.client.max_tokens,
        );

        let response = self
            .client
            .http_client
            .post(&messages_url)
            .header("x-api-key", &self.client.provider_config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ProviderRequest(e.to_string()))?;

        let response_body = read_json_response(response, "Anthropic").await?;
        parse_anthropic_response(&response_body)
    }

    async fn call_openai(&self) -> Result<Vec<String>> {
        let base_url = self.client.provider_config.base_url.trim_end_matches('/');
        let chat_completions_url = format!("{base_url}/v1/chat/completions");
        let body = openai_request_body(
            &self.client.model,
            &self.system_prompt,
            &self.turns,
            self.client.max_tokens,
        );

        let response = self
            .client
            .http_client
            .post(&chat_completions_url)
            .header(
                "authorization",
                format!("Bearer {}", self.client.provider_config.api_key),
            )
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ProviderRequest(e.to_string()))?;

        let response_body = read_json_response(response, &self.client.provider).await?;
        parse_openai_response(&response_body, &self.client.provider)
    }
}

#[async_trait]
impl ChatSession for HttpChatSession {
    async fn generate_content(&mut self, text: &str) -> Result<GenerateResponse> {
        self.turns.push(Turn {
            role: Role::User,
            text: text.to_string(),
        });

        let result = match self.client.provider_config.api_type {
            ApiType::Anthropic => self.call_anthropic().await,
            ApiType::OpenaiCompletions => self.call_openai().await,
        };

        match result {
            Ok(texts) => {
                let response = GenerateResponse { texts };
                self.turns.push(Turn {
                    role: Role::Assistant,
                    text: response.joined(),
                });
                Ok(response)
            }
            Err(error) => {
                // A failed turn is not part of the conversation.
                self.turns.pop();
                Err(error)
            }
        }
    }

    fn current_history(&self) -> Result<Vec<u8>> {
        encode_history(&self.turns)
    }
}

fn wire_text(turn: &Turn) -> &str {
    if turn.text.trim().is_empty() {
        EMPTY_MESSAGE_PLACEHOLDER
    } else {
        &turn.text
    }
}

fn anthropic_request_body(
    model: &str,
    system_prompt: &str,
    turns: &[Turn],
    max_tokens: u32,
) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = turns
        .iter()
        .map(|turn| {
            serde_json::json!({
                "role": turn.role.as_str(),
                "content": [{"type": "text", "text": wire_text(turn)}],
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
    });
    if !system_prompt.is_empty() {
        body["system"] = serde_json::json!(system_prompt);
    }
    body
}

fn openai_request_body(
    model: &str,
    system_prompt: &str,
    turns: &[Turn],
    max_tokens: u32,
) -> serde_json::Value {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(serde_json::json!({
            "role": "system",
            "content": system_prompt,
        }));
    }
    messages.extend(turns.iter().map(|turn| {
        serde_json::json!({
            "role": turn.role.as_str(),
            "content": wire_text(turn),
        })
    }));

    serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
    })
}

async fn read_json_response(response: reqwest::Response, label: &str) -> Result<serde_json::Value> {
    let status = response.status();
    let response_text = response
        .text()
        .await
        .map_err(|e| LlmError::ProviderRequest(format!("failed to read response body: {e}")))?;

    let response_body: serde_json::Value = serde_json::from_str(&response_text).map_err(|e| {
        LlmError::ProviderRequest(format!(
            "{label} response ({status}) is not valid JSON: {e}\nBody: {}",
            truncate_body(&response_text)
        ))
    })?;

    if !status.is_success() {
        let message = response_body["error"]["message"]
            .as_str()
            .unwrap_or("unknown error");
        return Err(LlmError::ProviderRequest(format!("{label} API error ({status}): {message}")).into());
    }

    Ok(response_body)
}

/// Truncate a response body for error messages, on a char boundary.
fn truncate_body(body: &str) -> &str {
    let limit = 500;
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

fn parse_anthropic_response(body: &serde_json::Value) -> Result<Vec<String>> {
    let content_blocks = body["content"]
        .as_array()
        .ok_or_else(|| LlmError::CompletionFailed("missing content array".into()))?;

    Ok(content_blocks
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .map(str::to_string)
        .collect())
}

fn parse_openai_response(body: &serde_json::Value, provider_label: &str) -> Result<Vec<String>> {
    let choice = &body["choices"][0]["message"];
    if choice.is_null() {
        return Err(
            LlmError::CompletionFailed(format!("missing choices in {provider_label} response")).into(),
        );
    }

    if let Some(text) = choice["content"].as_str().filter(|text| !text.is_empty()) {
        return Ok(vec![text.to_string()]);
    }

    // Some reasoning models return their answer in a separate field.
    if let Some(reasoning) = choice["reasoning_content"]
        .as_str()
        .filter(|text| !text.is_empty())
    {
        tracing::debug!(provider = %provider_label, "using reasoning_content as response");
        return Ok(vec![reasoning.to_string()]);
    }

    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpChatClient {
        HttpChatClient::new(
            reqwest::Client::new(),
            "anthropic",
            ProviderConfig {
                api_type: ApiType::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                api_key: "test".into(),
            },
            "claude-haiku",
            1024,
        )
    }

    fn turns() -> Vec<Turn> {
        vec![
            Turn {
                role: Role::User,
                text: "hi".into(),
            },
            Turn {
                role: Role::Assistant,
                text: "hello!".into(),
            },
        ]
    }

    #[test]
    fn empty_history_encodes_to_nothing() {
        assert!(encode_history(&[]).expect("encoding should succeed").is_empty());
        assert!(decode_history(&[]).expect("decoding should succeed").is_empty());
    }

    #[test]
    fn foreign_history_versions_are_rejected() {
        let payload = br#"{"version": 99, "turns": []}"#;
        assert!(decode_history(payload).is_err());
        assert!(decode_history(b"not json").is_err());
    }

    #[test]
    fn sessions_resume_from_stored_history() {
        let payload = encode_history(&turns()).expect("encoding should succeed");
        let session = client()
            .new_session("be nice", Some(payload.clone()))
            .expect("session should open");
        assert_eq!(
            session.current_history().expect("history should encode"),
            payload
        );
    }

    #[test]
    fn undecodable_history_starts_fresh() {
        let session = client()
            .new_session("be nice", Some(b"\x00garbage".to_vec()))
            .expect("session should open");
        assert!(session.current_history().expect("history should encode").is_empty());
    }

    #[test]
    fn anthropic_body_carries_system_and_turns() {
        let mut history = turns();
        history.push(Turn {
            role: Role::User,
            text: "  ".into(),
        });
        let body = anthropic_request_body("claude-haiku", "be nice", &history, 512);

        assert_eq!(body["system"], "be nice");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(
            body["messages"][2]["content"][0]["text"],
            EMPTY_MESSAGE_PLACEHOLDER
        );
    }

    #[test]
    fn openai_body_starts_with_system_message() {
        let body = openai_request_body("gpt-4.1", "be nice", &turns(), 512);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn anthropic_text_blocks_become_texts() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "id": "t1", "name": "x", "input": {}},
                {"type": "text", "text": "second"},
            ]
        });
        assert_eq!(
            parse_anthropic_response(&body).expect("response should parse"),
            vec!["first".to_string(), "second".to_string()]
        );
        assert!(parse_anthropic_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn openai_reasoning_content_is_used_when_content_is_empty() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "", "reasoning_content": "thought it through"}}]
        });
        assert_eq!(
            parse_openai_response(&body, "openrouter").expect("response should parse"),
            vec!["thought it through".to_string()]
        );

        let empty = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert!(
            parse_openai_response(&empty, "openrouter")
                .expect("response should parse")
                .is_empty()
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= 500);
        assert!(body.starts_with(truncated));
    }
}
