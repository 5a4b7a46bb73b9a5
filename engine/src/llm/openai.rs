//! OpenAI-compatible chat completions provider
//!
//! Works against any `/chat/completions` endpoint (OpenAI, DeepSeek, ...).
//! The API key comes from the secret cache under `api_key_name`.

use super::{line_stream, LLMError, LLMProvider, LLMResponse, Message, TextStream};
use crate::config::OpenAIConfig;
use crate::secrets::{SecretCache, SecretManager};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

pub struct OpenAIProvider {
    config: OpenAIConfig,
    temperature: f32,
    secret_cache: Arc<SecretCache>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig, secret_cache: Arc<SecretCache>) -> Self {
        Self {
            config,
            temperature: 0.3,
            secret_cache,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn payload(&self, messages: &[Message], stream: bool, json_mode: bool) -> serde_json::Value {
        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.config.model,
            "messages": api_messages,
            "temperature": self.temperature,
            "stream": stream,
        });
        if json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }

    async fn send(&self, payload: &serde_json::Value) -> super::Result<reqwest::Response> {
        let api_key = self
            .secret_cache
            .get_secret(&self.config.api_key_name)
            .map_err(|e| LLMError::AuthenticationFailed(e.to_string()))?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key.unsecure()))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = SecretManager::scrub(&response.text().await.unwrap_or_default());

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(format!("{}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        Ok(response)
    }

    async fn complete(&self, messages: &[Message], json_mode: bool) -> super::Result<String> {
        let payload = self.payload(messages, false, json_mode);
        let response = self.send(&payload).await?;

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))
    }
}

/// Content delta of one SSE `data:` line, if it carries any text
fn parse_sse_line(line: &str) -> Option<super::Result<String>> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => value
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(|c| Ok(c.to_string())),
        Err(e) => Some(Err(LLMError::ParseError(format!(
            "Bad stream event: {}",
            e
        )))),
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_local(&self) -> bool {
        false
    }

    fn estimated_cost(&self, tokens: usize) -> f64 {
        (tokens as f64 / 1000.0) * 0.002
    }

    async fn check_health(&self) -> bool {
        self.secret_cache
            .get_secret(&self.config.api_key_name)
            .is_ok()
    }

    async fn generate(&self, messages: &[Message]) -> super::Result<LLMResponse> {
        let content = self.complete(messages, false).await?;
        Ok(LLMResponse::from_text(content))
    }

    async fn generate_json(&self, messages: &[Message]) -> super::Result<String> {
        self.complete(messages, true).await
    }

    async fn generate_stream(&self, messages: &[Message]) -> super::Result<TextStream> {
        let payload = self.payload(messages, true, false);
        let response = self.send(&payload).await?;

        let chunks = line_stream(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_sse_line(&line),
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(chunks))
    }
}
