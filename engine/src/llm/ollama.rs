//! Ollama LLM Provider
//!
//! Local provider talking to Ollama's `/api/chat`, typically at
//! http://localhost:11434.
//!
//! - No API key, zero cost
//! - `format: "json"` for constrained planner output
//! - NDJSON streaming for the aggregated reply

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    line_stream, LLMError, LLMProvider, LLMResponse, Message, MessageRole, Result, TextStream,
};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    temperature: f32,
    client: Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.3,
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: match msg.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                    MessageRole::System => "system".to_string(),
                    MessageRole::Tool => "tool".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    fn request(&self, messages: &[Message], stream: bool, json: bool) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            messages: self.convert_messages(messages),
            stream,
            format: json.then(|| "json".to_string()),
            options: OllamaOptions {
                temperature: self.temperature,
            },
        }
    }

    async fn send(&self, request: &OllamaRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else if e.is_connect() {
                    LLMError::ProviderUnavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderUnavailable(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }

    async fn complete(&self, messages: &[Message], json: bool) -> Result<String> {
        let request = self.request(messages, false, json);

        tracing::debug!(
            "Ollama request: model={}, messages={}, json={}",
            self.model,
            request.messages.len(),
            json
        );

        let start = std::time::Instant::now();
        let response = self.send(&request).await?;

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(format!("Failed to parse Ollama response: {}", e)))?;

        tracing::debug!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        Ok(body.message.content)
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn generate(&self, messages: &[Message]) -> Result<LLMResponse> {
        let content = self.complete(messages, false).await?;
        Ok(LLMResponse::from_text(content))
    }

    async fn generate_json(&self, messages: &[Message]) -> Result<String> {
        self.complete(messages, true).await
    }

    async fn generate_stream(&self, messages: &[Message]) -> Result<TextStream> {
        let request = self.request(messages, true, false);
        let response = self.send(&request).await?;

        let chunks = line_stream(response.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => match serde_json::from_str::<OllamaStreamChunk>(&line) {
                    Ok(chunk) if chunk.message.content.is_empty() => None,
                    Ok(chunk) => Some(Ok(chunk.message.content)),
                    Err(e) => Some(Err(LLMError::ParseError(format!(
                        "Bad Ollama stream line: {}",
                        e
                    )))),
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(chunks))
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

/// One NDJSON line of a streaming chat response
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default = "empty_message")]
    message: OllamaMessage,
}

fn empty_message() -> OllamaMessage {
    OllamaMessage {
        role: "assistant".to_string(),
        content: String::new(),
    }
}
