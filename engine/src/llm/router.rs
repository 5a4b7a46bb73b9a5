//! LLM Router
//!
//! Orders the configured providers and fails over between them. Ranking:
//! the configured default provider first, then local providers, then the
//! cheaper cloud providers. Every attempt is bounded by a per-provider
//! timeout (local providers get longer to load their model).

use super::{LLMError, LLMProvider, LLMResponse, Message, TextStream};
use crate::config::LLMConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct LLMRouter {
    providers: Vec<Box<dyn LLMProvider>>,
    config: Arc<LLMConfig>,
}

impl LLMRouter {
    pub fn new(providers: Vec<Box<dyn LLMProvider>>, config: Arc<LLMConfig>) -> Self {
        Self { providers, config }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Rough token estimate (~4 characters per token), used for cost ranking
    fn estimate_tokens(messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.len()).sum::<usize>() / 4
    }

    /// Providers in the order they will be tried
    pub fn rank_providers(&self, estimated_tokens: usize) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        let default_provider = &self.config.default_provider;

        // stable sort keeps registration order among equals
        providers.sort_by(|a, b| {
            let key = |p: &&dyn LLMProvider| {
                (
                    p.name() != default_provider,
                    !p.is_local(),
                    p.estimated_cost(estimated_tokens),
                )
            };
            let (ka, kb) = (key(a), key(b));
            ka.0.cmp(&kb.0)
                .then(ka.1.cmp(&kb.1))
                .then(ka.2.partial_cmp(&kb.2).unwrap_or(std::cmp::Ordering::Equal))
        });

        providers
    }

    fn timeout_for(&self, provider: &dyn LLMProvider) -> Duration {
        if provider.is_local() {
            Duration::from_secs(self.config.local_timeout_secs)
        } else {
            Duration::from_secs(self.config.cloud_timeout_secs)
        }
    }

    /// Try `attempt` against each ranked provider until one succeeds.
    async fn failover<'a, T, F, Fut>(
        &'a self,
        messages: &[Message],
        purpose: &str,
        attempt: F,
    ) -> super::Result<(T, String)>
    where
        F: Fn(&'a dyn LLMProvider) -> Fut,
        Fut: Future<Output = super::Result<T>> + 'a,
    {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let ranked = self.rank_providers(Self::estimate_tokens(messages));

        for provider in ranked {
            let timeout = self.timeout_for(provider);
            tracing::debug!(
                "Attempting provider {} for {} (timeout: {}s)",
                provider.name(),
                purpose,
                timeout.as_secs()
            );

            match tokio::time::timeout(timeout, attempt(provider)).await {
                Ok(Ok(value)) => {
                    tracing::debug!("Provider {} succeeded for {}", provider.name(), purpose);
                    return Ok((value, provider.name().to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed for {}: {}", provider.name(), purpose, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Provider {} timed out after {}s for {}",
                        provider.name(),
                        timeout.as_secs(),
                        purpose
                    );
                }
            }
        }

        tracing::error!("All LLM providers exhausted for {}", purpose);
        Err(LLMError::ProviderUnavailable(
            "All LLM providers failed".to_string(),
        ))
    }

    /// Generate a tool call or final answer, returning the provider used
    pub async fn call(&self, messages: &[Message]) -> super::Result<(LLMResponse, String)> {
        self.failover(messages, "generate", |p| p.generate(messages))
            .await
    }

    /// Generate constrained JSON output, returning the provider used
    pub async fn call_json(&self, messages: &[Message]) -> super::Result<(String, String)> {
        self.failover(messages, "structured output", |p| p.generate_json(messages))
            .await
    }

    /// Open a text stream. Failover covers opening the stream only; errors
    /// after the first chunk surface on the stream itself.
    pub async fn stream(&self, messages: &[Message]) -> super::Result<(TextStream, String)> {
        self.failover(messages, "stream", |p| p.generate_stream(messages))
            .await
    }

    /// Check the health of all registered providers
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            let is_healthy = provider.check_health().await;
            results.push((provider.name(), is_healthy));
        }
        results
    }
}
