//! GenAI-based LLM client implementation
//!
//! Uses the `genai` crate for a single interface over Ollama, OpenAI,
//! Anthropic, Gemini, xAI and Groq.

use super::client::LLMClient;
use super::error::BackendError;
use super::types::{ChatMessage, LLMRequest, LLMResponse, MessageRole};
use async_trait::async_trait;
use genai::adapter::AdapterKind;
use genai::chat::{ChatMessage as GenAIChatMessage, ChatOptions, ChatRequest as GenAIChatRequest};
use genai::resolver::{AuthData, Endpoint, ServiceTargetResolver};
use genai::{Client, ModelIden, ServiceTarget};
use std::time::Duration;
use tracing::{debug, error};

/// Parses a provider name such as `ollama` or `anthropic`.
pub fn parse_provider(s: &str) -> Result<AdapterKind, BackendError> {
    AdapterKind::from_lower_str(&s.to_lowercase()).ok_or_else(|| {
        BackendError::ConfigurationError {
            message: format!(
                "Invalid provider: {}. Valid options: ollama, openai, anthropic, gemini, xai, groq",
                s
            ),
        }
    })
}

/// LLM client backed by a `genai` provider
pub struct GenAIClient {
    client: Client,
    model: String,
    provider: AdapterKind,
    /// Per-request budget; never exceeds the build attempt budget
    timeout: Duration,
}

impl GenAIClient {
    /// Creates a new client. `base_url` overrides the provider's default
    /// endpoint, e.g. a remote Ollama host.
    pub fn new(
        provider: AdapterKind,
        model: impl Into<String>,
        timeout: Duration,
        base_url: Option<String>,
    ) -> Self {
        let model = model.into();

        let client = if let Some(endpoint_url) = base_url {
            debug!(
                "Using custom endpoint for {}: {}",
                provider.as_str(),
                endpoint_url
            );

            let model_clone = model.clone();
            let resolver = ServiceTargetResolver::from_resolver_fn(
                move |_service_target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error>
                {
                    let auth = match provider.default_key_env_name() {
                        Some(api_key_var) => AuthData::from_env(api_key_var),
                        None => AuthData::from_single(""),
                    };

                    Ok(ServiceTarget {
                        endpoint: Endpoint::from_owned(endpoint_url.clone()),
                        auth,
                        model: ModelIden::new(provider, &model_clone),
                    })
                },
            );

            Client::builder()
                .with_service_target_resolver(resolver)
                .build()
        } else {
            Client::default()
        };

        debug!(
            "Creating GenAI client: provider={}, model={}",
            provider.as_str(),
            model,
        );

        Self {
            client,
            model,
            provider,
            timeout,
        }
    }

    fn convert_message(msg: &ChatMessage) -> GenAIChatMessage {
        match msg.role {
            MessageRole::System => GenAIChatMessage::system(&msg.content),
            MessageRole::User => GenAIChatMessage::user(&msg.content),
            MessageRole::Assistant => GenAIChatMessage::assistant(&msg.content),
        }
    }
}

#[async_trait]
impl LLMClient for GenAIClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
        let start = std::time::Instant::now();

        let messages: Vec<GenAIChatMessage> =
            request.messages.iter().map(Self::convert_message).collect();
        let genai_request = GenAIChatRequest::new(messages);

        let mut options = ChatOptions::default();
        if let Some(temp) = request.temperature {
            options = options.with_temperature(temp as f64);
        }
        if let Some(max_tokens) = request.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }

        let response = match tokio::time::timeout(
            self.timeout,
            self.client
                .exec_chat(&self.model, genai_request, Some(&options)),
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!("{} API error: {}", self.provider.as_str(), e);
                return Err(BackendError::ApiError {
                    message: format!("{} request failed: {}", self.provider.as_str(), e),
                    status_code: None,
                });
            }
            Err(_) => {
                error!(
                    "{} request timed out after {}s",
                    self.provider.as_str(),
                    self.timeout.as_secs()
                );
                return Err(BackendError::TimeoutError {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let content = response.first_text().unwrap_or_default().to_string();
        if content.trim().is_empty() {
            return Err(BackendError::InvalidResponse {
                message: "empty completion".to_string(),
                raw_response: None,
            });
        }

        Ok(LLMResponse::text(content, start.elapsed()))
    }

    fn name(&self) -> &str {
        self.provider.as_str()
    }

    fn model_info(&self) -> Option<String> {
        Some(self.model.clone())
    }
}

impl std::fmt::Debug for GenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAIClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genai_client_creation() {
        let client = GenAIClient::new(
            AdapterKind::Ollama,
            "qwen2.5-coder:7b",
            Duration::from_secs(30),
            None,
        );

        assert_eq!(client.name(), "Ollama");
        assert_eq!(client.model_info(), Some("qwen2.5-coder:7b".to_string()));
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(parse_provider("ollama").unwrap(), AdapterKind::Ollama);
        assert_eq!(parse_provider("OpenAI").unwrap(), AdapterKind::OpenAI);
        assert!(parse_provider("nonsense").is_err());
    }
}
