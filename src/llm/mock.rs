use super::client::LLMClient;
use super::error::BackendError;
use super::types::{LLMRequest, LLMResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Scripted client that replays queued responses in order.
///
/// Used to drive the LLM analyzer and fixer without a provider. Every request
/// is kept so tests can inspect the prompts that were sent.
pub struct MockLLMClient {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<LLMRequest>>,
    name: String,
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content: String,
    pub error: Option<BackendError>,
}

impl MockResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
        }
    }

    /// A reply the way chat models usually send JSON: inside a fenced block
    pub fn json(value: &serde_json::Value) -> Self {
        Self::text(format!("```json\n{}\n```", value))
    }

    pub fn error(error: BackendError) -> Self {
        Self {
            content: String::new(),
            error: Some(error),
        }
    }
}

impl MockLLMClient {
    pub fn new() -> Self {
        Self::with_name("MockLLM")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            name: name.into(),
        }
    }

    pub fn add_response(&self, response: MockResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn add_responses(&self, responses: impl IntoIterator<Item = MockResponse>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.extend(responses);
        }
    }

    pub fn remaining_responses(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Default for MockLLMClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let response = self
            .responses
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| BackendError::Other {
                message: "MockLLMClient: No more responses in queue".to_string(),
            })?;

        if let Some(error) = response.error {
            return Err(error);
        }

        Ok(LLMResponse::text(response.content, Duration::from_millis(10)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model_info(&self) -> Option<String> {
        Some("mock-model".to_string())
    }
}

impl std::fmt::Debug for MockLLMClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLLMClient")
            .field("name", &self.name)
            .field("remaining_responses", &self.remaining_responses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{query_json, ChatMessage};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Reply {
        build_command: String,
    }

    #[tokio::test]
    async fn test_json_reply_is_fenced_and_parseable() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::json(&json!({"build_command": "npm run build"})));

        let reply: Reply = query_json(&client, "system", "prompt".to_string(), 64, "analysis")
            .await
            .unwrap();
        assert_eq!(reply.build_command, "npm run build");
    }

    #[tokio::test]
    async fn test_queued_error_is_returned() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::error(BackendError::TimeoutError { seconds: 30 }));

        let result = client.chat(LLMRequest::new(vec![])).await;
        assert!(matches!(result, Err(BackendError::TimeoutError { seconds: 30 })));
    }

    #[tokio::test]
    async fn test_empty_queue_is_an_error() {
        let client = MockLLMClient::new();
        assert!(client.chat(LLMRequest::new(vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_responses_replay_in_order() {
        let client = MockLLMClient::new();
        client.add_responses(vec![
            MockResponse::text("first"),
            MockResponse::text("second"),
        ]);
        assert_eq!(client.remaining_responses(), 2);

        assert_eq!(client.chat(LLMRequest::new(vec![])).await.unwrap().content, "first");
        assert_eq!(client.remaining_responses(), 1);
        assert_eq!(client.chat(LLMRequest::new(vec![])).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_prompts_are_recorded() {
        let client = MockLLMClient::with_name("fixer-mock");
        client.add_response(MockResponse::text("{}"));
        client
            .chat(LLMRequest::new(vec![
                ChatMessage::system("You repair builds"),
                ChatMessage::user("Cannot find module 'vite'"),
            ]))
            .await
            .unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[1].content, "Cannot find module 'vite'");
        assert_eq!(client.label(), "fixer-mock/mock-model");
    }
}
