use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, warn};

use super::client::LLMClient;
use super::error::BackendError;
use super::types::{ChatMessage, LLMRequest};

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

/// Pulls the JSON object out of an LLM reply: the whole reply, a fenced code
/// block, or the span from the first `{` to the last `}`.
pub fn extract_json_from_response(response: &str) -> Result<String, BackendError> {
    let trimmed = response.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Ok(trimmed.to_string());
    }

    if trimmed.contains("```") {
        if let Some(captures) = fenced_block().and_then(|re| re.captures(trimmed)) {
            if let Some(json_match) = captures.get(1) {
                let json = json_match.as_str().trim();
                if json.starts_with('{') && json.ends_with('}') {
                    return Ok(json.to_string());
                }
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(trimmed[start..=end].to_string());
        }
    }

    Err(BackendError::InvalidResponse {
        message: "No JSON object found in response".to_string(),
        raw_response: Some(trimmed.chars().take(200).collect()),
    })
}

/// Sends a system + user prompt and parses the JSON reply into `T`.
pub async fn query_json<T: DeserializeOwned>(
    client: &dyn LLMClient,
    system: &str,
    prompt: String,
    max_tokens: u32,
    purpose: &str,
) -> Result<T, BackendError> {
    let start = Instant::now();

    let request = LLMRequest::new(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
        .with_temperature(0.1)
        .with_max_tokens(max_tokens);

    let response = client.chat(request).await?;
    debug!(
        purpose,
        backend = client.name(),
        latency_ms = start.elapsed().as_millis() as u64,
        chars = response.content.len(),
        "LLM reply received"
    );

    let json = extract_json_from_response(&response.content)?;
    serde_json::from_str(&json).map_err(|e| {
        warn!(purpose, "JSON parse error: {}", e);
        BackendError::ParseError {
            message: e.to_string(),
            context: json.chars().take(100).collect(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLLMClient, MockResponse};
    use serde::Deserialize;

    #[test]
    fn test_extract_plain() {
        let json = extract_json_from_response(r#"{"key": "value"}"#).unwrap();
        assert_eq!(json, r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_with_whitespace() {
        let json = extract_json_from_response("\n\n   {\"key\": \"value\"}\n  ").unwrap();
        assert_eq!(json, r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_markdown_json() {
        let response = "```json\n{\n  \"key\": \"value\"\n}\n```";
        let json = extract_json_from_response(response).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
        assert!(json.contains("\"key\""));
    }

    #[test]
    fn test_extract_embedded() {
        let response = r#"Here is the plan: {"key": "value"} as requested."#;
        let json = extract_json_from_response(response).unwrap();
        assert_eq!(json, r#"{"key": "value"}"#);
    }

    #[test]
    fn test_extract_no_json() {
        assert!(extract_json_from_response("This is just plain text").is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Probe {
        name: String,
    }

    #[tokio::test]
    async fn test_query_json_parses_fenced_reply() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::text("Sure:\n```json\n{\"name\": \"vite\"}\n```"));

        let probe: Probe = query_json(&client, "system", "prompt".to_string(), 100, "test")
            .await
            .unwrap();
        assert_eq!(probe.name, "vite");
    }

    #[tokio::test]
    async fn test_query_json_reports_parse_error() {
        let client = MockLLMClient::new();
        client.add_response(MockResponse::text("{\"other\": 1}"));

        let result: Result<Probe, _> =
            query_json(&client, "system", "prompt".to_string(), 100, "test").await;
        assert!(matches!(result, Err(BackendError::ParseError { .. })));
    }
}
