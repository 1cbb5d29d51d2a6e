//! LLM client abstraction layer
//!
//! The analyzer and fixer talk to language models through the [`LLMClient`]
//! trait, so the provider-backed [`GenAIClient`] and the scripted
//! [`MockLLMClient`] can be used interchangeably.

mod client;
mod error;
mod genai;
mod json;
mod mock;
mod types;

pub use client::LLMClient;
pub use error::BackendError;
pub use genai::{parse_provider, GenAIClient};
pub use json::{extract_json_from_response, query_json};
pub use mock::{MockLLMClient, MockResponse};
pub use types::{ChatMessage, LLMRequest, LLMResponse, MessageRole};
