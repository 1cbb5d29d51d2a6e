use super::error::BackendError;
use super::types::{LLMRequest, LLMResponse};
use async_trait::async_trait;

/// Chat backend behind the LLM analyzer and fixer.
///
/// Implementations enforce their own request timeout. The pipeline bounds
/// every collaborator call by its own budget on top of that.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError>;

    fn name(&self) -> &str;

    fn model_info(&self) -> Option<String> {
        None
    }

    /// `backend/model` for logs and health output
    fn label(&self) -> String {
        match self.model_info() {
            Some(model) => format!("{}/{}", self.name(), model),
            None => self.name().to_string(),
        }
    }
}
