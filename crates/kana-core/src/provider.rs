use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::messages::Message;
use crate::tools::ToolDefinition;

#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    /// `None` when the provider returned no choice at all.
    pub message: Option<Message>,
    pub total_tokens: Option<u64>,
}

/// Chat-completions style transport (OpenAI-compatible).
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError>;
}

/// Single-shot instruction-following reduction of `text`.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn compress(&self, instruction: &str, text: &str) -> Result<String, GatewayError>;
}

/// Source of today's spend, in the budget's currency.
#[async_trait]
pub trait BillingSource: Send + Sync {
    async fn spent_today(&self) -> Result<f64, GatewayError>;
}
