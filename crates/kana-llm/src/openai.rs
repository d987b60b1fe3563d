use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use kana_core::errors::GatewayError;
use kana_core::messages::{Message, Role, ToolCall};
use kana_core::provider::{ChatRequest, ChatResponse, ChatTransport, Summarizer};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Chat-completions client for OpenAI and compatible endpoints.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    async fn post_completion(&self, body: &Value) -> Result<Value, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(REQUEST_TIMEOUT)
                } else {
                    GatewayError::NetworkError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().await.unwrap_or_default();
            return Err(match GatewayError::from_status(status, body) {
                GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                other => other,
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ChatTransport for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model, messages = request.messages.len()))]
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let body = chat_body(&self.model, request);
        let raw = self.post_completion(&body).await?;
        let response = parse_completion(raw)?;
        debug!(total_tokens = ?response.total_tokens, "chat completion received");
        Ok(response)
    }
}

#[async_trait]
impl Summarizer for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn compress(&self, instruction: &str, text: &str) -> Result<String, GatewayError> {
        let mut messages = Vec::with_capacity(2);
        if !instruction.trim().is_empty() {
            messages.push(Message::system(instruction));
        }
        messages.push(Message::user(text));
        let request = ChatRequest {
            messages,
            tools: Vec::new(),
        };
        let raw = self.post_completion(&chat_body(&self.model, &request)).await?;
        let response = parse_completion(raw)?;
        Ok(response
            .message
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default())
    }
}

/// Request body for `/chat/completions`.
pub fn chat_body(model: &str, request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
    }
    body
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    role: Option<Role>,
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

/// Pick the first choice out of a completion payload.
pub fn parse_completion(raw: Value) -> Result<ChatResponse, GatewayError> {
    let completion: Completion =
        serde_json::from_value(raw).map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
    let message = completion.choices.into_iter().next().map(|c| Message {
        role: c.message.role.unwrap_or(Role::Assistant),
        content: c.message.content,
        tool_calls: c.message.tool_calls.filter(|calls| !calls.is_empty()),
        tool_call_id: None,
    });
    Ok(ChatResponse {
        message,
        total_tokens: completion.usage.and_then(|u| u.total_tokens),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kana_core::tools::ToolDefinition;

    #[test]
    fn body_omits_tools_when_empty() {
        let req = ChatRequest {
            messages: vec![Message::system("be nice"), Message::user("hi")],
            tools: vec![],
        };
        let body = chat_body("gpt-test", &req);
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn body_wraps_tools_as_functions() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "think".into(),
                description: "Think".into(),
                parameters_schema: json!({"type": "object"}),
            }],
        };
        let body = chat_body("m", &req);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "think");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn parse_tool_call_completion() {
        let raw = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                    "function": {"name": "set_emotion", "arguments": "{\"emotion\":\"happy\"}"}}]
            }}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_completion(raw).unwrap();
        let msg = resp.message.unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.function_calls()[0].function.name, "set_emotion");
        assert_eq!(resp.total_tokens, Some(15));
    }

    #[test]
    fn parse_empty_choices_is_no_message() {
        let resp = parse_completion(json!({"choices": []})).unwrap();
        assert!(resp.message.is_none());
        assert!(resp.total_tokens.is_none());
    }

    #[test]
    fn parse_garbage_is_malformed() {
        let err = parse_completion(json!({"choices": "nope"})).unwrap_err();
        assert_eq!(err.error_kind(), "malformed_response");
    }
}
