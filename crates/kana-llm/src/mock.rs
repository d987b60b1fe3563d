use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use kana_core::errors::GatewayError;
use kana_core::messages::{Message, ToolCall};
use kana_core::provider::{BillingSource, ChatRequest, ChatResponse, ChatTransport, Summarizer};

/// Pre-programmed transport replies for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockReply {
    Message { message: Message, total_tokens: Option<u64> },
    /// A completion with no choices.
    Empty,
    Error(GatewayError),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Message {
            message: Message::assistant(text),
            total_tokens: None,
        }
    }

    /// Assistant turn carrying `(id, name, arguments)` function calls.
    pub fn tool_calls(text: Option<&str>, calls: &[(&str, &str, &str)]) -> Self {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall::function(*id, *name, *args))
            .collect();
        Self::Message {
            message: Message::assistant_with_calls(text.map(String::from), calls),
            total_tokens: None,
        }
    }

    pub fn with_tokens(self, tokens: u64) -> Self {
        match self {
            Self::Message { message, .. } => Self::Message {
                message,
                total_tokens: Some(tokens),
            },
            other => other,
        }
    }
}

/// Mock transport that returns replies in sequence and records every request.
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    /// Served forever once the scripted replies run out.
    fallback: Option<MockReply>,
    requests: Mutex<Vec<ChatRequest>>,
    call_count: AtomicUsize,
}

impl MockTransport {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Serve `reply` on every call.
    pub fn repeating(reply: MockReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let reply = self.replies.lock().pop_front().or_else(|| self.fallback.clone());
        match reply {
            Some(MockReply::Message { message, total_tokens }) => Ok(ChatResponse {
                message: Some(message),
                total_tokens,
            }),
            Some(MockReply::Empty) => Ok(ChatResponse::default()),
            Some(MockReply::Error(e)) => Err(e),
            None => Err(GatewayError::InvalidRequest(format!(
                "MockTransport: no reply configured for call {idx}"
            ))),
        }
    }
}

enum SummarizerMode {
    Fixed(String),
    /// Echo the input back, prefixed.
    Echo,
    Scripted(VecDeque<Result<String, GatewayError>>),
}

/// Mock summarizer that records each `(instruction, text)` it was asked to compress.
pub struct MockSummarizer {
    mode: Mutex<SummarizerMode>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockSummarizer {
    fn with_mode(mode: SummarizerMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fixed(summary: &str) -> Self {
        Self::with_mode(SummarizerMode::Fixed(summary.to_string()))
    }

    pub fn echo() -> Self {
        Self::with_mode(SummarizerMode::Echo)
    }

    /// Results served in order; once exhausted every call fails.
    pub fn scripted(results: Vec<Result<String, GatewayError>>) -> Self {
        Self::with_mode(SummarizerMode::Scripted(results.into()))
    }

    pub fn failing() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn compress(&self, instruction: &str, text: &str) -> Result<String, GatewayError> {
        self.calls.lock().push((instruction.to_string(), text.to_string()));
        match &mut *self.mode.lock() {
            SummarizerMode::Fixed(s) => Ok(s.clone()),
            SummarizerMode::Echo => Ok(format!("summary of: {text}")),
            SummarizerMode::Scripted(queue) => queue
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::ServerError { status: 500, body: "mock failure".into() })),
        }
    }
}

/// Mock billing source serving scripted spend readings.
pub struct MockBilling {
    readings: Mutex<VecDeque<Result<f64, GatewayError>>>,
    call_count: AtomicUsize,
}

impl MockBilling {
    pub fn new(readings: Vec<Result<f64, GatewayError>>) -> Self {
        Self {
            readings: Mutex::new(readings.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BillingSource for MockBilling {
    async fn spent_today(&self) -> Result<f64, GatewayError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.readings
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::NetworkError("mock billing exhausted".into())))
    }
}
