use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, instrument, warn};

use kana_core::entries::InfoEntry;
use kana_core::events::AgentEvent;
use kana_core::ids::{ConversationId, ToolCallId};
use kana_core::messages::ToolCall;
use kana_core::tools::{ToolContext, ToolOutput};

use crate::registry::ToolRegistry;
use crate::truncate;

pub const DENIED_RESULT: &str = "Tool execution denied by user.";

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// A tool call suspended until the user decides. Resolve it exactly once;
/// dropping it unresolved counts as a denial.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub tool_call_id: ToolCallId,
    pub name: String,
    pub args_json: String,
    responder: oneshot::Sender<bool>,
}

impl ApprovalRequest {
    pub fn resolve(self, approved: bool) {
        if self.responder.send(approved).is_err() {
            debug!(tool = %self.name, "approval resolved after the executor stopped waiting");
        }
    }
}

/// Receives approval requests. Implementations usually hand the request to a
/// UI task and return immediately.
pub type ApprovalHandler = Arc<dyn Fn(ApprovalRequest) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    Executed,
    Failed,
    Denied,
}

#[derive(Clone, Debug)]
pub struct ToolCallResult {
    pub tool_call_id: ToolCallId,
    pub name: String,
    pub content: String,
    pub info: Option<InfoEntry>,
    pub outcome: CallOutcome,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One result per call, in call order.
    pub results: Vec<ToolCallResult>,
    /// Last emotion set by the batch, if any.
    pub emotion: Option<String>,
    pub terminal: bool,
    pub rest_requested: bool,
}

/// Runs a batch of tool calls one at a time, gating each non-auto-approved
/// call on the approval channel.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    approval: Option<ApprovalHandler>,
    event_tx: broadcast::Sender<AgentEvent>,
    tool_timeout: Duration,
    working_directory: PathBuf,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        event_tx: broadcast::Sender<AgentEvent>,
        working_directory: PathBuf,
    ) -> Self {
        Self {
            registry,
            approval: None,
            event_tx,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            working_directory,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn set_approval_handler(&mut self, handler: Option<ApprovalHandler>) {
        self.approval = handler;
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn send_event(&self, event: AgentEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    #[instrument(skip(self, calls), fields(calls = calls.len()))]
    pub async fn run(&self, calls: &[ToolCall], conversation_id: Option<&ConversationId>) -> BatchOutcome {
        let ctx = ToolContext {
            conversation_id: conversation_id.cloned(),
            working_directory: self.working_directory.clone(),
        };
        let mut batch = BatchOutcome::default();

        for call in calls {
            let id = call.id.clone();
            let name = call.function.name.as_str();

            let Some(entry) = self.registry.entry(name) else {
                warn!(tool = %name, "model requested an unknown tool");
                batch.results.push(ToolCallResult {
                    tool_call_id: id,
                    name: name.to_string(),
                    content: format!("[error] unknown tool: {name}"),
                    info: None,
                    outcome: CallOutcome::Failed,
                });
                continue;
            };
            let flags = entry.flags;
            let tool = Arc::clone(&entry.tool);

            let args = match parse_arguments(&call.function.arguments) {
                Ok(args) => args,
                Err(msg) => {
                    warn!(tool = %name, error = %msg, "malformed tool arguments");
                    batch.terminal |= flags.terminal;
                    batch.rest_requested |= flags.ends_session;
                    batch.results.push(ToolCallResult {
                        tool_call_id: id,
                        name: name.to_string(),
                        content: format!("[error] invalid arguments: {msg}"),
                        info: None,
                        outcome: CallOutcome::Failed,
                    });
                    continue;
                }
            };

            if !flags.auto_approved && !self.approve(&id, name, &call.function.arguments).await {
                self.send_event(AgentEvent::ToolDenied {
                    tool_call_id: id.clone(),
                    tool_name: name.to_string(),
                });
                batch.results.push(ToolCallResult {
                    tool_call_id: id,
                    name: name.to_string(),
                    content: DENIED_RESULT.to_string(),
                    info: None,
                    outcome: CallOutcome::Denied,
                });
                continue;
            }

            let result = tokio::time::timeout(
                self.tool_timeout,
                std::panic::AssertUnwindSafe(tool.execute(args, &ctx)).catch_unwind(),
            )
            .await;

            let (output, outcome) = match result {
                Ok(Ok(Ok(output))) => (output, CallOutcome::Executed),
                Ok(Ok(Err(e))) => (ToolOutput::text(format!("[error] {e}")), CallOutcome::Failed),
                Ok(Err(panic)) => {
                    let msg = panic_message(&panic);
                    error!(tool = %name, panic = %msg, "tool panicked during execution");
                    (ToolOutput::text("[error] internal error: tool crashed"), CallOutcome::Failed)
                }
                Err(_) => {
                    warn!(tool = %name, timeout_secs = self.tool_timeout.as_secs(), "tool timed out");
                    (
                        ToolOutput::text(format!("[error] tool timed out after {}s", self.tool_timeout.as_secs())),
                        CallOutcome::Failed,
                    )
                }
            };

            let content = truncate::truncate_output(&output.content, truncate::MAX_RESULT_BYTES);

            if let Some(emotion) = output.emotion {
                self.send_event(AgentEvent::EmotionChanged {
                    emotion: emotion.clone(),
                });
                batch.emotion = Some(emotion);
            } else if !flags.silent {
                self.send_event(AgentEvent::ToolCompleted {
                    tool_call_id: id.clone(),
                    tool_name: name.to_string(),
                    result: content.clone(),
                });
            }

            batch.terminal |= flags.terminal;
            batch.rest_requested |= flags.ends_session;
            batch.results.push(ToolCallResult {
                tool_call_id: id,
                name: name.to_string(),
                content,
                info: output.info,
                outcome,
            });
        }

        batch
    }

    /// Suspend on the approval channel. No handler means approved; a handler
    /// that drops the request means denied.
    async fn approve(&self, id: &ToolCallId, name: &str, args_json: &str) -> bool {
        self.send_event(AgentEvent::ToolPending {
            tool_call_id: id.clone(),
            tool_name: name.to_string(),
            arguments: args_json.to_string(),
        });
        let Some(handler) = &self.approval else {
            return true;
        };

        let (tx, rx) = oneshot::channel();
        handler(ApprovalRequest {
            tool_call_id: id.clone(),
            name: name.to_string(),
            args_json: args_json.to_string(),
            responder: tx,
        });

        match rx.await {
            Ok(approved) => approved,
            Err(_) => {
                warn!(tool = %name, "approval request dropped without a decision");
                false
            }
        }
    }
}

/// Empty or whitespace-only arguments mean "no arguments". Anything else must
/// be a JSON object.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kana_core::tools::{required_str, Tool, ToolError, ToolFlags};

    struct Stub {
        name: &'static str,
        flags: ToolFlags,
        calls: Arc<AtomicUsize>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Echo,
        Emotion,
        Fail,
        Panic,
        Hang,
        EndSession,
    }

    impl Stub {
        fn new(name: &'static str, flags: ToolFlags, behavior: Behavior) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let stub = Arc::new(Self {
                name,
                flags,
                calls: Arc::clone(&calls),
                behavior,
            });
            (stub, calls)
        }
    }

    #[async_trait]
    impl Tool for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn flags(&self) -> ToolFlags {
            self.flags
        }
        async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Echo => Ok(ToolOutput::text(format!("ran {}", self.name))),
                Behavior::Emotion => {
                    let e = required_str(&args, "emotion")?;
                    Ok(ToolOutput::text(format!("Emotion set to: {e}")).with_emotion(e))
                }
                Behavior::Fail => Err(ToolError::ExecutionFailed("boom".into())),
                Behavior::Panic => panic!("stub exploded"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ToolOutput::text("late"))
                }
                Behavior::EndSession => {
                    Ok(ToolOutput::text("Session ended.").with_info(InfoEntry::new("/rest", "sleeping")))
                }
            }
        }
    }

    fn executor(tools: Vec<Arc<Stub>>) -> (ToolExecutor, broadcast::Receiver<AgentEvent>) {
        let mut registry = ToolRegistry::new();
        for t in tools {
            registry.register(t);
        }
        let (tx, rx) = broadcast::channel(64);
        (ToolExecutor::new(Arc::new(registry), tx, PathBuf::from("/tmp")), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn deciding(approved: bool) -> (ApprovalHandler, Arc<AtomicUsize>) {
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let handler: ApprovalHandler = Arc::new(move |req: ApprovalRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            req.resolve(approved);
        });
        (handler, asked)
    }

    #[tokio::test]
    async fn no_handler_means_approved() {
        let (shell, calls) = Stub::new("shell", ToolFlags::approval_required(), Behavior::Echo);
        let (exec, mut rx) = executor(vec![shell]);
        let batch = exec.run(&[ToolCall::function("c1", "shell", "{}")], None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(batch.results[0].content, "ran shell");
        assert_eq!(batch.results[0].outcome, CallOutcome::Executed);
        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["tool_pending", "tool_completed"]);
    }

    #[tokio::test]
    async fn denied_call_never_executes() {
        let (shell, calls) = Stub::new("shell", ToolFlags::approval_required().terminal(), Behavior::Emotion);
        let (mut exec, mut rx) = executor(vec![shell]);
        let (handler, asked) = deciding(false);
        exec.set_approval_handler(Some(handler));

        let batch = exec
            .run(&[ToolCall::function("c1", "shell", r#"{"emotion":"sad"}"#)], None)
            .await;

        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(batch.results[0].content.contains(DENIED_RESULT));
        assert_eq!(batch.results[0].outcome, CallOutcome::Denied);
        assert!(batch.emotion.is_none());
        assert!(!batch.terminal);

        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["tool_pending", "tool_denied"]);
    }

    #[tokio::test]
    async fn approved_call_runs_after_pending_event() {
        let (shell, calls) = Stub::new("shell", ToolFlags::approval_required(), Behavior::Echo);
        let (mut exec, mut rx) = executor(vec![shell]);
        let (handler, _) = deciding(true);
        exec.set_approval_handler(Some(handler));

        let batch = exec.run(&[ToolCall::function("c1", "shell", "")], None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(batch.results[0].content, "ran shell");
        let kinds: Vec<_> = drain(&mut rx).iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["tool_pending", "tool_completed"]);
    }

    #[tokio::test]
    async fn approval_resolved_from_another_task() {
        let (shell, calls) = Stub::new("shell", ToolFlags::approval_required(), Behavior::Echo);
        let (mut exec, _rx) = executor(vec![shell]);
        let (req_tx, mut req_rx) = tokio::sync::mpsc::unbounded_channel::<ApprovalRequest>();
        exec.set_approval_handler(Some(Arc::new(move |req| {
            let _ = req_tx.send(req);
        })));

        let ui = tokio::spawn(async move {
            let req = req_rx.recv().await.unwrap();
            assert_eq!(req.name, "shell");
            assert_eq!(req.args_json, r#"{"command":"ls"}"#);
            req.resolve(true);
        });

        let batch = exec
            .run(&[ToolCall::function("c1", "shell", r#"{"command":"ls"}"#)], None)
            .await;
        ui.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(batch.results[0].outcome, CallOutcome::Executed);
    }

    #[tokio::test]
    async fn dropped_request_is_a_denial() {
        let (shell, calls) = Stub::new("shell", ToolFlags::approval_required(), Behavior::Echo);
        let (mut exec, _rx) = executor(vec![shell]);
        exec.set_approval_handler(Some(Arc::new(|req: ApprovalRequest| drop(req))));

        let batch = exec.run(&[ToolCall::function("c1", "shell", "{}")], None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(batch.results[0].content, DENIED_RESULT);
    }

    #[tokio::test]
    async fn auto_approved_skips_the_handler() {
        let (think, calls) = Stub::new("think", ToolFlags::auto().silent(), Behavior::Echo);
        let (mut exec, mut rx) = executor(vec![think]);
        let (handler, asked) = deciding(false);
        exec.set_approval_handler(Some(handler));

        let batch = exec.run(&[ToolCall::function("c1", "think", "{}")], None).await;
        assert_eq!(asked.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(batch.results[0].content, "ran think");
        assert!(drain(&mut rx).is_empty(), "silent tools emit nothing");
    }

    #[tokio::test]
    async fn last_emotion_wins_and_is_not_a_tool_event() {
        let (emo, _) = Stub::new("set_emotion", ToolFlags::auto().silent(), Behavior::Emotion);
        let (exec, mut rx) = executor(vec![emo]);
        let batch = exec
            .run(
                &[
                    ToolCall::function("c1", "set_emotion", r#"{"emotion":"happy"}"#),
                    ToolCall::function("c2", "set_emotion", r#"{"emotion":"proud"}"#),
                ],
                None,
            )
            .await;
        assert_eq!(batch.emotion.as_deref(), Some("proud"));
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].content, "Emotion set to: happy");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type() == "emotion_changed"));
    }

    #[tokio::test]
    async fn terminal_flag_ors_across_batch_and_keeps_order() {
        let (rest, _) = Stub::new("rest_session", ToolFlags::auto().silent().terminal().ending_session(), Behavior::EndSession);
        let (think, _) = Stub::new("think", ToolFlags::auto().silent(), Behavior::Echo);
        let (exec, _rx) = executor(vec![rest, think]);
        let batch = exec
            .run(
                &[
                    ToolCall::function("a", "rest_session", "{}"),
                    ToolCall::function("b", "think", "{}"),
                ],
                None,
            )
            .await;
        assert!(batch.terminal);
        assert!(batch.rest_requested);
        let ids: Vec<_> = batch.results.iter().map(|r| r.tool_call_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(batch.results[0].info.as_ref().map(|i| i.label.as_str()), Some("/rest"));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_become_error_results() {
        let (shell, calls) = Stub::new("shell", ToolFlags::approval_required(), Behavior::Echo);
        let (mut exec, _rx) = executor(vec![shell]);
        let (handler, asked) = deciding(true);
        exec.set_approval_handler(Some(handler));

        let batch = exec
            .run(
                &[
                    ToolCall::function("a", "teleport", "{}"),
                    ToolCall::function("b", "shell", "{not json"),
                    ToolCall::function("c", "shell", "[1,2]"),
                ],
                None,
            )
            .await;
        assert_eq!(batch.results.len(), 3);
        assert!(batch.results[0].content.starts_with("[error] unknown tool"));
        assert!(batch.results[1].content.starts_with("[error] invalid arguments"));
        assert!(batch.results[2].content.contains("expected a JSON object"));
        assert!(batch.results.iter().all(|r| r.outcome == CallOutcome::Failed));
        assert_eq!(asked.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_terminal_call_still_ends_the_turn() {
        let (rest, calls) = Stub::new(
            "rest_session",
            ToolFlags::auto().silent().terminal().ending_session(),
            Behavior::Fail,
        );
        let (exec, _rx) = executor(vec![rest]);

        let batch = exec
            .run(&[ToolCall::function("a", "rest_session", "{not json")], None)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(batch.terminal);
        assert!(batch.rest_requested);
        assert_eq!(batch.results[0].outcome, CallOutcome::Failed);

        let batch = exec.run(&[ToolCall::function("b", "rest_session", "{}")], None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(batch.terminal);
        assert!(batch.rest_requested);
    }

    #[tokio::test]
    async fn denied_terminal_call_requests_no_rest() {
        let (rest, _) = Stub::new(
            "rest_session",
            ToolFlags::approval_required().terminal().ending_session(),
            Behavior::EndSession,
        );
        let (mut exec, _rx) = executor(vec![rest]);
        let (handler, _) = deciding(false);
        exec.set_approval_handler(Some(handler));

        let batch = exec.run(&[ToolCall::function("a", "rest_session", "{}")], None).await;
        assert!(!batch.terminal);
        assert!(!batch.rest_requested);
    }

    #[tokio::test]
    async fn tool_errors_and_panics_are_contained() {
        let (fail, _) = Stub::new("fail", ToolFlags::auto(), Behavior::Fail);
        let (boom, _) = Stub::new("boom", ToolFlags::auto(), Behavior::Panic);
        let (exec, _rx) = executor(vec![fail, boom]);
        let batch = exec
            .run(
                &[ToolCall::function("a", "fail", "{}"), ToolCall::function("b", "boom", "{}")],
                None,
            )
            .await;
        assert_eq!(batch.results[0].content, "[error] execution failed: boom");
        assert!(batch.results[1].content.contains("tool crashed"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tools_time_out() {
        let (hang, _) = Stub::new("hang", ToolFlags::auto(), Behavior::Hang);
        let (exec, _rx) = executor(vec![hang]);
        let exec = exec.with_tool_timeout(Duration::from_secs(5));
        let batch = exec.run(&[ToolCall::function("a", "hang", "{}")], None).await;
        assert_eq!(batch.results[0].content, "[error] tool timed out after 5s");
        assert_eq!(batch.results[0].outcome, CallOutcome::Failed);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&p), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&p), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(&p), "unknown panic");
    }
}
