use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use kana_core::entries::Entry;
use kana_core::events::AgentEvent;
use kana_core::messages::Message;
use kana_core::provider::{ChatRequest, ChatTransport, Summarizer};
use kana_store::kv::keys;
use kana_store::{ConversationRepo, Database, KvRepo};

use crate::error::EngineError;
use crate::executor::{ApprovalHandler, ToolExecutor};
use crate::gauge::SharedGauge;
use crate::ledger::{ConversationLedger, EntryOptions};
use crate::profile::ProfileKeeper;
use crate::prompt::{PromptBuilder, DEFAULT_PERSONA};
use crate::session::{RestOutcome, SessionConfig, SessionManager};

pub const NO_RESPONSE: &str = "(no response)";
pub const MAX_ITERATIONS_REACHED: &str = "(max iterations reached)";
pub const NOTHING_TO_RETRY: &str = "(nothing to retry)";

const GENERIC_NUDGE: &str =
    "Greet the user and casually ask something about themselves to get to know them better.";

/// Configuration for the conversation loop.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    /// Inputs shorter than this (in chars, trimmed) on the first turn count as a greeting.
    pub greeting_threshold: usize,
    pub persona: String,
    pub session: SessionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            greeting_threshold: 20,
            persona: DEFAULT_PERSONA.to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Drives the bounded call-model / run-tools loop for one session.
///
/// `run`, `retry` and `rest` take `&mut self`; the caller owns the single
/// instance and never overlaps turns.
pub struct Orchestrator {
    transport: Arc<dyn ChatTransport>,
    executor: ToolExecutor,
    ledger: ConversationLedger,
    conversations: ConversationRepo,
    kv: KvRepo,
    sessions: SessionManager,
    prompts: PromptBuilder,
    questions: Arc<ProfileKeeper>,
    gauge: SharedGauge,
    event_tx: broadcast::Sender<AgentEvent>,
    config: OrchestratorConfig,
    first_user_turn: bool,
    rest_pending: bool,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        transport: Arc<dyn ChatTransport>,
        summarizer: Arc<dyn Summarizer>,
        executor: ToolExecutor,
        gauge: SharedGauge,
        event_tx: broadcast::Sender<AgentEvent>,
        config: OrchestratorConfig,
    ) -> Self {
        let prompts = PromptBuilder::new(
            config.persona.clone(),
            db.clone(),
            config.session.recent_summary_ttl,
        );
        let ledger = ConversationLedger::new(prompts.build(), Some(ConversationRepo::new(db.clone())));
        Self {
            transport,
            executor,
            ledger,
            conversations: ConversationRepo::new(db.clone()),
            kv: KvRepo::new(db.clone()),
            sessions: SessionManager::new(db.clone(), Arc::clone(&summarizer), config.session.clone()),
            prompts,
            questions: Arc::new(ProfileKeeper::new(db, summarizer)),
            gauge,
            event_tx,
            config,
            first_user_turn: true,
            rest_pending: false,
        }
    }

    fn send_event(&self, event: AgentEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    /// Pick up the open conversation, if any, and make sure a question is queued.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let resumed = self.sessions.resume()?;
        if !resumed.entries.is_empty() {
            self.first_user_turn = false;
        }
        self.ledger.set_conversation_id(resumed.conversation_id);
        self.ledger.hydrate(resumed.entries);

        if self.questions.queued_question().is_none() {
            self.questions.spawn_next_question();
        }
        Ok(())
    }

    /// One user turn. Transport errors propagate; sentinels come back as `Ok`.
    #[instrument(skip(self, input), fields(conversation_id = tracing::field::Empty))]
    pub async fn run(&mut self, input: &str) -> Result<String, EngineError> {
        self.ensure_conversation();
        if let Some(id) = self.ledger.conversation_id() {
            tracing::Span::current().record("conversation_id", tracing::field::display(id));
        }

        self.ledger.add_message(Message::user(input), EntryOptions::default());

        if self.first_user_turn && input.trim().chars().count() < self.config.greeting_threshold {
            let nudge = match self.questions.queued_question() {
                Some(q) => format!(
                    "After greeting, you MUST ask this exact question (translate to the conversation language if needed): {q}"
                ),
                None => GENERIC_NUDGE.to_string(),
            };
            self.ledger.push_raw(Message::developer(nudge));
            self.questions.spawn_next_question();
        }
        self.first_user_turn = false;

        self.run_loop().await
    }

    /// Drop the last turn and answer the same user message again.
    pub async fn retry(&mut self) -> Result<String, EngineError> {
        let Some(turn) = self.ledger.pop_last_turn() else {
            return Ok(NOTHING_TO_RETRY.to_string());
        };
        info!(removed_rows = turn.removed_rows, "retrying last turn");
        self.run_loop().await
    }

    async fn run_loop(&mut self) -> Result<String, EngineError> {
        let mut turn_tokens = 0u64;
        let mut iterations = 0u32;

        let reply = loop {
            if iterations >= self.config.max_iterations {
                warn!(max = self.config.max_iterations, "iteration cap reached");
                break MAX_ITERATIONS_REACHED.to_string();
            }
            iterations += 1;

            let Some(message) = self.call_model(&mut turn_tokens).await? else {
                break NO_RESPONSE.to_string();
            };
            let text = message.text().map(str::to_string);
            let calls = message.function_calls();
            self.ledger.add_message(message, EntryOptions::default());

            if calls.is_empty() {
                break text.unwrap_or_else(|| NO_RESPONSE.to_string());
            }

            let batch = self.executor.run(&calls, self.ledger.conversation_id()).await;
            if let Some(emotion) = batch.emotion {
                self.ledger.set_emotion(emotion);
            }
            for result in batch.results {
                if let Some(info) = result.info {
                    self.send_event(AgentEvent::InfoAdded {
                        label: info.label.clone(),
                        content: info.content.clone(),
                    });
                    self.ledger.add_info(info);
                }
                self.ledger.add_message(
                    Message::tool_result(result.tool_call_id, result.content),
                    EntryOptions::default(),
                );
            }
            if batch.rest_requested {
                self.rest_pending = true;
            }
            if batch.terminal {
                break text.unwrap_or_else(|| NO_RESPONSE.to_string());
            }
        };

        self.send_event(AgentEvent::TurnComplete {
            iterations,
            total_tokens: turn_tokens,
        });
        Ok(reply)
    }

    async fn call_model(&mut self, turn_tokens: &mut u64) -> Result<Option<Message>, EngineError> {
        let hint = self.gauge.read().hint();
        let mut messages = self.ledger.messages();
        messages.push(Message::developer(hint));
        let request = ChatRequest {
            messages,
            tools: self.executor.registry().definitions(),
        };

        let response = self.transport.chat(&request).await?;

        if let Some(tokens) = response.total_tokens.filter(|t| *t > 0) {
            *turn_tokens += tokens;
            let total = self.gauge.write().add_tokens(tokens);
            if let Err(e) = self.kv.set(keys::USAGE_TOTAL_TOKENS, &total.to_string()) {
                warn!(error = %e, "failed to cache token usage");
            }
        }
        Ok(response.message)
    }

    fn ensure_conversation(&mut self) {
        if self.ledger.conversation_id().is_some() {
            return;
        }
        match self.conversations.create() {
            Ok(row) => {
                info!(conversation_id = %row.id, "conversation started");
                self.ledger.set_conversation_id(Some(row.id));
            }
            Err(e) => warn!(error = %e, "failed to create conversation, continuing unpersisted"),
        }
    }

    /// End the current conversation and start a fresh model context. The old
    /// transcript stays visible.
    #[instrument(skip(self))]
    pub async fn rest(&mut self) -> RestOutcome {
        self.rest_pending = false;
        let Some(id) = self.ledger.conversation_id().cloned() else {
            return RestOutcome::default();
        };
        let entries: Vec<Entry> = self.ledger.session_entries();

        self.ledger.new_session(self.prompts.build());
        self.first_user_turn = true;

        let outcome = self.sessions.rest(Some(&id), &entries).await;
        // The rolling summary just changed.
        self.refresh_system_prompt();

        self.send_event(AgentEvent::SessionRested {
            conversation_id: id,
            summarized: outcome.summary.is_some(),
        });
        outcome
    }

    /// Set by the rest tool. The caller should call [`Orchestrator::rest`].
    pub fn rest_pending(&self) -> bool {
        self.rest_pending
    }

    pub fn refresh_system_prompt(&mut self) {
        self.ledger.update_system_prompt(self.prompts.build());
    }

    pub fn set_approval_handler(&mut self, handler: Option<ApprovalHandler>) {
        self.executor.set_approval_handler(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.ledger.entries()
    }

    pub fn emotion(&self) -> &str {
        self.ledger.emotion()
    }

    pub fn gauge(&self) -> &SharedGauge {
        &self.gauge
    }
}
