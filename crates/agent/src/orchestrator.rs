//! The per-turn state machine.
//!
//! Nodes: process_input → call_llm → handle_tools → format_response, with
//! conditional routing and a hard tool-iteration cap. `process_message`
//! drives a blocking turn; `process_message_stream` runs the same machine
//! against the streaming LLM path and forwards protocol events over a
//! bounded channel (the transport's consumption rate is the backpressure).

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use vox_checkpoint::Checkpointer;
use vox_domain::error::Error;
use vox_domain::event::Event;
use vox_domain::message::{Message, Role};
use vox_domain::stream::{StreamEvent, Usage};
use vox_domain::tool::{ToolCall, ToolResult};
use vox_llm::{ChatRequest, LlmClient, ToolChoice, TOOL_CALLS_METADATA_KEY};
use vox_sessions::{HybridSessionStore, ToolCallRepository};
use vox_tools::ToolExecutor;

use crate::cancel::CancelToken;
use crate::emitter::EventEmitter;
use crate::fastpath;
use crate::intent::analyze_intent;
use crate::prompts::{self, canned};
use crate::state::{decode_snapshot, encode_snapshot, ErrorState, NextAction, TurnState};

/// Hard cap on tool rounds per turn; prevents runaway loops.
pub const MAX_TOOL_ITERATIONS: u32 = 7;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs and outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// History messages handed to the LLM each turn.
    pub history_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".into(),
            temperature: 0.7,
            max_tokens: 1500,
            history_window: 10,
        }
    }
}

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: String,
    pub user_id: Option<String>,
    pub text: String,
    /// Concrete model override; the transport resolves variants first.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnMetadata {
    pub intent: Option<String>,
    pub tool_calls: usize,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_state: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tool_limit_reached: bool,
}

/// Outcome of a blocking turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub success: bool,
    pub response: String,
    pub session_id: String,
    pub message_count: usize,
    pub timestamp: DateTime<Utc>,
    pub metadata: TurnMetadata,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    ProcessInput,
    CallLlm,
    HandleTools,
    FormatResponse,
}

impl Node {
    fn name(&self) -> &'static str {
        match self {
            Node::ProcessInput => "process_input",
            Node::CallLlm => "call_llm",
            Node::HandleTools => "handle_tools",
            Node::FormatResponse => "format_response",
        }
    }
}

/// Routing after process_input. `None` terminates the turn.
fn route_after_input(state: &TurnState) -> Option<Node> {
    if state.error_state.is_some() || !state.should_continue {
        return None;
    }
    match state.next_action {
        Some(NextAction::CallLlm) => Some(Node::CallLlm),
        // Fast path: canned response already set, skip the LLM.
        Some(NextAction::FormatResponse) => Some(Node::FormatResponse),
        other => {
            tracing::warn!(?other, "unexpected next_action after process_input");
            None
        }
    }
}

/// Routing after call_llm. Enforces the iteration cap.
fn route_after_llm(state: &mut TurnState) -> Node {
    if state.error_state.is_some() {
        return Node::FormatResponse;
    }
    match state.next_action {
        Some(NextAction::HandleTools) => {
            if state.tool_iteration_count >= MAX_TOOL_ITERATIONS {
                tracing::warn!(
                    count = state.tool_iteration_count,
                    "tool iteration limit reached, forcing format_response"
                );
                state.tool_limit_reached = true;
                state.pending_tool_calls.clear();
                Node::FormatResponse
            } else {
                Node::HandleTools
            }
        }
        Some(NextAction::FormatResponse) => Node::FormatResponse,
        other => {
            tracing::warn!(?other, "unexpected next_action after call_llm");
            state.error_state = Some(ErrorState::Internal {
                message: "unexpected routing state after call_llm".into(),
            });
            Node::FormatResponse
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    store: Arc<HybridSessionStore>,
    checkpointer: Arc<dyn Checkpointer>,
    tool_repo: Option<Arc<dyn ToolCallRepository>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        store: Arc<HybridSessionStore>,
        checkpointer: Arc<dyn Checkpointer>,
        tool_repo: Option<Arc<dyn ToolCallRepository>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            store,
            checkpointer,
            tool_repo,
            config,
        }
    }

    pub fn store(&self) -> &Arc<HybridSessionStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    /// The most recent checkpointed state for a thread, if any.
    pub async fn latest_state(&self, thread_id: &str) -> vox_domain::Result<Option<TurnState>> {
        match self.checkpointer.get(thread_id).await? {
            Some(checkpoint) => Ok(Some(decode_snapshot(&checkpoint.state)?)),
            None => Ok(None),
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Blocking turn
    // ──────────────────────────────────────────────────────────────

    /// Drive one turn to completion and return the aggregate report.
    pub async fn process_message(&self, input: TurnInput) -> TurnReport {
        let model = input.model.clone().unwrap_or_else(|| self.config.model.clone());
        let mut state = TurnState::new(
            input.session_id.clone(),
            input.user_id.clone(),
            input.text.clone(),
            model,
            self.config.temperature,
            self.config.max_tokens,
        );
        let history = self
            .store
            .get_history(&input.session_id, Some(self.config.history_window))
            .await;

        let mut node = Node::ProcessInput;
        let mut step: u32 = 0;
        loop {
            match node {
                Node::ProcessInput => self.process_input(&mut state),
                Node::CallLlm => self.call_llm_blocking(&mut state, &history).await,
                Node::HandleTools => {
                    self.handle_tools(&mut state).await;
                }
                Node::FormatResponse => self.format_response(&mut state),
            }

            step += 1;
            self.write_checkpoint(&state, step, node.name()).await;

            let next = match node {
                Node::ProcessInput => route_after_input(&state),
                Node::CallLlm => Some(route_after_llm(&mut state)),
                // Tools always hand back to the model so it can react,
                // including to failed results.
                Node::HandleTools => Some(Node::CallLlm),
                Node::FormatResponse => None,
            };
            match next {
                Some(n) => node = n,
                None => break,
            }
        }

        self.persist_turn_messages(&state).await;
        self.report(&state)
    }

    fn report(&self, state: &TurnState) -> TurnReport {
        TurnReport {
            success: true,
            response: state.agent_response.clone(),
            session_id: state.session_id.clone(),
            message_count: state.messages.len(),
            timestamp: Utc::now(),
            metadata: TurnMetadata {
                intent: state.current_intent.clone(),
                tool_calls: state.executed_tool_calls.len(),
                model: state.model.clone(),
                error_state: state.error_state.as_ref().map(|e| e.tag().to_string()),
                tool_limit_reached: state.tool_limit_reached,
            },
        }
    }

    // ──────────────────────────────────────────────────────────────
    // Nodes
    // ──────────────────────────────────────────────────────────────

    fn process_input(&self, state: &mut TurnState) {
        let user_input = state.user_input.trim().to_string();

        if user_input.is_empty() {
            state.error_state = Some(ErrorState::EmptyInput);
            state.should_continue = false;
            state.agent_response = canned::EMPTY_INPUT.into();
            state.next_action = Some(NextAction::FormatResponse);
            return;
        }

        if fastpath::is_simple_greeting(&user_input) {
            tracing::debug!(session_id = %state.session_id, "greeting fast path");
            state.agent_response = fastpath::greeting_response(&user_input).into();
            state.current_intent = Some("greeting".into());
            state.next_action = Some(NextAction::FormatResponse);
            state.messages.push(
                Message::user(&user_input).with_metadata("fast_path", serde_json::json!(true)),
            );
            return;
        }

        state.messages.push(Message::user(&user_input));
        state.current_intent = Some(analyze_intent(&user_input).to_string());
        state.next_action = Some(NextAction::CallLlm);
        state.user_input = user_input;
    }

    async fn call_llm_blocking(&self, state: &mut TurnState, history: &[Message]) {
        let req = self.build_chat_request(state, history, true);

        match self.llm.complete(&req).await {
            Ok(outcome) if !outcome.tool_calls.is_empty() => {
                state
                    .messages
                    .push(assistant_with_tool_calls(&outcome.content, &outcome.tool_calls));
                state.pending_tool_calls = outcome.tool_calls;
                state.next_action = Some(NextAction::HandleTools);
            }
            Ok(outcome) => {
                state.agent_response = outcome.content;
                state.next_action = Some(NextAction::FormatResponse);
            }
            Err(e) => {
                tracing::error!(session_id = %state.session_id, error = %e, "LLM call failed");
                state.error_state = Some(ErrorState::LlmFailure { message: e.to_string() });
                state.agent_response = canned::LLM_FAILURE.into();
                state.next_action = Some(NextAction::FormatResponse);
            }
        }
    }

    /// Execute all pending tool calls concurrently; returns the results
    /// in call order (also recorded into the state).
    async fn handle_tools(&self, state: &mut TurnState) -> Vec<ToolResult> {
        state.tool_iteration_count += 1;
        let calls = std::mem::take(&mut state.pending_tool_calls);
        if calls.is_empty() {
            state.next_action = Some(NextAction::CallLlm);
            return Vec::new();
        }

        let started = Instant::now();
        let results = self.executor.execute_batch(&calls).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        for (call, result) in calls.iter().zip(&results) {
            state
                .messages
                .push(Message::tool(&call.call_id, result.content_text()));

            if let Some(repo) = &self.tool_repo {
                if let Err(e) = repo
                    .record(&state.session_id, call, result, None, Some(elapsed_ms))
                    .await
                {
                    tracing::warn!(tool = %call.tool_name, error = %e, "tool-call row write failed");
                }
            }
        }

        state.executed_tool_calls.extend(calls);
        state.tool_results.extend(results.iter().cloned());
        state.next_action = Some(NextAction::CallLlm);
        results
    }

    fn format_response(&self, state: &mut TurnState) {
        if state.agent_response.trim().is_empty() {
            state.agent_response = if state.tool_limit_reached {
                canned::TOOL_LIMIT.into()
            } else {
                canned::MISSING_RESPONSE.into()
            };
        }

        // Distinct from the wire `tool_calls` key, which marks turn-local
        // assistant messages that issued calls.
        let mut assistant = Message::assistant(&state.agent_response)
            .with_metadata("intent", serde_json::json!(state.current_intent))
            .with_metadata(
                "tool_call_count",
                serde_json::json!(state.executed_tool_calls.len()),
            );
        if state.tool_limit_reached {
            assistant = assistant.with_metadata("tool_limit_reached", serde_json::json!(true));
        }
        if let Some(error) = &state.error_state {
            assistant = assistant.with_metadata("error_state", serde_json::json!(error.tag()));
        }
        state.messages.push(assistant);
        state.should_continue = false;
    }

    // ──────────────────────────────────────────────────────────────
    // Streaming turn
    // ──────────────────────────────────────────────────────────────

    /// Run a streaming turn; events arrive on the returned channel. The
    /// channel is bounded, so a slow consumer backpressures the turn.
    pub fn process_message_stream(
        self: &Arc<Self>,
        input: TurnInput,
        cancel: CancelToken,
    ) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel::<Event>(64);
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let emitter = EventEmitter::new(Some(input.session_id.clone()));
            if let Err(e) = orchestrator
                .run_stream_inner(input, &tx, &emitter, &cancel)
                .await
            {
                tracing::error!(error = %e, "streaming turn failed");
                let _ = tx.send(emitter.error(&e)).await;
            }
        });

        rx
    }

    async fn run_stream_inner(
        &self,
        input: TurnInput,
        tx: &mpsc::Sender<Event>,
        emitter: &EventEmitter,
        cancel: &CancelToken,
    ) -> vox_domain::Result<()> {
        let turn_start = Instant::now();
        let model = input.model.clone().unwrap_or_else(|| self.config.model.clone());
        let mut state = TurnState::new(
            input.session_id.clone(),
            input.user_id.clone(),
            input.text.clone(),
            model.clone(),
            self.config.temperature,
            self.config.max_tokens,
        );

        let _ = tx.send(emitter.workflow_started(&input.text)).await;

        // ── Node: process_input ──────────────────────────────────
        let _ = tx.send(emitter.node_started("process_input")).await;
        let _ = tx
            .send(emitter.thinking_phase("validating input", "process_input"))
            .await;
        let node_start = Instant::now();
        let history = self
            .store
            .get_history(&input.session_id, Some(self.config.history_window))
            .await;
        self.process_input(&mut state);
        let mut step: u32 = 1;
        self.write_checkpoint(&state, step, "process_input").await;
        let _ = tx
            .send(emitter.node_finished("process_input", ms(node_start)))
            .await;

        if matches!(state.error_state, Some(ErrorState::EmptyInput)) {
            let _ = tx
                .send(emitter.error_message("empty_input", Some("VALIDATION".into())))
                .await;
            let _ = tx.send(emitter.workflow_complete(ms(turn_start))).await;
            return Ok(());
        }

        // Fast path: answer the greeting without touching the LLM.
        if state.next_action == Some(NextAction::FormatResponse) {
            let _ = tx
                .send(emitter.route_decision("process_input", "format_response", "fast-path greeting"))
                .await;
            self.format_response(&mut state);
            step += 1;
            self.write_checkpoint(&state, step, "format_response").await;
            let _ = tx.send(emitter.start(Some(model))).await;
            let _ = tx
                .send(emitter.end(&state.agent_response, Some(self.end_metadata(&state))))
                .await;
            self.persist_turn_messages(&state).await;
            let _ = tx.send(emitter.workflow_complete(ms(turn_start))).await;
            return Ok(());
        }

        let _ = tx
            .send(emitter.route_decision("process_input", "call_llm", "input validated"))
            .await;
        let _ = tx.send(emitter.start(Some(model))).await;

        // ── LLM / tool loop ──────────────────────────────────────
        let mut text_buf = String::new();
        let mut total_usage = Usage::default();
        // After the first tool round, follow-up synthesis calls go out
        // without tool schemas to prevent recursion.
        let mut with_tools = true;

        loop {
            if cancel.is_cancelled() {
                return self
                    .finish_cancelled(&mut state, tx, emitter, &text_buf, turn_start)
                    .await;
            }

            let _ = tx.send(emitter.node_started("call_llm")).await;
            let _ = tx.send(emitter.llm_streaming("generating")).await;
            let node_start = Instant::now();

            let req = self.build_chat_request(&state, &history, with_tools);
            let mut stream = match self.llm.stream(&req).await {
                Ok(s) => s,
                Err(e) => {
                    return self
                        .finish_llm_failure(&mut state, tx, emitter, &e, turn_start)
                        .await;
                }
            };

            let mut round_text = String::new();
            let mut pending: Vec<ToolCall> = Vec::new();
            let mut was_cancelled = false;
            let mut stream_error: Option<Error> = None;

            while let Some(event) = stream.next().await {
                if cancel.is_cancelled() {
                    was_cancelled = true;
                    break;
                }
                match event {
                    Ok(StreamEvent::Token { text }) => {
                        let _ = tx.send(emitter.delta(&text)).await;
                        round_text.push_str(&text);
                    }
                    Ok(StreamEvent::ToolCalls { calls }) => {
                        pending = calls;
                    }
                    Ok(StreamEvent::Done { usage, .. }) => {
                        if let Some(usage) = usage {
                            total_usage.accumulate(&usage);
                            let _ = tx.send(emitter.token_usage(&usage)).await;
                        }
                    }
                    Err(e) => {
                        stream_error = Some(e);
                        break;
                    }
                }
            }
            // Dropping the stream closes the upstream HTTP read.
            drop(stream);

            text_buf.push_str(&round_text);
            let _ = tx
                .send(emitter.node_finished("call_llm", ms(node_start)))
                .await;

            if was_cancelled {
                return self
                    .finish_cancelled(&mut state, tx, emitter, &text_buf, turn_start)
                    .await;
            }
            if let Some(e) = stream_error {
                return self
                    .finish_llm_failure(&mut state, tx, emitter, &e, turn_start)
                    .await;
            }

            if pending.is_empty() {
                let _ = tx
                    .send(emitter.route_decision("call_llm", "format_response", "content complete"))
                    .await;
                break;
            }

            // Model committed to tool calls; route check first.
            if state.tool_iteration_count >= MAX_TOOL_ITERATIONS {
                state.tool_limit_reached = true;
                let _ = tx
                    .send(emitter.route_decision(
                        "call_llm",
                        "format_response",
                        "tool iteration limit reached",
                    ))
                    .await;
                break;
            }
            let _ = tx
                .send(emitter.route_decision("call_llm", "handle_tools", "model requested tools"))
                .await;
            let _ = tx.send(emitter.tool_calls(&pending)).await;

            state
                .messages
                .push(assistant_with_tool_calls(&round_text, &pending));
            state.pending_tool_calls = pending;

            // ── Node: handle_tools ───────────────────────────────
            // No new tools start after a cancellation request.
            if cancel.is_cancelled() {
                return self
                    .finish_cancelled(&mut state, tx, emitter, &text_buf, turn_start)
                    .await;
            }

            let _ = tx.send(emitter.node_started("handle_tools")).await;
            let node_start = Instant::now();
            for call in &state.pending_tool_calls {
                let _ = tx.send(emitter.tool_call_pending(call)).await;
                let _ = tx.send(emitter.tool_executing(&call.tool_name)).await;
            }

            let executed_from = state.executed_tool_calls.len();
            let results = self.handle_tools(&mut state).await;
            let tool_ms = ms(node_start);

            for (call, result) in state.executed_tool_calls[executed_from..]
                .iter()
                .zip(&results)
            {
                let _ = tx
                    .send(emitter.tool_result(
                        &call.tool_name,
                        result.success,
                        &result.content_text(),
                        Some(tool_ms),
                    ))
                    .await;
            }
            let _ = tx
                .send(emitter.node_finished("handle_tools", tool_ms))
                .await;

            step += 1;
            self.write_checkpoint(&state, step, "handle_tools").await;

            let _ = tx
                .send(emitter.route_decision("handle_tools", "call_llm", "re-evaluating with tool results"))
                .await;
            let _ = tx.send(emitter.llm_streaming("synthesizing")).await;
            with_tools = false;
        }

        // ── Node: format_response ────────────────────────────────
        let _ = tx.send(emitter.node_started("format_response")).await;
        let node_start = Instant::now();
        state.agent_response = text_buf;
        self.format_response(&mut state);
        step += 1;
        self.write_checkpoint(&state, step, "format_response").await;
        let _ = tx
            .send(emitter.node_finished("format_response", ms(node_start)))
            .await;

        let _ = tx
            .send(emitter.end(&state.agent_response, Some(self.end_metadata(&state))))
            .await;

        self.persist_turn_messages(&state).await;
        let _ = tx.send(emitter.workflow_complete(ms(turn_start))).await;
        Ok(())
    }

    fn end_metadata(&self, state: &TurnState) -> serde_json::Value {
        let mut metadata = serde_json::json!({
            "intent": state.current_intent,
            "tool_calls": state.executed_tool_calls.len(),
            "model": state.model,
        });
        if state.tool_limit_reached {
            metadata["tool_limit_reached"] = serde_json::json!(true);
        }
        if let Some(error) = &state.error_state {
            metadata["error_state"] = serde_json::json!(error.tag());
        }
        metadata
    }

    /// Cancellation: flush partial content to history with a marker and
    /// emit `cancelled` (never `error`).
    async fn finish_cancelled(
        &self,
        state: &mut TurnState,
        tx: &mpsc::Sender<Event>,
        emitter: &EventEmitter,
        partial: &str,
        turn_start: Instant,
    ) -> vox_domain::Result<()> {
        tracing::info!(session_id = %state.session_id, "turn cancelled");

        if !partial.is_empty() {
            state.messages.push(
                Message::assistant(format!("[Cancelled] {partial}"))
                    .with_metadata("cancelled", serde_json::json!(true)),
            );
        }
        self.persist_turn_messages(state).await;

        let _ = tx
            .send(emitter.cancelled(Some("client requested cancellation".into())))
            .await;
        let _ = tx.send(emitter.workflow_complete(ms(turn_start))).await;
        Ok(())
    }

    /// Upstream failure: an `error` event plus a user-safe apology `end`.
    async fn finish_llm_failure(
        &self,
        state: &mut TurnState,
        tx: &mpsc::Sender<Event>,
        emitter: &EventEmitter,
        error: &Error,
        turn_start: Instant,
    ) -> vox_domain::Result<()> {
        state.error_state = Some(ErrorState::LlmFailure {
            message: error.to_string(),
        });
        state.agent_response = canned::LLM_FAILURE.into();

        let _ = tx.send(emitter.error(error)).await;

        self.format_response(state);
        let _ = tx
            .send(emitter.end(&state.agent_response, Some(self.end_metadata(state))))
            .await;
        self.persist_turn_messages(state).await;
        let _ = tx.send(emitter.workflow_complete(ms(turn_start))).await;
        Ok(())
    }

    // ──────────────────────────────────────────────────────────────
    // Shared helpers
    // ──────────────────────────────────────────────────────────────

    fn build_chat_request(
        &self,
        state: &TurnState,
        history: &[Message],
        with_tools: bool,
    ) -> ChatRequest {
        let mut messages =
            Vec::with_capacity(1 + history.len().min(self.config.history_window) + state.messages.len());
        messages.push(Message::system(prompts::build_system_prompt(state)));
        let window_start = history.len().saturating_sub(self.config.history_window);
        messages.extend_from_slice(&history[window_start..]);
        messages.extend_from_slice(&state.messages);

        let tools = if with_tools && !state.tool_limit_reached {
            self.executor.registry().schemas()
        } else {
            Vec::new()
        };

        ChatRequest {
            model: state.model.clone(),
            messages,
            temperature: Some(state.temperature),
            max_tokens: Some(state.max_tokens),
            tools,
            tool_choice: ToolChoice::Auto,
        }
    }

    async fn write_checkpoint(&self, state: &TurnState, step: u32, node: &str) {
        let blob = match encode_snapshot(state) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot encoding failed, skipping checkpoint");
                return;
            }
        };
        if let Err(e) = self
            .checkpointer
            .put(
                &state.session_id,
                step,
                blob,
                serde_json::json!({ "node": node, "step": step }),
            )
            .await
        {
            tracing::warn!(error = %e, "checkpoint write failed");
        }
    }

    /// Persist the turn's messages: the user message, tool-role results,
    /// and the final assistant message. Intermediate assistant messages
    /// that only carry tool-call context stay turn-local.
    async fn persist_turn_messages(&self, state: &TurnState) {
        for message in &state.messages {
            if message.role == Role::Assistant
                && message.metadata.contains_key(TOOL_CALLS_METADATA_KEY)
            {
                continue;
            }
            self.store
                .add_message(&state.session_id, state.user_id.as_deref(), message.clone())
                .await;
        }
    }
}

/// Turn-local assistant message carrying the tool calls it issued, in the
/// wire shape the next LLM request needs.
fn assistant_with_tool_calls(content: &str, calls: &[ToolCall]) -> Message {
    let wire: Vec<vox_domain::event::WireToolCall> =
        calls.iter().map(vox_domain::event::WireToolCall::from).collect();
    Message::assistant(content).with_metadata(
        TOOL_CALLS_METADATA_KEY,
        serde_json::to_value(wire).unwrap_or_default(),
    )
}

fn ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use vox_checkpoint::MemoryCheckpointer;
    use vox_domain::event::EventPayload;
    use vox_domain::stream::BoxStream;
    use vox_llm::ChatOutcome;
    use vox_tools::builtin::CalculatorTool;
    use vox_tools::ToolRegistry;

    // ── Scripted LLM double ────────────────────────────────────────

    #[derive(Clone)]
    enum Step {
        /// Final text content (streamed as two token chunks).
        Content(&'static str),
        /// Text streamed slowly, one word at a time (for cancellation).
        SlowContent(&'static str),
        /// A single tool call.
        Tool(&'static str, serde_json::Value),
        /// Upstream failure.
        Fail,
    }

    struct ScriptedLlm {
        steps: Mutex<VecDeque<Step>>,
        /// When the script runs dry, keep replaying the last step.
        repeat_last: Option<Step>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                repeat_last: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn repeating(step: Step) -> Self {
            Self {
                steps: Mutex::new(VecDeque::new()),
                repeat_last: Some(step),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_step(&self) -> Step {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.steps
                .lock()
                .pop_front()
                .or_else(|| self.repeat_last.clone())
                .expect("LLM called with an exhausted script")
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, req: &ChatRequest) -> vox_domain::Result<ChatOutcome> {
            match self.next_step() {
                Step::Content(text) | Step::SlowContent(text) => Ok(ChatOutcome {
                    content: text.into(),
                    tool_calls: Vec::new(),
                    usage: Some(Usage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        total_tokens: 15,
                    }),
                    model: req.model.clone(),
                }),
                Step::Tool(name, args) => Ok(ChatOutcome {
                    content: String::new(),
                    tool_calls: vec![ToolCall::new(name, args)],
                    usage: None,
                    model: req.model.clone(),
                }),
                Step::Fail => Err(Error::Upstream {
                    status: 500,
                    message: "upstream exploded".into(),
                }),
            }
        }

        async fn stream(
            &self,
            _req: &ChatRequest,
        ) -> vox_domain::Result<BoxStream<'static, vox_domain::Result<StreamEvent>>> {
            let step = self.next_step();
            let stream = async_stream::stream! {
                match step {
                    Step::Content(text) => {
                        let mid = text.len() / 2;
                        let mid = (0..=mid).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
                        if mid > 0 {
                            yield Ok(StreamEvent::Token { text: text[..mid].to_string() });
                        }
                        yield Ok(StreamEvent::Token { text: text[mid..].to_string() });
                        yield Ok(StreamEvent::Done {
                            usage: Some(Usage { prompt_tokens: 8, completion_tokens: 4, total_tokens: 12 }),
                            finish_reason: Some("stop".into()),
                        });
                    }
                    Step::SlowContent(text) => {
                        for word in text.split_inclusive(' ') {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            yield Ok(StreamEvent::Token { text: word.to_string() });
                        }
                        yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
                    }
                    Step::Tool(name, args) => {
                        yield Ok(StreamEvent::ToolCalls { calls: vec![ToolCall::new(name, args)] });
                        yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("tool_calls".into()) });
                    }
                    Step::Fail => {
                        yield Err(Error::Upstream { status: 500, message: "mid-stream failure".into() });
                    }
                }
            };
            Ok(Box::pin(stream))
        }
    }

    // ── Harness ────────────────────────────────────────────────────

    fn orchestrator_with(llm: Arc<ScriptedLlm>) -> Arc<Orchestrator> {
        orchestrator_with_store(llm, Arc::new(HybridSessionStore::memory_only(20, 24)))
    }

    fn orchestrator_with_store(
        llm: Arc<ScriptedLlm>,
        store: Arc<HybridSessionStore>,
    ) -> Arc<Orchestrator> {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(CalculatorTool)).unwrap();
        let executor = Arc::new(ToolExecutor::new(
            registry,
            32,
            Duration::from_secs(300),
            Duration::from_secs(10),
        ));
        Arc::new(Orchestrator::new(
            llm,
            executor,
            store,
            Arc::new(MemoryCheckpointer::new()),
            None,
            OrchestratorConfig {
                model: "gpt-4".into(),
                ..Default::default()
            },
        ))
    }

    fn input(session: &str, text: &str) -> TurnInput {
        TurnInput {
            session_id: session.into(),
            user_id: None,
            text: text.into(),
            model: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn transport_events(events: &[Event]) -> Vec<&Event> {
        events.iter().filter(|e| !e.payload.is_trace()).collect()
    }

    // ── Blocking turns ─────────────────────────────────────────────

    #[tokio::test]
    async fn plain_text_turn_persists_user_then_assistant() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Content("Hello there!")]));
        let orchestrator = orchestrator_with(llm.clone());

        let report = orchestrator.process_message(input("s1", "hi there friend")).await;

        assert!(report.success);
        assert_eq!(report.response, "Hello there!");
        assert_eq!(report.metadata.tool_calls, 0);
        assert_eq!(llm.call_count(), 1);

        let history = orchestrator.store().get_history("s1", None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hi there friend");
        assert_eq!(history[1].role, Role::Assistant);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn tool_round_trip_persists_user_tool_assistant() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Step::Tool("calculator", serde_json::json!({"expression": "7*6"})),
            Step::Content("7 times 6 is 42."),
        ]));
        let orchestrator = orchestrator_with(llm.clone());

        let report = orchestrator.process_message(input("s1", "what is 7*6")).await;

        assert!(report.response.contains("42"));
        assert_eq!(report.metadata.tool_calls, 1);
        // "what …" trips the help_request keyword; intent is a prompt
        // hint, not a routing decision.
        assert_eq!(report.metadata.intent.as_deref(), Some("help_request"));
        assert_eq!(llm.call_count(), 2);

        let history = orchestrator.store().get_history("s1", None).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Tool);
        assert!(history[1].tool_call_id.is_some());
        assert!(history[1].content.contains("42"));
        assert_eq!(history[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn iteration_cap_forces_format_response() {
        let llm = Arc::new(ScriptedLlm::repeating(Step::Tool(
            "calculator",
            serde_json::json!({"expression": "1+1"}),
        )));
        let orchestrator = orchestrator_with(llm.clone());

        let report = orchestrator.process_message(input("s1", "loop forever")).await;

        assert!(report.metadata.tool_limit_reached);
        assert_eq!(report.metadata.tool_calls, MAX_TOOL_ITERATIONS as usize);
        assert_eq!(report.response, canned::TOOL_LIMIT);
        // Seven tool rounds means eight LLM calls (the eighth hit the cap).
        assert_eq!(llm.call_count(), MAX_TOOL_ITERATIONS as usize + 1);

        let state = orchestrator.latest_state("s1").await.unwrap().unwrap();
        assert_eq!(state.tool_iteration_count, MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_llm() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let orchestrator = orchestrator_with(llm.clone());

        let report = orchestrator.process_message(input("s1", "   ")).await;

        assert_eq!(report.response, canned::EMPTY_INPUT);
        assert_eq!(report.metadata.error_state.as_deref(), Some("empty_input"));
        assert_eq!(llm.call_count(), 0);
        assert!(orchestrator.store().get_history("s1", None).await.is_empty());
    }

    #[tokio::test]
    async fn greeting_fast_path_skips_llm() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let orchestrator = orchestrator_with(llm.clone());

        let report = orchestrator.process_message(input("s1", "hello")).await;

        assert!(!report.response.is_empty());
        assert_eq!(report.metadata.intent.as_deref(), Some("greeting"));
        assert_eq!(llm.call_count(), 0);

        let history = orchestrator.store().get_history("s1", None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, report.response);
    }

    #[tokio::test]
    async fn llm_failure_yields_apology_not_panic() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Fail]));
        let orchestrator = orchestrator_with(llm);

        let report = orchestrator.process_message(input("s1", "break please")).await;

        assert_eq!(report.response, canned::LLM_FAILURE);
        assert_eq!(report.metadata.error_state.as_deref(), Some("llm_failure"));
    }

    #[tokio::test]
    async fn durable_store_failure_does_not_fail_the_turn() {
        struct BrokenRepo;

        #[async_trait::async_trait]
        impl vox_sessions::ConversationRepository for BrokenRepo {
            async fn get_or_create_session(
                &self,
                _: &str,
                _: Option<&str>,
            ) -> vox_domain::Result<vox_domain::message::Session> {
                Err(Error::Internal("database down".into()))
            }
            async fn save_message(&self, _: &str, _: &Message) -> vox_domain::Result<()> {
                Err(Error::Internal("database down".into()))
            }
            async fn load_recent_messages(
                &self,
                _: &str,
                _: usize,
            ) -> vox_domain::Result<Vec<Message>> {
                Err(Error::Internal("database down".into()))
            }
            async fn delete_session(&self, _: &str) -> vox_domain::Result<()> {
                Err(Error::Internal("database down".into()))
            }
            async fn list_user_sessions(
                &self,
                _: &str,
                _: Option<vox_domain::message::SessionStatus>,
            ) -> vox_domain::Result<Vec<vox_domain::message::Session>> {
                Err(Error::Internal("database down".into()))
            }
            async fn probe(&self) -> vox_domain::Result<()> {
                Err(Error::Internal("database down".into()))
            }
        }

        let llm = Arc::new(ScriptedLlm::new(vec![Step::Content("still fine")]));
        let store = Arc::new(HybridSessionStore::new(Arc::new(BrokenRepo), 20, 24));
        let orchestrator = orchestrator_with_store(llm, store.clone());

        let report = orchestrator.process_message(input("s9", "are you ok")).await;

        assert!(report.success);
        assert_eq!(report.response, "still fine");
        assert!(store.is_fallback());
        assert!(store.stats().db_errors.load(std::sync::atomic::Ordering::Relaxed) >= 1);
        assert!(
            store
                .stats()
                .fallback_triggers
                .load(std::sync::atomic::Ordering::Relaxed)
                >= 1
        );
        // Memory tier still serves the conversation.
        assert_eq!(store.get_history("s9", None).await.len(), 2);
    }

    #[tokio::test]
    async fn checkpoints_round_trip_latest_state() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Content("done")]));
        let orchestrator = orchestrator_with(llm);

        orchestrator.process_message(input("thread-1", "say done")).await;

        let state = orchestrator.latest_state("thread-1").await.unwrap().unwrap();
        assert!(!state.should_continue);
        assert_eq!(state.agent_response, "done");
    }

    // ── Streaming turns ────────────────────────────────────────────

    #[tokio::test]
    async fn stream_end_equals_delta_concat() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Content("Once upon a time.")]));
        let orchestrator = orchestrator_with(llm);

        let rx = orchestrator
            .process_message_stream(input("s2", "tell me a story"), CancelToken::new());
        let events = drain(rx).await;

        // Envelope invariants across the whole stream.
        let mut ids = HashSet::new();
        let mut prev_ts = String::new();
        for event in &events {
            assert_eq!(event.session_id.as_deref(), Some("s2"));
            assert!(ids.insert(event.id.clone()), "duplicate event id");
            assert!(event.timestamp >= prev_ts);
            prev_ts = event.timestamp.clone();
        }

        let transport = transport_events(&events);
        assert!(matches!(transport[0].payload, EventPayload::Start { .. }));

        let mut concat = String::new();
        for event in &transport {
            if let EventPayload::Delta { content } = &event.payload {
                assert!(!content.is_empty());
                concat.push_str(content);
            }
        }
        match &transport.last().unwrap().payload {
            EventPayload::End { content, .. } => {
                assert_eq!(content, &concat);
                assert_eq!(content, "Once upon a time.");
            }
            other => panic!("expected end, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_tool_round_trip_emits_tool_calls_then_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Step::Tool("calculator", serde_json::json!({"expression": "7*6"})),
            Step::Content("The answer is 42."),
        ]));
        let orchestrator = orchestrator_with(llm.clone());

        let rx = orchestrator
            .process_message_stream(input("s3", "what is 7*6, stream it"), CancelToken::new());
        let events = drain(rx).await;

        let tool_call_events: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::ToolCalls { tool_calls } => Some(tool_calls),
                _ => None,
            })
            .collect();
        assert_eq!(tool_call_events.len(), 1);
        assert_eq!(tool_call_events[0][0].function.name, "calculator");

        // Deltas follow the second LLM turn; the end carries the answer.
        match &events.last().map(|e| &e.payload) {
            Some(EventPayload::WorkflowComplete { .. }) => {}
            other => panic!("expected workflow_complete last, got {other:?}"),
        }
        let end = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::End { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert!(end.contains("42"));

        let history = orchestrator.store().get_history("s3", None).await;
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn stream_cancellation_persists_partial_with_marker() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::SlowContent(
            "a very long essay that keeps going and going and going",
        )]));
        let orchestrator = orchestrator_with(llm);
        let cancel = CancelToken::new();

        let mut rx = orchestrator
            .process_message_stream(input("s4", "write a long essay"), cancel.clone());

        // Wait for at least one delta, then cancel mid-stream.
        let mut saw_delta = false;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let is_delta = matches!(event.payload, EventPayload::Delta { .. });
            events.push(event);
            if is_delta && !saw_delta {
                saw_delta = true;
                cancel.cancel();
            }
        }
        assert!(saw_delta);

        let cancelled: Vec<_> = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::Cancelled { .. }))
            .collect();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].session_id.as_deref(), Some("s4"));
        // Cancellation never surfaces as an error event.
        assert!(!events.iter().any(|e| matches!(e.payload, EventPayload::Error { .. })));

        let history = orchestrator.store().get_history("s4", None).await;
        let assistant = history.iter().find(|m| m.role == Role::Assistant).unwrap();
        assert!(assistant.content.starts_with("[Cancelled]"));
    }

    #[tokio::test]
    async fn stream_iteration_cap_emits_seven_tool_call_events() {
        let llm = Arc::new(ScriptedLlm::repeating(Step::Tool(
            "calculator",
            serde_json::json!({"expression": "1+1"}),
        )));
        let orchestrator = orchestrator_with(llm);

        let rx = orchestrator
            .process_message_stream(input("s5", "loop forever"), CancelToken::new());
        let events = drain(rx).await;

        let tool_call_count = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::ToolCalls { .. }))
            .count();
        assert_eq!(tool_call_count, MAX_TOOL_ITERATIONS as usize);

        let end_meta = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::End { metadata, .. } => metadata.clone(),
                _ => None,
            })
            .unwrap();
        assert_eq!(end_meta["tool_limit_reached"], true);
        assert_eq!(end_meta["tool_calls"], MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn stream_upstream_failure_emits_error_then_apology_end() {
        let llm = Arc::new(ScriptedLlm::new(vec![Step::Fail]));
        let orchestrator = orchestrator_with(llm);

        let rx = orchestrator
            .process_message_stream(input("s6", "break mid-stream"), CancelToken::new());
        let events = drain(rx).await;

        let error_pos = events
            .iter()
            .position(|e| matches!(e.payload, EventPayload::Error { .. }))
            .expect("error event");
        let end_pos = events
            .iter()
            .position(|e| matches!(e.payload, EventPayload::End { .. }))
            .expect("end event");
        assert!(error_pos < end_pos);

        match &events[error_pos].payload {
            EventPayload::Error { error_code, .. } => {
                assert_eq!(error_code.as_deref(), Some("UPSTREAM"));
            }
            _ => unreachable!(),
        }
        match &events[end_pos].payload {
            EventPayload::End { content, .. } => assert_eq!(content, canned::LLM_FAILURE),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn stream_greeting_fast_path_emits_end_directly() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let orchestrator = orchestrator_with(llm.clone());

        let rx = orchestrator.process_message_stream(input("s7", "你好"), CancelToken::new());
        let events = drain(rx).await;

        assert_eq!(llm.call_count(), 0);
        let transport = transport_events(&events);
        assert!(matches!(transport[0].payload, EventPayload::Start { .. }));
        assert!(matches!(transport[1].payload, EventPayload::End { .. }));
        assert!(!events.iter().any(|e| matches!(e.payload, EventPayload::Delta { .. })));
    }

    #[tokio::test]
    async fn stream_empty_input_emits_validation_error() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let orchestrator = orchestrator_with(llm.clone());

        let rx = orchestrator.process_message_stream(input("s8", ""), CancelToken::new());
        let events = drain(rx).await;

        assert_eq!(llm.call_count(), 0);
        let error = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::Error { error, error_code } => Some((error.clone(), error_code.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(error.0, "empty_input");
        assert_eq!(error.1.as_deref(), Some("VALIDATION"));
    }
}
