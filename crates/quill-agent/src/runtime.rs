//! Agent runtime loop: model streaming, approval and tool execution.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quill_core::config::Config;
use quill_core::thread::{CompressionLevel, Thread, ThreadState};
use quill_core::types::{ApprovalType, Message, ToolCall, ToolCallStatus, ToolDefinition, total_chars};
use quill_providers::{AdapterError, ChatAdapter, ChatRequest, Credentials, StreamEvent};
use quill_tools::ToolExecutor;

use crate::approval::{ApprovalDecision, ApprovalGate, ApprovalPolicy, RejectAll};
use crate::coalesce::ProgressCoalescer;
use crate::compression::{
    CompressionEngine, CompressionState, HandoffDocument, LlmSummarizer, is_summary_message,
    summary_message,
};
use crate::orchestrator::{PlanRunner, ToolTaskWorker};
use crate::prompt::build_system_prompt;
use crate::scheduler::{ExecutionMode, OrchestratorTask, Scheduler, TaskPlan, TaskStatus};
use crate::{AgentEvent, AgentRunError, AgentRunResult, StopReason};

/// Per-runtime knobs, usually read from [`Config`].
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    /// Model calls allowed per turn.
    pub max_tool_loops: u32,
    /// Context budget in characters.
    pub budget_chars: usize,
    /// Run a batch of read-only calls concurrently.
    pub parallel_read_only: bool,
    pub max_concurrency: usize,
    pub workspace: PathBuf,
    /// Appended to the generated system prompt.
    pub system_prompt: Option<String>,
}

impl RuntimeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model().unwrap_or_default(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            max_tool_loops: config.max_tool_loops(),
            budget_chars: config.compression().budget_chars,
            parallel_read_only: config.parallel_read_only(),
            max_concurrency: config.scheduler().max_concurrency,
            workspace: config.workspace_dir(),
            system_prompt: config.system_prompt().map(str::to_string),
        }
    }
}

/// How a model response ended.
enum Response {
    Complete { content: String, tool_calls: Vec<ToolCall> },
    Failed(AdapterError),
    Aborted,
}

/// Counters for the turn in progress.
struct TurnStats {
    start: Instant,
    iterations: u32,
    tool_calls: u32,
}

impl TurnStats {
    fn finish(&self, stop_reason: StopReason) -> AgentRunResult {
        AgentRunResult {
            stop_reason,
            final_text: None,
            iterations: self.iterations,
            tool_calls: self.tool_calls,
            duration_ms: self.start.elapsed().as_millis() as u64,
            error: None,
            handoff: None,
        }
    }
}

/// Drives conversation turns for one adapter/tool setup.
pub struct AgentRuntime {
    adapter: Arc<dyn ChatAdapter>,
    credentials: Credentials,
    executor: Arc<ToolExecutor>,
    gate: Arc<dyn ApprovalGate>,
    policy: ApprovalPolicy,
    engine: CompressionEngine,
    summarizer: Option<LlmSummarizer>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    /// A runtime that rejects every call needing approval until a gate is set.
    pub fn new(
        adapter: Arc<dyn ChatAdapter>,
        credentials: Credentials,
        executor: Arc<ToolExecutor>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            adapter,
            credentials,
            executor,
            gate: Arc::new(RejectAll),
            policy: ApprovalPolicy::default(),
            engine: CompressionEngine::default(),
            summarizer: None,
            settings,
        }
    }

    pub fn with_approval(mut self, gate: Arc<dyn ApprovalGate>, policy: ApprovalPolicy) -> Self {
        self.gate = gate;
        self.policy = policy;
        self
    }

    pub fn with_compression(mut self, engine: CompressionEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Refine L3 summaries with a model call.
    pub fn with_summarizer(mut self, summarizer: LlmSummarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Run one user turn on `thread`.
    ///
    /// Messages are committed to the thread only at turn boundaries: after a
    /// final answer or after a completed tool phase. An aborted or failed
    /// model call leaves the history as it was. Adapter failures are reported
    /// through the result; the `Err` case is reserved for broken invariants.
    pub async fn run_turn(
        &self,
        thread: &mut Thread,
        input: &str,
        event_tx: mpsc::UnboundedSender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<AgentRunResult> {
        if !thread.state.is_settled() {
            anyhow::bail!("thread {} is mid-turn ({})", thread.id, thread.state);
        }
        info!(thread = %thread.id, model = %self.settings.model, "Agent turn started");

        let result = self.drive(thread, input, &event_tx, &cancel).await;
        match &result {
            Ok(run) => {
                metrics::counter!("quill_agent_turns_total", "stop_reason" => run.stop_reason.as_str())
                    .increment(1);
                metrics::histogram!("quill_agent_turn_duration_seconds")
                    .record(run.duration_ms as f64 / 1000.0);
                info!(
                    thread = %thread.id,
                    stop_reason = run.stop_reason.as_str(),
                    iterations = run.iterations,
                    tool_calls = run.tool_calls,
                    duration_ms = run.duration_ms,
                    "Agent turn finished"
                );
            }
            Err(e) => {
                error!(thread = %thread.id, error = %e, "Agent turn failed");
                thread.state = ThreadState::Error;
                let _ = event_tx.send(AgentEvent::Error {
                    code: "internal".into(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn drive(
        &self,
        thread: &mut Thread,
        input: &str,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<AgentRunResult> {
        let tools = self.executor.definitions();
        let system_prompt = build_system_prompt(
            &tools,
            &self.settings.workspace,
            self.settings.system_prompt.as_deref(),
        );
        let mut stats = TurnStats {
            start: Instant::now(),
            iterations: 0,
            tool_calls: 0,
        };
        if thread.compression_level == CompressionLevel::Handoff {
            warn!(thread = %thread.id, "Thread was handed off, refusing further turns");
            let summary = thread.summary.clone().unwrap_or_default();
            let mut doc = HandoffDocument::new(summary, &thread.messages, total_chars(&thread.messages));
            doc.last_request = Some(input.to_string());
            set_state(thread, ThreadState::Done, event_tx)?;
            let mut result = stats.finish(StopReason::Handoff);
            result.handoff = Some(doc);
            return Ok(result);
        }
        // the user message joins the history with the first committed response
        let mut pending = vec![Message::user(input)];

        while stats.iterations < self.settings.max_tool_loops {
            if let Some(mut doc) = self.compact(thread, &pending, event_tx, cancel).await {
                doc.last_request = Some(input.to_string());
                set_state(thread, ThreadState::Done, event_tx)?;
                warn!(thread = %thread.id, "Context exhausted, handing off");
                let mut result = stats.finish(StopReason::Handoff);
                result.handoff = Some(doc);
                return Ok(result);
            }

            set_state(thread, ThreadState::Streaming, event_tx)?;
            if cancel.is_cancelled() {
                return self.abort(thread, &stats, event_tx);
            }
            stats.iterations += 1;
            debug!(iteration = stats.iterations, "Model call");

            let request = self.request(thread, &pending, &tools, &system_prompt);
            let (content, tool_calls) = match self.stream_response(&request, event_tx, cancel).await {
                Response::Complete { content, tool_calls } => (content, tool_calls),
                Response::Aborted => return self.abort(thread, &stats, event_tx),
                Response::Failed(err) => {
                    warn!(code = %err.code(), error = %err, "Model call failed");
                    set_state(thread, ThreadState::Error, event_tx)?;
                    let _ = event_tx.send(AgentEvent::Error {
                        code: err.code(),
                        message: err.message.clone(),
                    });
                    let mut result = stats.finish(StopReason::Error);
                    result.error = Some(AgentRunError {
                        code: err.code(),
                        message: err.to_string(),
                    });
                    return Ok(result);
                }
            };

            if tool_calls.is_empty() {
                pending.push(Message::assistant(content.clone()));
                thread.extend(pending.drain(..));
                set_state(thread, ThreadState::Done, event_tx)?;
                let mut result = stats.finish(StopReason::Completed);
                result.final_text = Some(content);
                return Ok(result);
            }

            set_state(thread, ThreadState::ToolCall, event_tx)?;
            stats.tool_calls += tool_calls.len() as u32;
            let Some((calls, results)) = self.run_tools(thread, tool_calls, event_tx, cancel).await? else {
                return self.abort(thread, &stats, event_tx);
            };
            pending.push(Message::assistant_with_calls(content, calls));
            pending.extend(results);
            thread.extend(pending.drain(..));
        }

        warn!(max = self.settings.max_tool_loops, "Tool loop limit reached");
        if !thread.state.is_settled() {
            set_state(thread, ThreadState::Done, event_tx)?;
        }
        Ok(stats.finish(StopReason::MaxIterations))
    }

    fn request(
        &self,
        thread: &Thread,
        pending: &[Message],
        tools: &[ToolDefinition],
        system_prompt: &str,
    ) -> ChatRequest {
        ChatRequest {
            model: self.settings.model.clone(),
            messages: thread.messages.iter().chain(pending).cloned().collect(),
            tools: tools.to_vec(),
            system_prompt: Some(system_prompt.to_string()),
            max_tokens: Some(self.settings.max_tokens),
            temperature: self.settings.temperature,
        }
    }

    /// Compress committed history to leave room for `pending`.
    ///
    /// Returns the handoff document when the thread cannot continue.
    async fn compact(
        &self,
        thread: &mut Thread,
        pending: &[Message],
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Option<HandoffDocument> {
        let budget = self.settings.budget_chars.saturating_sub(total_chars(pending));
        let mut state = CompressionState::from_thread(thread);
        let mut outcome = self.engine.compress(&thread.messages, budget, &mut state);
        if !outcome.changed && outcome.handoff.is_none() {
            return None;
        }

        if let (Some(summarizer), Some(heuristic)) = (&self.summarizer, outcome.summary.clone()) {
            if !outcome.is_terminal() {
                let refined = summarizer.refine(&thread.messages, heuristic, cancel.clone()).await;
                let mut messages = outcome.messages.clone();
                if let Some(slot) = messages.iter_mut().find(|m| is_summary_message(m)) {
                    *slot = summary_message(&refined);
                }
                let chars_after = total_chars(&messages);
                if chars_after <= budget {
                    outcome.messages = messages;
                    outcome.chars_after = chars_after;
                    state.summary = Some(refined);
                } else {
                    warn!(chars_after, budget, "LLM summary over budget, keeping heuristic summary");
                }
            }
        }

        thread.replace_messages(outcome.messages);
        state.apply_to(thread);
        let _ = event_tx.send(AgentEvent::Compressed {
            level: outcome.level,
            chars_before: outcome.chars_before,
            chars_after: outcome.chars_after,
        });
        outcome.handoff
    }

    async fn stream_response(
        &self,
        request: &ChatRequest,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Response {
        let mut stream = self.adapter.send(request, &self.credentials, cancel.clone()).await;
        let mut coalescer = ProgressCoalescer::default();
        let mut response = None;

        loop {
            let wait = coalescer.due_in(Instant::now());
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                    if let Some(text) = coalescer.flush() {
                        let _ = event_tx.send(AgentEvent::Progress { text });
                    }
                    continue;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            match event {
                StreamEvent::Text { content } => {
                    if let Some(text) = coalescer.push(&content) {
                        let _ = event_tx.send(AgentEvent::Progress { text });
                    }
                }
                StreamEvent::Reasoning { content } => {
                    let _ = event_tx.send(AgentEvent::Reasoning { text: content });
                }
                // calls are reported once the response is complete; text before them is not held back
                StreamEvent::ToolCallDelta { .. } | StreamEvent::ToolCall { .. } => {
                    if let Some(text) = coalescer.flush() {
                        let _ = event_tx.send(AgentEvent::Progress { text });
                    }
                }
                StreamEvent::Done { content, tool_calls } => {
                    response = Some(Response::Complete { content, tool_calls });
                    break;
                }
                StreamEvent::Error { error } => {
                    response = Some(Response::Failed(error));
                    break;
                }
            }
        }
        if let Some(text) = coalescer.finish() {
            let _ = event_tx.send(AgentEvent::Progress { text });
        }

        if cancel.is_cancelled() {
            return Response::Aborted;
        }
        response.unwrap_or_else(|| Response::Failed(AdapterError::parse("stream ended before completion")))
    }

    /// Approval then execution. `None` means the turn was cancelled.
    async fn run_tools(
        &self,
        thread: &mut Thread,
        mut calls: Vec<ToolCall>,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<(Vec<ToolCall>, Vec<Message>)>> {
        for call in &calls {
            let _ = event_tx.send(AgentEvent::ToolCall {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            });
        }

        for call in calls.iter_mut() {
            let Some(approval) = self.policy.requires_approval(call) else {
                continue;
            };
            call.await_approval()?;
            set_state(thread, ThreadState::AwaitingApproval, event_tx)?;
            let _ = event_tx.send(AgentEvent::ApprovalRequested {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                approval,
            });
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                decision = self.gate.decide(call, approval) => decision,
            };
            match decision {
                ApprovalDecision::Approve => debug!(tool = %call.name, "Call approved"),
                ApprovalDecision::Reject { reason } => {
                    info!(tool = %call.name, reason = %reason, "Call rejected");
                    call.reject(reason)?;
                }
            }
        }

        set_state(thread, ThreadState::Executing, event_tx)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let results = if self.parallel_eligible(&calls) {
            self.execute_parallel(&mut calls, event_tx, cancel).await?
        } else {
            self.execute_sequential(&mut calls, event_tx, cancel).await?
        };
        Ok(results.map(|messages| (calls, messages)))
    }

    /// Read-only batches with unique ids may run through the scheduler.
    fn parallel_eligible(&self, calls: &[ToolCall]) -> bool {
        if !self.settings.parallel_read_only || calls.len() < 2 {
            return false;
        }
        let ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        ids.len() == calls.len()
            && calls
                .iter()
                .all(|c| c.status == ToolCallStatus::Pending && self.policy.classify(c) == ApprovalType::None)
    }

    async fn execute_sequential(
        &self,
        calls: &mut [ToolCall],
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<Message>>> {
        let mut messages = Vec::with_capacity(calls.len());
        for call in calls.iter_mut() {
            if call.status == ToolCallStatus::Rejected {
                let text = format!("Rejected: {}", call.error.as_deref().unwrap_or("not approved"));
                messages.push(report(call, false, text, event_tx));
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if call.status == ToolCallStatus::Pending {
                call.start()?;
            }
            let result = self
                .executor
                .execute(&call.name, &call.arguments, &self.settings.workspace)
                .await;
            // a dispatched tool finishes, but its result is dropped on abort
            if cancel.is_cancelled() {
                return Ok(None);
            }
            result.apply_to(call)?;
            messages.push(report(call, result.success, result.to_model_text(), event_tx));
        }
        Ok(Some(messages))
    }

    /// Results are appended in completion order.
    async fn execute_parallel(
        &self,
        calls: &mut [ToolCall],
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<Message>>> {
        let mut plan = TaskPlan::new(ExecutionMode::Parallel);
        for call in calls.iter_mut() {
            call.start()?;
            plan.add_task(OrchestratorTask::new(&call.id, &call.name).with_tool(&call.name, call.arguments.clone()))?;
        }

        let worker = Arc::new(ToolTaskWorker::new(self.executor.clone(), self.settings.workspace.clone()));
        let scheduler = Scheduler::new(self.settings.max_concurrency, true).with_cancel_token(cancel.child_token());
        let mut runner = PlanRunner::new(scheduler, worker).with_max_retries(0);
        let reports = runner.run(&mut plan).await;
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut messages = Vec::with_capacity(reports.len());
        for task in reports {
            let Some(call) = calls.iter_mut().find(|c| c.id == task.task_id) else {
                continue;
            };
            if task.status == TaskStatus::Completed {
                let text = task.output.unwrap_or_default();
                call.succeed(text.clone())?;
                messages.push(report(call, true, text, event_tx));
            } else {
                let text = task.error.unwrap_or_else(|| format!("{} did not run", call.name));
                call.fail(text.clone(), None)?;
                messages.push(report(call, false, text, event_tx));
            }
        }
        Ok(Some(messages))
    }

    fn abort(
        &self,
        thread: &mut Thread,
        stats: &TurnStats,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
    ) -> anyhow::Result<AgentRunResult> {
        info!(thread = %thread.id, "Agent turn aborted");
        set_state(thread, ThreadState::Aborted, event_tx)?;
        Ok(stats.finish(StopReason::Aborted))
    }
}

fn set_state(
    thread: &mut Thread,
    state: ThreadState,
    event_tx: &mpsc::UnboundedSender<AgentEvent>,
) -> anyhow::Result<()> {
    if thread.state == state {
        return Ok(());
    }
    thread.transition(state)?;
    let _ = event_tx.send(AgentEvent::StateChanged { state });
    Ok(())
}

/// Emit the result event and build the tool message for `call`.
fn report(
    call: &ToolCall,
    success: bool,
    text: String,
    event_tx: &mpsc::UnboundedSender<AgentEvent>,
) -> Message {
    let _ = event_tx.send(AgentEvent::ToolResult {
        call_id: call.id.clone(),
        tool: call.name.clone(),
        success,
        content: text.clone(),
    });
    Message::tool_result(&call.id, &call.name, text)
}
