//! Agent runtime: the loop controller, plan scheduling and context compression.
//!
//! [`AgentRuntime::run_turn`] takes a user message, streams the model
//! response through a protocol adapter, gates and executes tool calls, and
//! repeats until the model answers without tools. Progress is reported as a
//! stream of [`AgentEvent`]s; the committed history lives on the
//! [`quill_core::thread::Thread`].

use serde::{Deserialize, Serialize};

use quill_core::thread::{CompressionLevel, ThreadState};
use quill_core::types::ApprovalType;

pub mod approval;
pub mod coalesce;
pub mod compression;
pub mod orchestrator;
pub mod prompt;
pub mod runtime;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalPolicy, AutoApprove, RejectAll};
pub use compression::{CompressionEngine, HandoffDocument, LlmSummarizer};
pub use orchestrator::{PlanRunner, TaskOutcome, TaskReport, TaskWorker, ToolTaskWorker};
pub use runtime::{AgentRuntime, RuntimeSettings};
pub use scheduler::{Scheduler, TaskPlan, TaskStatus};

/// Events emitted while a turn or a plan runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The thread moved to a new loop state.
    StateChanged { state: ThreadState },

    /// Coalesced assistant text.
    Progress { text: String },

    /// Reasoning/thinking content (when the model sends it).
    Reasoning { text: String },

    /// The model proposed a tool call.
    ToolCall {
        call_id: String,
        tool: String,
        arguments: serde_json::Value,
    },

    /// A call is waiting on the approval gate.
    ApprovalRequested {
        call_id: String,
        tool: String,
        approval: ApprovalType,
    },

    /// A tool call has finished (or was rejected).
    ToolResult {
        call_id: String,
        tool: String,
        success: bool,
        content: String,
    },

    /// History was compressed before a model call.
    Compressed {
        level: CompressionLevel,
        chars_before: usize,
        chars_after: usize,
    },

    TaskStarted { task_id: String, title: String },

    TaskFinished {
        task_id: String,
        status: TaskStatus,
        attempts: u32,
    },

    /// The turn failed.
    Error { code: String, message: String },
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    /// `max_tool_loops` model calls were made.
    MaxIterations,
    Aborted,
    Error,
    /// The context could not be compressed enough to continue.
    Handoff,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxIterations => "max_iterations",
            Self::Aborted => "aborted",
            Self::Error => "error",
            Self::Handoff => "handoff",
        }
    }
}

/// Result of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub stop_reason: StopReason,
    /// Text of the final assistant message, when the model produced one.
    pub final_text: Option<String>,
    /// Model calls made.
    pub iterations: u32,
    pub tool_calls: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentRunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<HandoffDocument>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunError {
    /// Machine-readable code, e.g. `rate_limited`.
    pub code: String,
    pub message: String,
}
