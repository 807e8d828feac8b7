//! Tool invocation bookkeeping types, grounded on the platform's tool-call
//! lifecycle: a request keyed by canonical `(name, args)`, correlated with
//! the platform via a `tool_call_id`, and recorded for prefetch matching and
//! trace/replay.

use crate::id::ToolCallId;
use serde::{Deserialize, Serialize};

/// A tool call the turn handler wants executed, before it has been
/// dispatched or assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool name.
    pub name: String,
    /// Arguments, as a JSON object.
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    /// Canonical key used for prefetch matching and memoization: the tool
    /// name paired with the canonical-JSON encoding of its arguments.
    pub fn canonical_key(&self) -> String {
        format!("{}:{}", self.name, crate::canon::canonical_json(&self.arguments))
    }
}

/// How a tool call concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool returned a result before its deadline.
    Completed,
    /// The tool did not return before its absolute deadline; a deterministic
    /// `tool_timeout` result was substituted.
    TimedOut,
    /// The tool call raised an error.
    Failed,
}

/// A record of one tool invocation, kept for the lifetime of the call for
/// prefetch matching, tool-grounding checks, and trace replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Correlates this invocation with its `tool_call_invocation` and
    /// `tool_call_result` wire frames.
    pub tool_call_id: ToolCallId,
    /// The epoch this call was issued for.
    pub epoch: u64,
    /// Tool name.
    pub name: String,
    /// Arguments, as a JSON object.
    pub arguments: serde_json::Value,
    /// Canonical `(name, args)` key, precomputed at construction time.
    pub canonical_key: String,
    /// Absolute deadline (ms) by which this call must resolve.
    pub deadline_ms: u64,
    /// How many filler segments have been emitted while this call was in
    /// flight.
    pub fillers_emitted: u32,
    /// Result content, once resolved.
    pub result: Option<String>,
    /// How the call concluded, once resolved.
    pub outcome: Option<ToolOutcome>,
}

impl ToolCallRecord {
    /// Start a new, unresolved record for `request`.
    pub fn new(
        tool_call_id: ToolCallId,
        epoch: u64,
        request: ToolRequest,
        deadline_ms: u64,
    ) -> Self {
        let canonical_key = request.canonical_key();
        Self {
            tool_call_id,
            epoch,
            name: request.name,
            arguments: request.arguments,
            canonical_key,
            deadline_ms,
            fillers_emitted: 0,
            result: None,
            outcome: None,
        }
    }

    /// Whether this call has resolved (completed, timed out, or failed).
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Record a successful result.
    pub fn complete(&mut self, result: String) {
        self.result = Some(result);
        self.outcome = Some(ToolOutcome::Completed);
    }

    /// Record a deterministic timeout.
    pub fn time_out(&mut self) {
        self.result = Some("tool_timeout".to_string());
        self.outcome = Some(ToolOutcome::TimedOut);
    }

    /// Record a failure.
    pub fn fail(&mut self, message: String) {
        self.result = Some(message);
        self.outcome = Some(ToolOutcome::Failed);
    }
}
