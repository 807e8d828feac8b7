//! Speculator: a cheap off-wire policy decision computed ahead of
//! `response_required`, so its tool work can be reused instead of repeated
//! once the turn actually fires.

use std::sync::Arc;

use tokio::sync::Mutex;
use vc_policy::{DialogueAction, DialoguePolicy, SafetyAssessment};
use vc_tool::ToolInvoker;
use vc_types::{SlotState, ToolCallRecord};

/// One memoized speculative decision, keyed by the transcript fingerprint it
/// was computed from. Never reaches the wire directly; the orchestrator only
/// ever reuses it as a starting point for a real [`crate::turn::TurnHandler`]
/// run.
#[derive(Debug, Clone)]
pub struct SpeculativeResult {
    /// Fingerprint of the transcript this decision was computed from.
    pub fingerprint: String,
    /// The decided action.
    pub action: DialogueAction,
    /// Tool calls run speculatively while deciding `action`.
    pub tool_records: Vec<ToolCallRecord>,
}

/// Computes at most one speculative decision at a time, memoized in a
/// single slot. A new `speculate` call overwrites whatever was there;
/// cancelling the task that's running `speculate` (the orchestrator aborts
/// it via the `JoinHandle` it gets back from spawning it) leaves the last
/// completed result in place for potential reuse.
pub struct Speculator {
    policy: Arc<dyn DialoguePolicy>,
    tool_invoker: Arc<ToolInvoker>,
    slot: Mutex<Option<SpeculativeResult>>,
}

impl Speculator {
    /// Build a speculator. `tool_invoker` should be configured with a
    /// reduced timeout (see
    /// [`vc_types::SessionConfig::speculative_tool_timeout_ms`]) since a
    /// speculative result that isn't ready by the time `response_required`
    /// fires is simply discarded, never waited on.
    pub fn new(policy: Arc<dyn DialoguePolicy>, tool_invoker: Arc<ToolInvoker>) -> Self {
        Self {
            policy,
            tool_invoker,
            slot: Mutex::new(None),
        }
    }

    /// Deterministic fingerprint of a transcript window, used to key the
    /// memoized slot.
    pub fn fingerprint(transcript: &[String]) -> String {
        vc_types::canon::sha256_hex(transcript.join("\u{1}").as_bytes())
    }

    /// Compute a speculative decision from a shallow copy of `state`
    /// (mutations the policy makes are never written back to the live
    /// state) and store it in the memoized slot, replacing whatever was
    /// there. `epoch` is the epoch the eventual `response_required` is
    /// expected to land on; prefetched tool calls are tagged with it so
    /// they can be matched against the real turn's requests later.
    pub async fn speculate(
        &self,
        epoch: u64,
        transcript: Vec<String>,
        state: SlotState,
        safety: SafetyAssessment,
        profile: serde_json::Value,
    ) {
        let fingerprint = Self::fingerprint(&transcript);
        let action = self
            .policy
            .decide_action(&state, &transcript, &safety, false, &profile)
            .await;

        let mut tool_records = Vec::with_capacity(action.tool_requests.len());
        for request in action.tool_requests.clone() {
            let (record, _events) = self.tool_invoker.invoke(epoch, request, None).await;
            tool_records.push(record);
        }

        let result = SpeculativeResult {
            fingerprint,
            action,
            tool_records,
        };
        *self.slot.lock().await = Some(result);
    }

    /// If the memoized result's fingerprint matches `transcript`, consume
    /// and return it; otherwise leave the slot untouched and return `None`.
    /// A result is delivered at most once: a second call for the same
    /// transcript sees nothing left to take.
    pub async fn take_if_matches(&self, transcript: &[String]) -> Option<SpeculativeResult> {
        let fingerprint = Self::fingerprint(transcript);
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(r) if r.fingerprint == fingerprint => slot.take(),
            _ => None,
        }
    }

    /// Drop the memoized result unconditionally, e.g. after a barge-in
    /// invalidates it.
    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }
}
