#![deny(missing_docs)]
//! The `DialoguePolicy` trait boundary: the generic interface the core
//! exposes to an external dialogue-policy rulebook, and a deterministic
//! reference implementation used in tests.
//!
//! Any persona-specific rulebook, LLM-backed planner, or safety
//! classifier is explicitly out of scope for this crate — it lives behind
//! this trait, outside the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vc_types::{SlotState, ToolRequest};

/// What the agent should do next, as decided by a [`DialoguePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Ask the caller a question.
    Ask,
    /// Inform the caller of something.
    Inform,
    /// Offer a set of available slots.
    OfferSlots,
    /// Confirm a captured value back to the caller.
    Confirm,
    /// Repair a misunderstood value.
    Repair,
    /// Transfer the call.
    Transfer,
    /// End the call.
    EndCall,
    /// Escalate to a human because a safety condition fired.
    EscalateSafety,
    /// Do nothing observable this turn.
    Noop,
}

/// A decided action: what to do, payload to render it with, and any tool
/// calls the turn handler should run to ground it before speaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueAction {
    /// What kind of action this is.
    pub action_type: ActionType,
    /// Free-form payload the speech planner turns into segments (e.g. the
    /// question text, the offered slots, the transfer number).
    pub payload: serde_json::Value,
    /// Tool calls to run before committing to a terminal plan.
    pub tool_requests: Vec<ToolRequest>,
}

impl DialogueAction {
    /// Build an action with no tool requests.
    pub fn new(action_type: ActionType, payload: serde_json::Value) -> Self {
        Self {
            action_type,
            payload,
            tool_requests: Vec::new(),
        }
    }

    /// Build a [`ActionType::Noop`] action with a null payload.
    pub fn noop() -> Self {
        Self::new(ActionType::Noop, serde_json::Value::Null)
    }
}

/// Safety classification produced by [`DialoguePolicy::evaluate_safety`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyKind {
    /// No safety condition detected.
    Ok,
    /// The caller is asserting or disputing their identity.
    Identity,
    /// The caller is describing an urgent situation.
    Urgent,
    /// The caller is describing a clinical/medical situation.
    Clinical,
}

/// Result of [`DialoguePolicy::evaluate_safety`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    /// The classified kind.
    pub kind: SafetyKind,
    /// A human-readable note the policy can fold into a CLARIFY segment.
    pub message: Option<String>,
}

impl SafetyAssessment {
    /// The default "nothing flagged" assessment.
    pub fn ok() -> Self {
        Self {
            kind: SafetyKind::Ok,
            message: None,
        }
    }
}

/// The generic interface the core exposes to an external dialogue-policy
/// rulebook. Implementations decide what the agent says; the core only
/// knows how to say it, mask tool latency while deciding, and enforce
/// tool grounding before the decision reaches the wire.
///
/// Stored as `Arc<dyn DialoguePolicy>` by the turn handler, the same way
/// the core stores every other pluggable external collaborator.
#[async_trait]
pub trait DialoguePolicy: Send + Sync {
    /// Decide the next action given current slot state, the transcript
    /// window, the latest safety assessment, whether an apology is owed
    /// from a prior barge-in, and an opaque persona profile.
    async fn decide_action(
        &self,
        state: &SlotState,
        transcript: &[String],
        safety: &SafetyAssessment,
        needs_apology: bool,
        profile: &serde_json::Value,
    ) -> DialogueAction;

    /// Classify `text` for identity/urgent/clinical safety conditions.
    async fn evaluate_safety(&self, text: &str) -> SafetyAssessment;
}

/// A minimal, fully deterministic [`DialoguePolicy`] with no external
/// dependencies: always asks a fixed clarifying question and never flags
/// a safety condition. Useful for core-level tests and as a fallback when
/// no richer policy is configured; not a substitute for a real rulebook.
#[derive(Debug, Clone, Default)]
pub struct NoopPolicy;

#[async_trait]
impl DialoguePolicy for NoopPolicy {
    async fn decide_action(
        &self,
        _state: &SlotState,
        _transcript: &[String],
        _safety: &SafetyAssessment,
        needs_apology: bool,
        _profile: &serde_json::Value,
    ) -> DialogueAction {
        let payload = serde_json::json!({
            "text": "Sorry about that — what can I help you with?",
            "needs_apology": needs_apology,
        });
        DialogueAction::new(ActionType::Ask, payload)
    }

    async fn evaluate_safety(&self, _text: &str) -> SafetyAssessment {
        SafetyAssessment::ok()
    }
}
