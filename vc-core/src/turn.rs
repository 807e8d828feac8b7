//! TurnHandler: builds the ACK/tool/content pipeline for one epoch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use vc_planner::{build_plan, enforce_tool_grounding_or_fallback, micro_chunk_text, MicroChunkInput};
use vc_policy::{ActionType, DialogueAction};
use vc_queue::BoundedQueue;
use vc_tool::{ToolInvoker, ToolInvokerEvent};
use vc_trace::{metrics::names, Metrics};
use vc_types::{
    CallId, DashPauseScope, MarkupMode, PlanReason, SegmentPurpose, SessionId, SpeechPlan,
    ToolCallId, ToolCallRecord, ToolOutcome,
};

/// One observable effect a [`TurnHandler`] run produces. The orchestrator
/// drains these from the handler's output queue and maps them onto outbound
/// envelopes; the handler never touches the wire itself.
#[derive(Debug, Clone)]
pub enum TurnOutput {
    /// A speech plan ready to be chunked onto the wire.
    SpeechPlan(SpeechPlan),
    /// A tool call was dispatched (or matched from prefetch).
    ToolInvocation {
        /// Correlates with the matching [`TurnOutput::ToolResult`].
        tool_call_id: ToolCallId,
        /// Tool name.
        name: String,
        /// Canonical-JSON encoded arguments.
        arguments_json: String,
    },
    /// A tool call resolved.
    ToolResult {
        /// Correlates with the originating [`TurnOutput::ToolInvocation`].
        tool_call_id: ToolCallId,
        /// Result content, or the `tool_timeout` sentinel.
        content: String,
    },
    /// The handler finished producing output for this epoch.
    Complete {
        /// The epoch this run was for.
        epoch: u64,
        /// Whether the terminal response must carry the end-call flag.
        end_call: bool,
    },
}

const ACK_PHRASES: &[&str] = &[
    "Sure thing, one moment.",
    "Got it, let me take a look.",
    "Okay, give me just a second.",
];

fn ack_phrase(turn_id: u64) -> &'static str {
    ACK_PHRASES[(turn_id as usize) % ACK_PHRASES.len()]
}

const DISCLOSURE_CLAUSE: &str =
    " This call may be recorded for quality and training purposes.";

fn plan_reason_for(action_type: ActionType) -> Option<PlanReason> {
    match action_type {
        ActionType::Ask => Some(PlanReason::Clarify),
        ActionType::Inform | ActionType::OfferSlots | ActionType::EscalateSafety => {
            Some(PlanReason::Content)
        }
        ActionType::Confirm => Some(PlanReason::Confirm),
        ActionType::Repair => Some(PlanReason::Repair),
        ActionType::Transfer | ActionType::EndCall => Some(PlanReason::Closing),
        ActionType::Noop => None,
    }
}

/// Whether `action_type` asserts a fact that should be backed by tool
/// evidence before it reaches the wire.
fn asserts_fact(action_type: ActionType) -> bool {
    matches!(
        action_type,
        ActionType::Inform | ActionType::OfferSlots | ActionType::Confirm
    )
}

fn render_action_text(action: &DialogueAction, tool_results: &[ToolCallRecord]) -> String {
    if let Some(text) = action.payload.get("text").and_then(|v| v.as_str()) {
        return text.to_string();
    }
    if let Some(rec) = tool_results.iter().find(|r| r.outcome == Some(ToolOutcome::Completed)) {
        if let Some(result) = &rec.result {
            return result.clone();
        }
    }
    match action.action_type {
        ActionType::Transfer => "One moment, I'll connect you now.".to_string(),
        ActionType::EndCall => "Thanks for calling, take care.".to_string(),
        ActionType::EscalateSafety => {
            "I want to make sure you get the right help with this.".to_string()
        }
        _ => String::new(),
    }
}

async fn push(output: &BoundedQueue<TurnOutput>, metrics: &Mutex<Metrics>, item: TurnOutput) {
    if !output.put(item, None).await {
        metrics.lock().await.inc(names::TURN_OUTPUT_DROPPED_TOTAL, 1);
    }
}

/// Builds the ACK / tool-invocation / content pipeline for one epoch,
/// publishing [`TurnOutput`]s to an output queue as it goes. Owned and
/// cancelled by the orchestrator; a handler never decides when it is
/// cancelled and performs no cleanup of its own beyond what `run` already
/// pushed before cancellation took effect.
pub struct TurnHandler {
    tool_invoker: Arc<ToolInvoker>,
    session_id: SessionId,
    call_id: CallId,
    ack_budget_ms: u64,
    markup_mode: MarkupMode,
    dash_pause_scope: DashPauseScope,
}

impl TurnHandler {
    /// Build a handler for one session. `ack_budget_ms`, `markup_mode`, and
    /// `dash_pause_scope` mirror the matching [`vc_types::SessionConfig`]
    /// fields.
    pub fn new(
        tool_invoker: Arc<ToolInvoker>,
        session_id: SessionId,
        call_id: CallId,
        ack_budget_ms: u64,
        markup_mode: MarkupMode,
        dash_pause_scope: DashPauseScope,
    ) -> Self {
        Self {
            tool_invoker,
            session_id,
            call_id,
            ack_budget_ms,
            markup_mode,
            dash_pause_scope,
        }
    }

    fn chunk(&self, text: &str, purpose: SegmentPurpose, max_expected_ms: Option<u64>) -> Vec<vc_types::SpeechSegment> {
        let mut input = MicroChunkInput::new(text, purpose);
        input.markup_mode = self.markup_mode;
        input.dash_pause_scope = self.dash_pause_scope;
        if let Some(ms) = max_expected_ms {
            input.max_expected_ms = ms;
        }
        micro_chunk_text(input)
    }

    /// Run the pipeline for `epoch`, publishing every output onto `output`
    /// and closing it when done:
    ///
    /// 1. Unless `skip_ack`, emit an ACK plan (folding in a disclosure
    ///    clause if `disclosure_included`).
    /// 2. Run `action.tool_requests` sequentially through the tool invoker.
    /// 3. Build the terminal content-class plan from the action and tool
    ///    results.
    /// 4. Enforce tool grounding, substituting the deterministic fallback on
    ///    violation.
    /// 5. Emit `Complete`, carrying the end-call flag for
    ///    [`ActionType::EndCall`].
    pub async fn run(
        &self,
        epoch: u64,
        turn_started_at_ms: u64,
        clock: &dyn vc_clock::Clock,
        action: DialogueAction,
        skip_ack: bool,
        disclosure_included: bool,
        prefetched: &[ToolCallRecord],
        metrics: &Mutex<Metrics>,
        output: &BoundedQueue<TurnOutput>,
    ) {
        let mut turn_seq: u64 = 0;
        let first_segment_emitted = AtomicBool::new(false);

        let mut next_turn_id = || {
            let id = turn_seq;
            turn_seq += 1;
            id
        };

        if !skip_ack {
            let mut text = ack_phrase(epoch).to_string();
            if disclosure_included {
                text.push_str(DISCLOSURE_CLAUSE);
            }
            let segments = self.chunk(&text, SegmentPurpose::Ack, Some(self.ack_budget_ms));
            let plan = build_plan(
                &self.session_id,
                self.call_id.as_str(),
                next_turn_id(),
                epoch,
                PlanReason::Ack,
                segments,
                disclosure_included,
                Some(&mut *metrics.lock().await),
            );
            metrics.lock().await.observe(
                names::TURN_FINAL_TO_ACK_SEGMENT_MS,
                clock.now_ms().saturating_sub(turn_started_at_ms) as i64,
            );
            if !first_segment_emitted.swap(true, Ordering::SeqCst) {
                metrics.lock().await.observe(
                    names::TURN_FINAL_TO_FIRST_SEGMENT_MS,
                    clock.now_ms().saturating_sub(turn_started_at_ms) as i64,
                );
            }
            push(output, metrics, TurnOutput::SpeechPlan(plan)).await;
        }

        let mut resolved = Vec::with_capacity(action.tool_requests.len());
        for request in action.tool_requests.clone() {
            let prefetch = prefetched
                .iter()
                .find(|r| r.canonical_key == request.canonical_key());
            let (record, events) = self.tool_invoker.invoke(epoch, request, prefetch).await;
            for event in events {
                match event {
                    ToolInvokerEvent::Invocation {
                        tool_call_id,
                        name,
                        arguments_json,
                    } => {
                        push(
                            output,
                            metrics,
                            TurnOutput::ToolInvocation {
                                tool_call_id,
                                name,
                                arguments_json,
                            },
                        )
                        .await;
                    }
                    ToolInvokerEvent::Filler {
                        tool_call_id: _,
                        index: _,
                        phrase,
                    } => {
                        let segments = self.chunk(&phrase, SegmentPurpose::Filler, None);
                        let plan = build_plan(
                            &self.session_id,
                            self.call_id.as_str(),
                            next_turn_id(),
                            epoch,
                            PlanReason::Filler,
                            segments,
                            false,
                            Some(&mut *metrics.lock().await),
                        );
                        if !first_segment_emitted.swap(true, Ordering::SeqCst) {
                            metrics.lock().await.observe(
                                names::TURN_FINAL_TO_FIRST_SEGMENT_MS,
                                clock.now_ms().saturating_sub(turn_started_at_ms) as i64,
                            );
                        }
                        push(output, metrics, TurnOutput::SpeechPlan(plan)).await;
                    }
                    ToolInvokerEvent::Result { tool_call_id, content } => {
                        if record.outcome == Some(ToolOutcome::TimedOut)
                            || record.outcome == Some(ToolOutcome::Failed)
                        {
                            metrics.lock().await.inc(names::TOOL_FAILURES_TOTAL, 1);
                        }
                        push(output, metrics, TurnOutput::ToolResult { tool_call_id, content })
                            .await;
                    }
                }
            }
            resolved.push(record);
        }

        if let Some(reason) = plan_reason_for(action.action_type) {
            let text = render_action_text(&action, &resolved);
            let completed_ids: Vec<String> = resolved
                .iter()
                .filter(|r| r.outcome == Some(ToolOutcome::Completed))
                .map(|r| r.tool_call_id.as_str().to_string())
                .collect();
            let requires_evidence =
                asserts_fact(action.action_type) && !action.tool_requests.is_empty();

            let mut input = MicroChunkInput::new(&text, segment_purpose_for(reason));
            input.markup_mode = self.markup_mode;
            input.dash_pause_scope = self.dash_pause_scope;
            input.requires_tool_evidence = requires_evidence;
            input.tool_evidence_ids = completed_ids;
            let segments = micro_chunk_text(input);

            let plan = build_plan(
                &self.session_id,
                self.call_id.as_str(),
                next_turn_id(),
                epoch,
                reason,
                segments,
                false,
                Some(&mut *metrics.lock().await),
            );
            let plan = enforce_tool_grounding_or_fallback(plan, &mut *metrics.lock().await);

            if !first_segment_emitted.swap(true, Ordering::SeqCst) {
                metrics.lock().await.observe(
                    names::TURN_FINAL_TO_FIRST_SEGMENT_MS,
                    clock.now_ms().saturating_sub(turn_started_at_ms) as i64,
                );
            }
            push(output, metrics, TurnOutput::SpeechPlan(plan)).await;
        }

        let end_call = action.action_type == ActionType::EndCall;
        push(output, metrics, TurnOutput::Complete { epoch, end_call }).await;
        output.close().await;
    }
}

fn segment_purpose_for(reason: PlanReason) -> SegmentPurpose {
    match reason {
        PlanReason::Ack => SegmentPurpose::Ack,
        PlanReason::Filler => SegmentPurpose::Filler,
        PlanReason::Content => SegmentPurpose::Content,
        PlanReason::Clarify => SegmentPurpose::Clarify,
        PlanReason::Confirm => SegmentPurpose::Confirm,
        PlanReason::Repair => SegmentPurpose::Repair,
        PlanReason::Error => SegmentPurpose::Content,
        PlanReason::Closing => SegmentPurpose::Closing,
    }
}
