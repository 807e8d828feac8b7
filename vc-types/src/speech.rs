//! Speech plan and segment types produced by the speech planner and
//! consumed by the turn handler and writer.

use serde::{Deserialize, Serialize};

/// Why a speech plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReason {
    /// Immediate acknowledgment at turn start.
    Ack,
    /// Latency-masking filler while a tool runs.
    Filler,
    /// Primary substantive content for the turn.
    Content,
    /// A clarifying question, including monologue check-ins.
    Clarify,
    /// Confirming a captured value back to the caller.
    Confirm,
    /// Repairing a misunderstood value.
    Repair,
    /// A deterministic fallback after a tool-grounding or policy failure.
    Error,
    /// Call-ending statement.
    Closing,
}

/// What role a single segment plays within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPurpose {
    /// See [`PlanReason::Ack`].
    Ack,
    /// See [`PlanReason::Filler`].
    Filler,
    /// See [`PlanReason::Content`].
    Content,
    /// See [`PlanReason::Clarify`].
    Clarify,
    /// See [`PlanReason::Confirm`].
    Confirm,
    /// See [`PlanReason::Repair`].
    Repair,
    /// Non-speech control marker (reserved).
    Control,
    /// See [`PlanReason::Closing`].
    Closing,
}

/// How a segment's trailing pause is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkupMode {
    /// No pause markup at all.
    RawText,
    /// `<break time="Nms"/>` SSML tags.
    Ssml,
    /// Repeated `" - "` dash-pause primitive.
    DashPause,
}

/// Where dash-pause markup is applied in [`MarkupMode::DashPause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DashPauseScope {
    /// Only inside protected spans (phone numbers, confirmation digits).
    ProtectedOnly,
    /// Inside protected spans and at segment boundaries.
    SegmentBoundary,
}

/// The kind of a protected span requiring slow, digit-by-digit rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectedSpanKind {
    /// A dollar price, e.g. `$49.99`.
    Price,
    /// A clock time, e.g. `4pm`.
    Time,
    /// A phone number.
    Phone,
    /// A generic run of digits not otherwise classified.
    Digits,
}

/// A byte-offset span within a segment's plain text requiring protected
/// rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedSpan {
    /// What kind of protected content this span is.
    pub kind: ProtectedSpanKind,
    /// Start byte offset (inclusive) into the segment's plain text.
    pub start: usize,
    /// End byte offset (exclusive) into the segment's plain text.
    pub end: usize,
}

/// One shaped, interruptible unit of speech output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    /// Stable index within its plan.
    pub index: usize,
    /// What role this segment plays.
    pub purpose: SegmentPurpose,
    /// Text with pause markup applied — what is actually sent to the
    /// platform as `content`.
    pub rendered_text: String,
    /// Unmarked plain text, used for expected-duration estimation and
    /// hashing protected-span boundaries.
    pub plain_text: String,
    /// Whether this segment may be interrupted by barge-in.
    pub interruptible: bool,
    /// Whether this segment ends at a point safe to interrupt after.
    pub safe_interrupt_point: bool,
    /// Estimated spoken duration in milliseconds.
    pub expected_ms: u64,
    /// Whether this segment asserts a factual claim that must be backed by
    /// a tool result.
    pub requires_tool_evidence: bool,
    /// IDs of tool calls grounding this segment's claim, if any.
    pub tool_evidence_ids: Vec<String>,
    /// Protected spans identified within `plain_text`.
    pub protected_spans: Vec<ProtectedSpan>,
}

impl SpeechSegment {
    /// Whether this segment contains any protected span.
    pub fn contains_protected_span(&self) -> bool {
        !self.protected_spans.is_empty()
    }

    /// Deterministic per-segment hash used in trace events, over
    /// `(epoch, turn, purpose, rendered_text)`.
    pub fn segment_hash(&self, epoch: u64, turn_id: u64) -> String {
        let blob = format!(
            "{epoch}|{turn_id}|{:?}|{}",
            self.purpose, self.rendered_text
        );
        crate::canon::sha256_hex(blob.as_bytes())
    }
}

/// An ordered sequence of [`SpeechSegment`]s produced for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechPlan {
    /// Owning session.
    pub session_id: String,
    /// Owning call.
    pub call_id: String,
    /// Monotonic turn-handler-local turn counter (distinct from `epoch`;
    /// a single epoch may produce more than one plan, e.g. ACK then
    /// CONTENT).
    pub turn_id: u64,
    /// The epoch this plan was produced for.
    pub epoch: u64,
    /// Canonical content-hash plan id.
    pub plan_id: String,
    /// The segments, in emission order.
    pub segments: Vec<SpeechSegment>,
    /// Why this plan was produced.
    pub reason: PlanReason,
    /// Whether a compliance/consent disclosure clause was folded in.
    pub disclosure_included: bool,
}

impl SpeechPlan {
    /// Compute the canonical plan id for a candidate plan body. Exposed so
    /// callers (the planner) can compute it once at construction time.
    pub fn compute_plan_id(
        session_id: &str,
        call_id: &str,
        turn_id: u64,
        epoch: u64,
        reason: PlanReason,
        disclosure_included: bool,
        segments: &[SpeechSegment],
    ) -> String {
        #[derive(Serialize)]
        struct SegKey<'a> {
            purpose: SegmentPurpose,
            rendered_text: &'a str,
            interruptible: bool,
        }
        #[derive(Serialize)]
        struct PlanKey<'a> {
            session_id: &'a str,
            call_id: &'a str,
            turn_id: u64,
            epoch: u64,
            reason: PlanReason,
            disclosure_included: bool,
            segments: Vec<SegKey<'a>>,
        }
        let key = PlanKey {
            session_id,
            call_id,
            turn_id,
            epoch,
            reason,
            disclosure_included,
            segments: segments
                .iter()
                .map(|s| SegKey {
                    purpose: s.purpose,
                    rendered_text: &s.rendered_text,
                    interruptible: s.interruptible,
                })
                .collect(),
        };
        crate::canon::hash_payload(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(index: usize, text: &str) -> SpeechSegment {
        SpeechSegment {
            index,
            purpose: SegmentPurpose::Content,
            rendered_text: text.into(),
            plain_text: text.into(),
            interruptible: true,
            safe_interrupt_point: true,
            expected_ms: 100,
            requires_tool_evidence: false,
            tool_evidence_ids: vec![],
            protected_spans: vec![],
        }
    }

    #[test]
    fn plan_id_is_deterministic() {
        let segs = vec![seg(0, "hello")];
        let a = SpeechPlan::compute_plan_id("s", "c", 1, 1, PlanReason::Content, false, &segs);
        let b = SpeechPlan::compute_plan_id("s", "c", 1, 1, PlanReason::Content, false, &segs);
        assert_eq!(a, b);
    }

    #[test]
    fn plan_id_changes_with_text() {
        let a = SpeechPlan::compute_plan_id(
            "s", "c", 1, 1, PlanReason::Content, false, &[seg(0, "hello")],
        );
        let b = SpeechPlan::compute_plan_id(
            "s", "c", 1, 1, PlanReason::Content, false, &[seg(0, "goodbye")],
        );
        assert_ne!(a, b);
    }

    #[test]
    fn contains_protected_span_reflects_spans() {
        let mut s = seg(0, "call 555-123-4567");
        assert!(!s.contains_protected_span());
        s.protected_spans.push(ProtectedSpan {
            kind: ProtectedSpanKind::Phone,
            start: 5,
            end: 17,
        });
        assert!(s.contains_protected_span());
    }
}
