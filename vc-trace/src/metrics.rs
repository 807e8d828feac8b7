//! Named counters, histograms, and gauges tracking the behavioral invariants
//! a voice agent is judged on: latency, turn-taking quality, tool grounding,
//! and replay stability. Plain synchronous data, wrapped by callers that
//! need sharing (the orchestrator holds it behind an `Arc<Mutex<..>>>`
//! alongside the rest of its session state).

use std::collections::HashMap;

/// Names of the metrics this workspace emits, matching the platform's VIC
/// (voice-interaction-compliance) dashboard keys.
pub mod names {
    /// Milliseconds from `response_required` to the first emitted segment.
    pub const TURN_FINAL_TO_FIRST_SEGMENT_MS: &str = "vic.turn_final_to_first_segment_ms";
    /// Milliseconds from `response_required` to the ACK segment.
    pub const TURN_FINAL_TO_ACK_SEGMENT_MS: &str = "vic.turn_final_to_ack_segment_ms";
    /// Milliseconds from tool dispatch to the first filler segment.
    pub const TOOL_CALL_TO_FIRST_FILLER_MS: &str = "vic.tool_call_to_first_filler_ms";
    /// Milliseconds a tool call took end to end.
    pub const TOOL_CALL_TOTAL_MS: &str = "vic.tool_call_total_ms";
    /// Estimated spoken duration of an emitted segment.
    pub const SEGMENT_EXPECTED_DURATION_MS: &str = "vic.segment_expected_duration_ms";
    /// Number of segments emitted for a single turn.
    pub const SEGMENT_COUNT_PER_TURN: &str = "vic.segment_count_per_turn";
    /// Milliseconds from barge-in detection to cancellation taking effect.
    pub const BARGE_IN_CANCEL_LATENCY_MS: &str = "vic.barge_in_cancel_latency_ms";
    /// Segments dropped because their gate no longer matched at send time.
    pub const STALE_SEGMENT_DROPPED_TOTAL: &str = "vic.stale_segment_dropped_total";
    /// Segments asserting a fact with no backing tool evidence.
    pub const FACTUAL_SEGMENT_WITHOUT_TOOL_EVIDENCE_TOTAL: &str =
        "vic.factual_segment_without_tool_evidence_total";
    /// Tool calls that resolved as failures or timeouts.
    pub const TOOL_FAILURES_TOTAL: &str = "vic.tool_failures_total";
    /// Deterministic fallback plans used in place of a tool-grounded one.
    pub const FALLBACK_USED_TOTAL: &str = "vic.fallback_used_total";
    /// Replays whose digest did not match the recorded run.
    pub const REPLAY_HASH_MISMATCH_TOTAL: &str = "vic.replay_hash_mismatch_total";
    /// Milliseconds a ping sat queued before being written.
    pub const KEEPALIVE_PING_PONG_QUEUE_DELAY_MS: &str = "keepalive.ping_pong_queue_delay_ms";
    /// Inbound items evicted to make room under backpressure.
    pub const INBOUND_QUEUE_EVICTIONS_TOTAL: &str = "inbound.queue_evictions_total";
    /// Inbound items dropped outright because no eviction policy applied
    /// and the queue was full.
    pub const INBOUND_ITEM_DROPPED_TOTAL: &str = "inbound.item_dropped_total";
    /// Inbound frames that parsed as JSON but failed schema validation.
    pub const BAD_SCHEMA_DROPPED_TOTAL: &str = "inbound.bad_schema_dropped_total";
    /// Writes that exceeded the per-write timeout.
    pub const WS_WRITE_TIMEOUT_TOTAL: &str = "ws.write_timeout_total";
    /// Outbound envelopes dropped because their gate no longer matched.
    pub const OUTBOUND_STALE_DROPPED_TOTAL: &str = "outbound.stale_dropped_total";
    /// Outbound envelopes evicted to make room under backpressure.
    pub const OUTBOUND_QUEUE_EVICTIONS_TOTAL: &str = "outbound.queue_evictions_total";
    /// Turn-handler outputs dropped because the output queue was full or
    /// closed (e.g. after cancellation).
    pub const TURN_OUTPUT_DROPPED_TOTAL: &str = "turn.output_dropped_total";
    /// A speculative result's transcript fingerprint matched the turn that
    /// ultimately fired, so its tool work was reused instead of repeated.
    pub const SPECULATIVE_HIT_TOTAL: &str = "speculative.hit_total";
    /// A speculative result existed but its fingerprint did not match (or
    /// none had finished in time), so it was discarded.
    pub const SPECULATIVE_MISS_TOTAL: &str = "speculative.miss_total";
}

/// In-memory counters, histograms, and gauges for one session.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    counters: HashMap<String, i64>,
    histograms: HashMap<String, Vec<i64>>,
    gauges: HashMap<String, i64>,
}

impl Metrics {
    /// Construct an empty metrics set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a named counter by `value`.
    pub fn inc(&mut self, name: &str, value: i64) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Record an observation in a named histogram.
    pub fn observe(&mut self, name: &str, value: i64) {
        self.histograms.entry(name.to_string()).or_default().push(value);
    }

    /// Set a named gauge to `value`.
    pub fn set(&mut self, name: &str, value: i64) {
        self.gauges.insert(name.to_string(), value);
    }

    /// Current value of a counter, or zero if never incremented.
    pub fn get(&self, name: &str) -> i64 {
        *self.counters.get(name).unwrap_or(&0)
    }

    /// All observations recorded for a histogram, in insertion order.
    pub fn get_hist(&self, name: &str) -> Vec<i64> {
        self.histograms.get(name).cloned().unwrap_or_default()
    }

    /// Current value of a gauge, or zero if never set.
    pub fn get_gauge(&self, name: &str) -> i64 {
        *self.gauges.get(name).unwrap_or(&0)
    }

    /// The `p`th percentile (0-100) of a histogram's recorded values, or
    /// `None` if nothing has been observed.
    pub fn percentile(&self, name: &str, p: f64) -> Option<i64> {
        let mut values = self.histograms.get(name)?.clone();
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        if p <= 0.0 {
            return Some(values[0]);
        }
        if p >= 100.0 {
            return Some(*values.last().unwrap());
        }
        let k = ((p / 100.0) * (values.len() - 1) as f64).round() as usize;
        Some(values[k])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut m = Metrics::new();
        m.inc(names::TOOL_FAILURES_TOTAL, 1);
        m.inc(names::TOOL_FAILURES_TOTAL, 2);
        assert_eq!(m.get(names::TOOL_FAILURES_TOTAL), 3);
    }

    #[test]
    fn percentile_extremes_match_sorted_bounds() {
        let mut m = Metrics::new();
        for v in [5, 1, 3, 2, 4] {
            m.observe("x", v);
        }
        assert_eq!(m.percentile("x", 0.0), Some(1));
        assert_eq!(m.percentile("x", 100.0), Some(5));
    }

    #[test]
    fn percentile_on_empty_histogram_is_none() {
        let m = Metrics::new();
        assert_eq!(m.percentile("nothing", 50.0), None);
    }
}
