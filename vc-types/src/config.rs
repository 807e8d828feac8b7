//! Session-wide tunables. Every configured value used across the
//! orchestrator, reader, writer, planner, and tool invoker lives here with
//! a sensible default, so the rest of the workspace never hardcodes a
//! magic number.

/// All per-session tunables, threaded into the orchestrator, reader,
/// writer, planner, and tool invoker at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Maximum UTF-8 byte length of an inbound frame before the reader
    /// closes the transport with [`crate::domain::CloseReason::FrameTooLarge`].
    pub max_inbound_frame_bytes: usize,
    /// Capacity of the bounded inbound queue.
    pub inbound_queue_capacity: usize,
    /// Capacity of the bounded outbound queue.
    pub outbound_queue_capacity: usize,
    /// Budget, in milliseconds, to emit the first ACK segment after a
    /// `response_required` frame arrives.
    pub ack_budget_ms: u64,
    /// Budget, in milliseconds, within which a barge-in cancellation must be
    /// observed to take effect before the next segment is already in flight.
    pub cancel_budget_ms: u64,
    /// Keepalive ping interval.
    pub ping_interval_ms: u64,
    /// How long the orchestrator waits with no inbound activity before
    /// treating the session as idle.
    pub idle_watchdog_ms: u64,
    /// Absolute timeout for a single tool invocation.
    pub tool_timeout_ms: u64,
    /// Absolute timeout for a tool invocation run speculatively, ahead of
    /// `response_required`. Shorter than `tool_timeout_ms` since a
    /// speculative result that isn't ready in time is simply discarded, not
    /// waited on.
    pub speculative_tool_timeout_ms: u64,
    /// Delay after which the first latency-masking filler may be emitted
    /// for an in-flight tool call.
    pub first_filler_delay_ms: u64,
    /// Delay after which a second latency-masking filler may be emitted.
    pub second_filler_delay_ms: u64,
    /// Maximum number of fillers emitted per tool call, regardless of how
    /// long it runs.
    pub max_fillers_per_tool: u32,
    /// Consecutive write timeouts the writer tolerates before closing the
    /// transport with
    /// [`crate::domain::CloseReason::WriteTimeoutBackpressure`].
    pub max_consecutive_write_timeouts: u32,
    /// Per-write timeout.
    pub write_timeout_ms: u64,
    /// How pause markup is rendered in speech plans.
    pub markup_mode: crate::speech::MarkupMode,
    /// Where dash-pause markup applies, when `markup_mode` is
    /// [`crate::speech::MarkupMode::DashPause`].
    pub dash_pause_scope: crate::speech::DashPauseScope,
    /// Maximum trace events retained in the in-memory ring buffer.
    pub trace_max_events: usize,
    /// Number of consecutive agent turns with no new user utterance before
    /// a monologue check-in segment is inserted.
    pub monologue_check_in_turns: u32,
    /// Whether a turn whose latest user utterance is empty or a bare
    /// acknowledgment fragment ("ok", "yeah", "mm-hm") is answered with only
    /// an empty terminal response instead of starting a full turn.
    pub low_signal_turn_suppression: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_inbound_frame_bytes: 64 * 1024,
            inbound_queue_capacity: 64,
            outbound_queue_capacity: 256,
            ack_budget_ms: 300,
            cancel_budget_ms: 250,
            ping_interval_ms: 5_000,
            idle_watchdog_ms: 30_000,
            tool_timeout_ms: 8_000,
            speculative_tool_timeout_ms: 1_500,
            first_filler_delay_ms: 1_200,
            second_filler_delay_ms: 3_500,
            max_fillers_per_tool: 2,
            max_consecutive_write_timeouts: 3,
            write_timeout_ms: 2_000,
            markup_mode: crate::speech::MarkupMode::DashPause,
            dash_pause_scope: crate::speech::DashPauseScope::ProtectedOnly,
            trace_max_events: 2_048,
            monologue_check_in_turns: 3,
            low_signal_turn_suppression: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.ack_budget_ms, 300);
        assert_eq!(cfg.cancel_budget_ms, 250);
        assert_eq!(cfg.max_fillers_per_tool, 2);
    }
}
