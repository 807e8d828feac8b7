//! Core domain types shared across components: the gate value, outbound
//! envelopes, inbound items, and transport close reasons.

use crate::wire::{InboundFrame, OutboundFrame};
use serde::{Deserialize, Serialize};

/// `(epoch, speak_gen)` snapshot. Any queued outbound envelope carrying a
/// gate pair that does not match the live gate at send time is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gate {
    /// Current turn id.
    pub epoch: u64,
    /// Generation within the epoch, bumped on every barge-in cancel.
    pub speak_gen: u64,
    /// Monotonic counter bumped on every mutation, used only to detect
    /// "has anything changed since I last looked" without comparing the
    /// other two fields.
    pub version: u64,
}

impl Gate {
    /// Whether an envelope's gate pair matches this gate. `None` fields
    /// (control-plane envelopes that don't carry gate info) always match.
    pub fn matches(&self, epoch: Option<u64>, speak_gen: Option<u64>) -> bool {
        let epoch_ok = epoch.is_none_or(|e| e == self.epoch);
        let gen_ok = speak_gen.is_none_or(|g| g == self.speak_gen);
        epoch_ok && gen_ok
    }
}

/// Which plane an outbound envelope belongs to. Control preempts speech but
/// never evicts it past terminal response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    /// Config, update-agent, ping — platform-housekeeping frames.
    Control,
    /// Response chunks and tool-weaving frames.
    Speech,
}

/// Default outbound priorities (higher sends first).
pub mod priority {
    /// Platform config frame.
    pub const CONFIG: i32 = 100;
    /// Agent-config update frame.
    pub const UPDATE_AGENT: i32 = 90;
    /// Keepalive ping.
    pub const PING: i32 = 80;
    /// Tool invocation/result frames interleaved with speech.
    pub const TOOL_WEAVING: i32 = 70;
    /// Reserved spontaneous agent interjection.
    pub const AGENT_INTERRUPT: i32 = 60;
    /// Non-terminal response chunk.
    pub const RESPONSE_NON_TERMINAL: i32 = 50;
    /// Terminal response chunk (`content_complete = true`).
    pub const RESPONSE_TERMINAL: i32 = 100;
    /// Metadata frame.
    pub const METADATA: i32 = 10;
}

/// Internal wrapper around an outbound message carrying gating, priority,
/// plane, and deadline metadata. Only `msg` is ever serialized to the wire.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The frame to send.
    pub msg: OutboundFrame,
    /// Gate epoch this envelope was produced for, if gate-checked.
    pub epoch: Option<u64>,
    /// Gate speak_gen this envelope was produced for, if gate-checked.
    pub speak_gen: Option<u64>,
    /// Send priority; higher values are preferred by [`Plane::Control`]
    /// preemption and by eviction on a full queue.
    pub priority: i32,
    /// Which plane this envelope belongs to.
    pub plane: Plane,
    /// Logical time (ms) this envelope was enqueued.
    pub enqueued_at_ms: u64,
    /// Optional absolute deadline (ms) for sending this envelope.
    pub deadline_ms: Option<u64>,
}

impl Envelope {
    /// Whether this envelope is a terminal response frame
    /// (`content_complete = true`), which must never be evicted.
    pub fn is_terminal_response(&self) -> bool {
        matches!(
            &self.msg,
            OutboundFrame::Response { content_complete: true, .. }
        )
    }

    /// Whether this envelope belongs to the control plane.
    pub fn is_control(&self) -> bool {
        self.plane == Plane::Control
    }

    /// The `response_id` carried by this envelope, if it is a response or
    /// agent-interrupt frame.
    pub fn response_id(&self) -> Option<u64> {
        match &self.msg {
            OutboundFrame::Response { response_id, .. } => Some(*response_id),
            _ => None,
        }
    }
}

/// Why the transport/session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// An inbound frame exceeded the configured UTF-8 byte limit.
    FrameTooLarge,
    /// An inbound frame failed to JSON-decode.
    BadJson,
    /// The writer hit `N` consecutive write timeouts.
    WriteTimeoutBackpressure,
    /// The underlying transport read failed.
    TransportReadError,
    /// The remote end closed the connection normally.
    RemoteClosed,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::FrameTooLarge => "FRAME_TOO_LARGE",
            CloseReason::BadJson => "BAD_JSON",
            CloseReason::WriteTimeoutBackpressure => "WRITE_TIMEOUT_BACKPRESSURE",
            CloseReason::TransportReadError => "transport_read_error",
            CloseReason::RemoteClosed => "remote_closed",
        };
        write!(f, "{s}")
    }
}

/// An inbound item as dispatched internally, after the Reader has parsed
/// and schema-validated a wire frame (or detected a fatal transport error).
#[derive(Debug, Clone, PartialEq)]
pub enum InboundItem {
    /// Keepalive echo request.
    Ping {
        /// Echoed timestamp.
        timestamp: i64,
    },
    /// Call metadata.
    CallDetails {
        /// Opaque call metadata.
        call: serde_json::Value,
    },
    /// Transcript snapshot with no response expected yet.
    TranscriptUpdate {
        /// Transcript as of this update.
        transcript: Vec<crate::wire::TranscriptUtterance>,
        /// Who currently holds the floor, if known.
        turntaking: Option<crate::wire::TurnTaking>,
    },
    /// A response is required for this epoch.
    ResponseRequired {
        /// Epoch (turn id).
        response_id: u64,
        /// Transcript as of this request.
        transcript: Vec<crate::wire::TranscriptUtterance>,
    },
    /// A reminder response is required for this epoch.
    ReminderRequired {
        /// Epoch (turn id).
        response_id: u64,
        /// Transcript as of this request.
        transcript: Vec<crate::wire::TranscriptUtterance>,
    },
    /// Clear queued/spoken audio (interruption handling).
    Clear,
    /// The transport closed; the session must tear down.
    TransportClosed(CloseReason),
}

impl InboundItem {
    /// Whether this item short-circuits ahead of `transcript_update` in the
    /// orchestrator's predicate-preferred dequeue.
    pub fn is_control_inbound(&self) -> bool {
        matches!(
            self,
            InboundItem::Clear
                | InboundItem::ResponseRequired { .. }
                | InboundItem::ReminderRequired { .. }
                | InboundItem::TransportClosed(_)
        )
    }

    /// Convert a parsed wire frame into an internal inbound item.
    /// Returns `None` for frames the core does not turn into a queued item
    /// on their own (there are none today, but this keeps the mapping
    /// total and explicit for future frame types).
    pub fn from_wire(frame: InboundFrame) -> Option<Self> {
        Some(match frame {
            InboundFrame::PingPong { timestamp } => InboundItem::Ping { timestamp },
            InboundFrame::CallDetails { call } => InboundItem::CallDetails { call },
            InboundFrame::UpdateOnly {
                transcript,
                turntaking,
                ..
            } => InboundItem::TranscriptUpdate {
                transcript,
                turntaking,
            },
            InboundFrame::ResponseRequired {
                response_id,
                transcript,
                ..
            } => InboundItem::ResponseRequired {
                response_id,
                transcript,
            },
            InboundFrame::ReminderRequired {
                response_id,
                transcript,
                ..
            } => InboundItem::ReminderRequired {
                response_id,
                transcript,
            },
            InboundFrame::Clear => InboundItem::Clear,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_matches_none_fields_unconditionally() {
        let gate = Gate { epoch: 3, speak_gen: 1, version: 9 };
        assert!(gate.matches(None, None));
        assert!(gate.matches(Some(3), Some(1)));
        assert!(!gate.matches(Some(2), Some(1)));
        assert!(!gate.matches(Some(3), Some(0)));
    }

    #[test]
    fn control_inbound_items_classified() {
        assert!(InboundItem::Clear.is_control_inbound());
        assert!(InboundItem::ResponseRequired { response_id: 1, transcript: vec![] }
            .is_control_inbound());
        assert!(!InboundItem::TranscriptUpdate { transcript: vec![], turntaking: None }
            .is_control_inbound());
    }

    #[test]
    fn envelope_terminal_response_detection() {
        let env = Envelope {
            msg: OutboundFrame::Response {
                response_id: 1,
                content: String::new(),
                content_complete: true,
                no_interruption_allowed: None,
                end_call: None,
                transfer_number: None,
                digit_to_press: None,
            },
            epoch: Some(1),
            speak_gen: Some(0),
            priority: priority::RESPONSE_TERMINAL,
            plane: Plane::Speech,
            enqueued_at_ms: 0,
            deadline_ms: None,
        };
        assert!(env.is_terminal_response());
    }
}
