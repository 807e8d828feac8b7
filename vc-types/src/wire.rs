//! Platform wire protocol: the JSON frames exchanged over the bidirectional
//! transport stream. Field sets mirror the platform's actual discriminated
//! unions (not a simplified summary) — see SPEC_FULL.md.

use serde::{Deserialize, Serialize};

/// One turn of recorded conversation, as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptUtterance {
    /// Who spoke.
    pub role: UtteranceRole,
    /// What was said.
    pub content: String,
}

/// Speaker role for a transcript utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceRole {
    /// The human caller.
    User,
    /// The agent.
    Agent,
}

/// Whether the most recent turn-taking signal indicates the user or the
/// agent currently holds the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnTaking {
    /// The user is (or just started) speaking.
    UserTurn,
    /// The agent is (or just started) speaking.
    AgentTurn,
}

/// Inbound frame from the platform, discriminated by `interaction_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "interaction_type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Platform keepalive echo request.
    PingPong {
        /// Opaque timestamp to echo back.
        timestamp: i64,
    },
    /// Call metadata delivered once near call start.
    CallDetails {
        /// Opaque platform-defined call metadata.
        call: serde_json::Value,
    },
    /// A transcript snapshot with no response expected yet.
    UpdateOnly {
        /// Transcript as of this update.
        transcript: Vec<TranscriptUtterance>,
        /// Optional tool-call-annotated transcript variant.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_with_tool_calls: Option<serde_json::Value>,
        /// Who currently holds the floor, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turntaking: Option<TurnTaking>,
    },
    /// The platform expects a response for this epoch.
    ResponseRequired {
        /// The epoch (turn id) this response must answer.
        response_id: u64,
        /// Transcript as of this request.
        transcript: Vec<TranscriptUtterance>,
        /// Optional tool-call-annotated transcript variant.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_with_tool_calls: Option<serde_json::Value>,
    },
    /// The platform expects an idle-reminder response for this epoch.
    ReminderRequired {
        /// The epoch (turn id) this reminder must answer.
        response_id: u64,
        /// Transcript as of this request.
        transcript: Vec<TranscriptUtterance>,
        /// Optional tool-call-annotated transcript variant.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_with_tool_calls: Option<serde_json::Value>,
    },
    /// The platform is clearing queued/spoken audio (interruption handling).
    Clear,
}

/// Outbound frame to the platform, discriminated by `response_type`.
/// Only the [`crate::domain::Writer`]-equivalent component may emit these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response_type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Initial platform configuration frame.
    Config {
        /// Opaque platform-defined configuration payload.
        config: serde_json::Value,
    },
    /// Agent-specific configuration update.
    UpdateAgent {
        /// Opaque platform-defined agent configuration payload.
        agent_config: serde_json::Value,
    },
    /// Keepalive echo response.
    PingPong {
        /// Echo of the inbound timestamp.
        timestamp: i64,
    },
    /// A (possibly partial) agent response for a given epoch.
    Response {
        /// The epoch this response belongs to.
        response_id: u64,
        /// Rendered speech content for this chunk.
        content: String,
        /// Whether this is the terminal chunk for the epoch.
        content_complete: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// Whether the platform should suppress barge-in for this chunk.
        no_interruption_allowed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// Whether the call should be ended after this chunk.
        end_call: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// Number to transfer the call to, if any.
        transfer_number: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// DTMF digit to press, if any.
        digit_to_press: Option<String>,
    },
    /// A spontaneous agent interjection (reserved; disabled by default).
    AgentInterrupt {
        /// Identifier for this interrupt stream.
        interrupt_id: u64,
        /// Rendered speech content for this chunk.
        content: String,
        /// Whether this is the terminal chunk.
        content_complete: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// Whether the platform should suppress barge-in for this chunk.
        no_interruption_allowed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// Whether the call should be ended after this chunk.
        end_call: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// Number to transfer the call to, if any.
        transfer_number: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        /// DTMF digit to press, if any.
        digit_to_press: Option<String>,
    },
    /// Announces a tool invocation is starting.
    ToolCallInvocation {
        /// Identifier correlating this invocation with its result.
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Canonical-JSON-encoded argument map.
        arguments: String,
    },
    /// Reports a tool invocation's result.
    ToolCallResult {
        /// Identifier correlating this result with its invocation.
        tool_call_id: String,
        /// Result content (or a sentinel like `tool_timeout`).
        content: String,
    },
    /// Opaque metadata frame (observability only, no gating semantics).
    Metadata {
        /// Opaque platform-defined metadata payload.
        metadata: serde_json::Value,
    },
}

/// Serialize an outbound frame as canonical JSON (sorted keys, compact
/// separators, `None` fields omitted) — the wire format trace replay
/// hashes against.
pub fn dumps_outbound(frame: &OutboundFrame) -> String {
    crate::canon::canonical_json(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_response_required_round_trip() {
        let raw = json!({
            "interaction_type": "response_required",
            "response_id": 7,
            "transcript": [{"role": "user", "content": "hi"}],
        });
        let parsed: InboundFrame = serde_json::from_value(raw).unwrap();
        match &parsed {
            InboundFrame::ResponseRequired { response_id, transcript, .. } => {
                assert_eq!(*response_id, 7);
                assert_eq!(transcript.len(), 1);
                assert_eq!(transcript[0].role, UtteranceRole::User);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn inbound_clear_has_no_fields() {
        let raw = json!({"interaction_type": "clear"});
        let parsed: InboundFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, InboundFrame::Clear);
    }

    #[test]
    fn outbound_response_omits_none_fields() {
        let frame = OutboundFrame::Response {
            response_id: 1,
            content: "hello".into(),
            content_complete: true,
            no_interruption_allowed: None,
            end_call: None,
            transfer_number: None,
            digit_to_press: None,
        };
        let encoded = dumps_outbound(&frame);
        assert!(!encoded.contains("end_call"));
        assert!(!encoded.contains("transfer_number"));
        assert!(encoded.contains("\"content_complete\":true"));
    }

    #[test]
    fn outbound_canonical_json_is_sorted_and_compact() {
        let frame = OutboundFrame::PingPong { timestamp: 42 };
        assert_eq!(
            dumps_outbound(&frame),
            r#"{"response_type":"ping_pong","timestamp":42}"#
        );
    }
}
