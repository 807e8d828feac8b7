//! Shared domain types for the voice-call orchestration workspace.
//!
//! | module      | covers                                                   |
//! |-------------|-----------------------------------------------------------|
//! | [`id`]      | typed session/call/tool-call identifiers                 |
//! | [`duration`]| stable-wire-format millisecond durations                  |
//! | [`canon`]   | canonical JSON encoding and SHA-256 hashing                |
//! | [`wire`]    | platform wire protocol (inbound/outbound frames)          |
//! | [`domain`]  | gate, envelope, inbound item, close reason                |
//! | [`slot`]    | policy-visible session state and epoch rollback            |
//! | [`speech`]  | speech plan/segment types                                 |
//! | [`tool`]    | tool request/record types                                 |
//! | [`config`]  | session-wide tunables                                      |

pub mod canon;
pub mod config;
pub mod domain;
pub mod duration;
pub mod id;
pub mod slot;
pub mod speech;
pub mod tool;
pub mod wire;

pub use config::SessionConfig;
pub use domain::{CloseReason, Envelope, Gate, InboundItem, Plane};
pub use duration::DurationMs;
pub use id::{CallId, SessionId, ToolCallId};
pub use slot::{SlotBackup, SlotState};
pub use speech::{
    DashPauseScope, MarkupMode, PlanReason, ProtectedSpan, ProtectedSpanKind, SegmentPurpose,
    SpeechPlan, SpeechSegment,
};
pub use tool::{ToolCallRecord, ToolOutcome, ToolRequest};
pub use wire::{InboundFrame, OutboundFrame, TranscriptUtterance, TurnTaking, UtteranceRole};
