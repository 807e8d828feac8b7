//! Per-call session orchestration: the gate, the reader/writer pair, the
//! turn handler, the speculator, and the orchestrator that ties them
//! together.
//!
//! | module           | covers                                              |
//! |------------------|------------------------------------------------------|
//! | [`gate`]         | `(epoch, speak_gen)` pair with an edge-triggered signal |
//! | [`reader`]       | inbound frame decode and queue admission policy     |
//! | [`writer`]       | the sole outbound-frame-emitting task                |
//! | [`turn`]         | ACK/tool/content pipeline for a single epoch         |
//! | [`speculator`]   | ahead-of-time policy decision, reused on a fingerprint hit |
//! | [`orchestrator`] | the per-session actor driving both FSMs              |
//! | [`error`]        | the crate's unified error type                       |

pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod reader;
pub mod speculator;
pub mod turn;
pub mod writer;

pub use error::CoreError;
pub use gate::GateRef;
pub use orchestrator::Orchestrator;
pub use reader::{enqueue_inbound, Reader};
pub use speculator::{Speculator, SpeculativeResult};
pub use turn::{TurnHandler, TurnOutput};
pub use writer::{TransportSink, Writer};
