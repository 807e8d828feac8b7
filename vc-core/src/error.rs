//! Error types for the orchestrator, reader, and writer.

use thiserror::Error;
use vc_types::CloseReason;

/// Errors that terminate a session. Every variant corresponds to a
/// [`CloseReason`] the reader or writer publishes before exiting.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoreError {
    /// The transport closed, normally or abnormally.
    #[error("transport closed: {0}")]
    TransportClosed(CloseReason),

    /// The outbound or inbound queue was closed mid-operation.
    #[error("queue closed")]
    QueueClosed,

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<vc_queue::QueueClosed> for CoreError {
    fn from(_: vc_queue::QueueClosed) -> Self {
        CoreError::QueueClosed
    }
}
