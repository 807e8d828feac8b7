//! Error types for tool dispatch.

use thiserror::Error;

/// Errors raised while looking up or executing a tool.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool name has no registered executor.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran but returned a failure.
    #[error("tool {name} failed: {message}")]
    Failed {
        /// Name of the tool that failed.
        name: String,
        /// Failure detail.
        message: String,
    },

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
