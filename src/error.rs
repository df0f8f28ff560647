//! Error types for the trace and codec boundaries.
//!
//! Dispatch-path errors are terminal to a single message only; nothing in
//! here is ever allowed to take down the session loop.

use std::time::Duration;

use thiserror::Error;

/// Failure modes of a trace run. Both variants keep whatever combined
/// output the command managed to produce before failing.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The command exceeded its deadline and was killed.
    #[error("timeout={limit:?}")]
    Timeout { limit: Duration, output: String },

    /// The command exited non-zero or could not be spawned.
    #[error("reason={reason}")]
    ExecutionFailed { reason: String, output: String },
}

impl TraceError {
    /// Partial combined output captured before the failure.
    pub fn partial_output(&self) -> &str {
        match self {
            Self::Timeout { output, .. } | Self::ExecutionFailed { output, .. } => output,
        }
    }
}

/// Wire codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload was not a valid task message in either the strict or the
    /// permissive schema.
    #[error("undecodable payload: {0}")]
    Decode(serde_json::Error),

    /// Envelope could not be serialized.
    #[error("unencodable message: {0}")]
    Encode(serde_json::Error),
}
