//! Failure taxonomy for a single load.
//!
//! Every non-recoverable failure, regardless of where it happened, reaches the caller as one
//! terminal [`LoadError`]. Texture failures are the exception: they are recovered locally and
//! at most surface as a non-terminal warning.

use thiserror::Error;

use crate::protocol::ErrorInfo;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The background worker could not be created.
    #[error("could not start decode worker: {0}")]
    Spawn(String),
    /// The worker's channel closed before it produced `success` or `error`.
    #[error("decode worker exited without producing a result")]
    WorkerExited,
    /// The decode collaborator reported a malformed or unsupported asset.
    #[error("decode failed: {0}")]
    Decode(ErrorInfo),
    /// The serialized scene could not be turned into scene objects.
    #[error("scene build failed: {0}")]
    Build(String),
    /// One texture could not be decoded. Only ever reported as a warning.
    #[error("texture decode failed: {0}")]
    Texture(String),
    /// The load was cancelled while work was in flight. Never delivered to the caller.
    #[error("load was cancelled")]
    Cancelled,
}

impl LoadError {
    pub(crate) fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }
}

impl From<ErrorInfo> for LoadError {
    fn from(info: ErrorInfo) -> Self {
        Self::Decode(info)
    }
}
