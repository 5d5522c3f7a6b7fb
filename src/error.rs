//! Error taxonomy for the client core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection-level failure: refused, DNS, timeout. Triggers endpoint
    /// rotation and is absorbed by the retry machinery.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Well-formed error response from a reachable endpoint.
    #[error("endpoint returned {status}: {message}")]
    Application {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("all configured endpoints unreachable")]
    AllEndpointsUnreachable,

    /// Integrity failure on a content-addressed transfer. Never downgraded.
    #[error("checksum mismatch for {file_name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },

    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Local persistence failure. A lost pending record is a reward-loss
    /// bug, so this variant must always propagate.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Activity created while no wallet is connected. Caller-contract
    /// violation, never queued.
    #[error("activity has no wallet address")]
    MissingWallet,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether the submission backoff path should absorb this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::AllEndpointsUnreachable => true,
            ClientError::Application { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Errors that must surface to the user-facing layer immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Storage(_) | ClientError::ChecksumMismatch { .. }
        )
    }
}
