// src/error.rs
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned};
use thiserror::Error;

/// JSON-RPC code for a malformed user operation.
pub const INVALID_USER_OPERATION: i32 = -32602;
/// JSON-RPC code for network, timeout, contract and internal failures.
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundlerError {
    #[error("Timeout Error: {0}")]
    LeaseTimeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid UserOperation: {0}")]
    InvalidUserOperation(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BundlerError {
    /// JSON-RPC error code surfaced for this kind of failure.
    pub fn code(&self) -> i32 {
        match self {
            BundlerError::InvalidUserOperation(_) => INVALID_USER_OPERATION,
            BundlerError::LeaseTimeout(_)
            | BundlerError::Network(_)
            | BundlerError::Submission(_)
            | BundlerError::TransactionFailed(_)
            | BundlerError::Config(_)
            | BundlerError::Internal(_) => INTERNAL_ERROR,
        }
    }
}

impl From<BundlerError> for ErrorObjectOwned {
    fn from(err: BundlerError) -> Self {
        ErrorObject::owned(err.code(), err.to_string(), None::<()>)
    }
}

/// Collapses an error chain, context included, into its first line.
pub fn summarize(err: &anyhow::Error) -> String {
    let full = format!("{err:#}");
    full.lines().next().unwrap_or_default().trim().to_string()
}
