//! Error types for the operator dispatcher
//!
//! Infrastructure layers (`ChainError`, `CacheError`) roll up into `OperatorError`.
//! Only `ClassifiedError` crosses the dispatch boundary.

use axum::http::StatusCode;
use ethers::types::Bytes;
use thiserror::Error;

/// Failures reported by the chain gateway or the signing collaborator
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Execution reverted: {message}")]
    Reverted { message: String, data: Bytes },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("All providers failed for chain {chain_id}")]
    Unavailable { chain_id: u64 },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },
}

impl ChainError {
    /// Raw revert payload, if the node returned one
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            ChainError::Reverted { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Failures of the shared sequence cache
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed cache value for {key}: {value}")]
    Malformed { key: String, value: String },
}

/// Main error type for operator infrastructure
#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OperatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::Chain(ChainError::Transport(_))
                | OperatorError::Chain(ChainError::Timeout { .. })
                | OperatorError::Chain(ChainError::Unavailable { .. })
                | OperatorError::Cache(CacheError::Redis(_))
        )
    }
}

/// Result type for operator infrastructure
pub type OperatorResult<T> = Result<T, OperatorError>;

/// Classes of failure visible to dispatch callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Gas estimation reverted before any nonce was reserved
    SimulationRejected,
    /// Broadcast lost a race for its nonce; resubmitting is safe
    NonceRace,
    /// Broadcast was rejected with a decodable contract revert
    ContractRevert,
    /// Nothing structured could be recovered
    OpaqueFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SimulationRejected => "simulation_rejected",
            ErrorKind::NonceRace => "nonce_race",
            ErrorKind::ContractRevert => "contract_revert",
            ErrorKind::OpaqueFailure => "opaque_failure",
        }
    }
}

/// The only error shape surfaced past `TransactionDispatcher::dispatch`
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub retryable: bool,
    pub message: String,
    /// Decoded custom error name, when one was recovered
    pub error_name: Option<String>,
    #[source]
    cause: Option<OperatorError>,
}

impl ClassifiedError {
    pub(crate) fn new(
        kind: ErrorKind,
        status: StatusCode,
        message: impl Into<String>,
        error_name: Option<String>,
        cause: Option<OperatorError>,
    ) -> Self {
        Self {
            kind,
            status,
            retryable: kind == ErrorKind::NonceRace,
            message: message.into(),
            error_name,
            cause,
        }
    }

    /// Broadcast raced another submission for the same or a lower nonce
    pub fn nonce_race(cause: ChainError) -> Self {
        Self::new(
            ErrorKind::NonceRace,
            StatusCode::CONFLICT,
            cause.to_string(),
            None,
            Some(cause.into()),
        )
    }

    /// Unstructured failure; the cause is kept for logs only
    pub fn opaque(message: impl Into<String>, cause: Option<OperatorError>) -> Self {
        Self::new(
            ErrorKind::OpaqueFailure,
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            None,
            cause,
        )
    }

    /// Underlying infrastructure failure, not meant for callers
    pub fn cause(&self) -> Option<&OperatorError> {
        self.cause.as_ref()
    }
}

impl From<OperatorError> for ClassifiedError {
    fn from(err: OperatorError) -> Self {
        ClassifiedError::opaque(err.to_string(), Some(err))
    }
}
