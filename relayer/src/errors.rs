//! The error-kind taxonomy from the design's error handling policy, as a
//! single enum so every call site maps to a policy by matching on a variant
//! rather than by string-sniffing an underlying library error.

use thiserror::Error;
use warp::http::StatusCode;

#[derive(Debug, Error)]
pub enum RelayerError {
    /// RPC/HTTP timeouts, 5xx, socket errors. Retry with backoff; cursor not
    /// advanced while retrying.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The coordination chain rejected with a program-level error (seal
    /// already completed, attestation already processed, guard failed).
    #[error("non-retriable on-chain abort: {0}")]
    NonRetriableOnChainAbort(String),

    /// Bad input, or wrong status for the requested transition.
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// Payment transaction missing, failed, wrong destination, insufficient
    /// amount, or the payment id was already used.
    #[error("payment unverified: {0}")]
    PaymentUnverified(String),

    /// The NFT is not observable at the deposit address.
    #[error("deposit unverified: {0}")]
    DepositUnverified(String),

    /// No presigns available for signing.
    #[error("resource starvation: {0}")]
    ResourceStarvation(String),

    /// Misconfiguration at startup, corrupted keypair file.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The requested session does not exist.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The session exists but is not in the status the requested transition
    /// expects (a lost race against another caller, or a stale client).
    #[error("wrong session status: {0}")]
    WrongStatus(String),
}

impl RelayerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayerError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            RelayerError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayerError::WrongStatus(_) => StatusCode::CONFLICT,
            RelayerError::PaymentUnverified(_) => StatusCode::PAYMENT_REQUIRED,
            RelayerError::DepositUnverified(_) => StatusCode::CONFLICT,
            RelayerError::TransientNetwork(_)
            | RelayerError::NonRetriableOnChainAbort(_)
            | RelayerError::ResourceStarvation(_)
            | RelayerError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, RelayerError::TransientNetwork(_) | RelayerError::ResourceStarvation(_))
    }
}

impl From<reqwest::Error> for RelayerError {
    fn from(err: reqwest::Error) -> Self {
        RelayerError::TransientNetwork(err.to_string())
    }
}

impl From<rocksdb::Error> for RelayerError {
    fn from(err: rocksdb::Error) -> Self {
        RelayerError::Fatal(format!("store error: {err}"))
    }
}

impl From<serde_json::Error> for RelayerError {
    fn from(err: serde_json::Error) -> Self {
        RelayerError::ValidationFailure(format!("malformed json: {err}"))
    }
}

impl From<bincode::Error> for RelayerError {
    fn from(err: bincode::Error) -> Self {
        RelayerError::Fatal(format!("serialization error: {err}"))
    }
}
