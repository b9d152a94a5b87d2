//! Error Taxonomy Module
//!
//! Every relay operation fails with a [`RelayError`]. Each variant maps onto a
//! small integer [`ErrorCode`] that the HTTP surface returns in the `code` field,
//! so clients can branch on the failure class without parsing messages.

use ethereum_types::U256;
use thiserror::Error;

use crate::storage::StoreError;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Numeric error codes returned to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    Validation = 1,
    InvalidSignature = 2,
    InsufficientBalance = 3,
    IllegalState = 4,
    UnknownId = 5,
    ChainRevert = 6,
    Expired = 7,
    SignerUnavailable = 8,
    Infrastructure = 9,
    Internal = 10,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

// ============================================================================
// RELAY ERROR
// ============================================================================

/// Failure of a relay operation.
///
/// Validation, signature, balance, state and expiry failures are raised before
/// anything is sent to a chain and never mutate a task. `ChainRevert` and
/// `Infrastructure` come from the chain side and are the only classes the
/// schedulers retry.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("cannot {action} while payment is {current}")]
    IllegalState { action: String, current: String },

    #[error("unknown id: {0}")]
    UnknownId(String),

    #[error("transaction reverted: {0}")]
    ChainRevert(String),

    #[error("authorization expired at {expiry} (now {now})")]
    Expired { expiry: u64, now: u64 },

    #[error("no signer available: {0}")]
    SignerUnavailable(String),

    #[error("infrastructure failure: {0:#}")]
    Infrastructure(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the API error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Validation(_) => ErrorCode::Validation,
            RelayError::InvalidSignature(_) => ErrorCode::InvalidSignature,
            RelayError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            RelayError::IllegalState { .. } => ErrorCode::IllegalState,
            RelayError::UnknownId(_) => ErrorCode::UnknownId,
            RelayError::ChainRevert(_) => ErrorCode::ChainRevert,
            RelayError::Expired { .. } => ErrorCode::Expired,
            RelayError::SignerUnavailable(_) => ErrorCode::SignerUnavailable,
            RelayError::Infrastructure(_) => ErrorCode::Infrastructure,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether a scheduler may retry the operation later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RelayError::ChainRevert(_)
                | RelayError::Infrastructure(_)
                | RelayError::SignerUnavailable(_)
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Validation(message.into())
    }

    pub fn illegal_state(action: impl Into<String>, current: impl ToString) -> Self {
        RelayError::IllegalState {
            action: action.into(),
            current: current.to_string(),
        }
    }
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

// ============================================================================
// GATEWAY ERROR
// ============================================================================

/// Failure talking to a contract.
///
/// `Reverted` means the node executed the call and the contract rejected it;
/// `Transport` means the node could not be reached or answered garbage.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("reverted: {0}")]
    Reverted(String),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl From<GatewayError> for RelayError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Reverted(reason) => RelayError::ChainRevert(reason),
            GatewayError::Transport(e) => RelayError::Infrastructure(e),
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RelayError::UnknownId(id),
            StoreError::StaleStatus { expected, actual, .. } => RelayError::IllegalState {
                action: format!("update from {}", expected),
                current: actual,
            },
            StoreError::Duplicate(id) => {
                RelayError::Internal(format!("payment {} already stored", id))
            }
            StoreError::Io(e) => RelayError::Infrastructure(e),
        }
    }
}
