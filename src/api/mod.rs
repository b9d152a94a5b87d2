//! REST API Server Module
//!
//! HTTP surface of the relay. Every endpoint answers with the same
//! `{code, data, error}` envelope; `code` is 0 on success and the
//! [`crate::error::ErrorCode`] of the failure otherwise.

// Shared envelope, rejection handling and server
mod generic;

mod batch;
mod bridge;
mod ledger;
mod payment;

pub use generic::{ApiServer, RelayServices};
// Re-export ApiResponse for testing
#[allow(unused_imports)]
pub use generic::ApiResponse;
