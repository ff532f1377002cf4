//! Error types for the FleetWatch environment abstraction.

use thiserror::Error;

/// Errors that can occur when talking to the vehicle store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store refused the write (rules, quota, injected fault)
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// The store could not be reached or the subscription is closed
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a rejected-write error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::WriteRejected(msg.into())
    }

    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
