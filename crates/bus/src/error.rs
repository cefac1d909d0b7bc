//! Bus error types

use contracts::{DataCode, ValueKind};
use thiserror::Error;

/// Bus-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Value type does not match the one registered for the data code
    #[error("data code '{code}' carries {} values, got {}", .expected.name(), .got.name())]
    TypeMismatch {
        code: DataCode,
        expected: ValueKind,
        got: ValueKind,
    },

    /// Error from a shared contract
    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    /// Create a type mismatch error
    pub fn type_mismatch(code: DataCode, got: ValueKind) -> Self {
        Self::TypeMismatch {
            code,
            expected: code.kind(),
            got,
        }
    }
}
