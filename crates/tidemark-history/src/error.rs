// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the history service core.

use tidemark_persistence::StoreError;

use crate::namespace::RegistryError;

/// Result type using [`HistoryError`].
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors surfaced by the history core.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A state-machine precondition was violated (wrong scheduled event id,
    /// double start, completion of an unknown task). Returned to the caller
    /// as an internal server error; never retried.
    #[error("invalid history action: {action}")]
    InvalidHistoryAction {
        /// The state-machine operation that was attempted.
        action: &'static str,
    },

    /// An internal invariant does not hold.
    #[error("internal: {0}")]
    Internal(String),

    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The namespace registry failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl HistoryError {
    /// Whether the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            HistoryError::Store(err) => err.is_retryable(),
            HistoryError::Registry(err) => err.is_retryable(),
            HistoryError::InvalidHistoryAction { .. } | HistoryError::Internal(_) => false,
        }
    }
}
