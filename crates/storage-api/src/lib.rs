// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::future::Future;

use quota_types::errors::MaybeRetryableError;
pub use quota_types::storage::IsolationLevel;

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("generic storage error: {0}")]
    Generic(#[from] anyhow::Error),
    #[error("failed to convert Rust objects to/from their stored representation: {0}")]
    Conversion(anyhow::Error),
    #[error("integrity constraint is violated")]
    DataIntegrityError,
    #[error("operational error that can be caused during a graceful shutdown")]
    OperationalError,
    #[error("transaction conflict: {0}")]
    Conflict(anyhow::Error),
    #[error("transaction timed out")]
    TransactionTimeout,
}

impl MaybeRetryableError for StorageError {
    fn retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Conflict(_) | StorageError::TransactionTimeout
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub mod memory;
pub mod reservation_table;
pub mod usage_table;

pub trait Storage {
    type TransactionType<'a>: Transaction
    where
        Self: 'a;

    /// Create a transaction with read committed isolation. Concurrent transactions checking the
    /// same quota may both succeed.
    fn transaction(&mut self) -> Self::TransactionType<'_> {
        self.transaction_with_isolation(IsolationLevel::Committed)
    }

    /// Create a transaction with the given isolation level.
    fn transaction_with_isolation(
        &mut self,
        isolation: IsolationLevel,
    ) -> Self::TransactionType<'_>;
}

/// A read-write transaction against the quota tables.
///
/// Writes become visible to other transactions only after [`Transaction::commit`] succeeded.
/// Dropping a transaction without committing it discards all of its writes.
pub trait Transaction:
    reservation_table::ReadReservationTable
    + reservation_table::WriteReservationTable
    + usage_table::ReadUsageTable
    + usage_table::WriteUsageTable
    + Send
{
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}
