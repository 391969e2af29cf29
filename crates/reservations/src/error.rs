// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use quota_storage_api::StorageError;
use quota_types::errors::MaybeRetryableError;
use quota_types::identifiers::ResourceName;

/// The requested deltas do not fit into the tenant's limits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "quota exceeded for resources: {}",
    .overs.iter().map(ResourceName::as_str).collect::<Vec<_>>().join(", ")
)]
pub struct OverQuota {
    /// Resources over their limit, sorted by name.
    pub overs: Vec<ResourceName>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error(transparent)]
    OverQuota(#[from] OverQuota),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed counting the usage of '{resource}': {source}")]
    Counting {
        resource: ResourceName,
        source: anyhow::Error,
    },
    #[error("failed fetching the limits: {0}")]
    Limits(anyhow::Error),
}

impl ReservationError {
    pub fn over_quota(&self) -> Option<&OverQuota> {
        match self {
            ReservationError::OverQuota(over_quota) => Some(over_quota),
            _ => None,
        }
    }
}

impl MaybeRetryableError for ReservationError {
    fn retryable(&self) -> bool {
        match self {
            ReservationError::Storage(err) => err.retryable(),
            ReservationError::OverQuota(_)
            | ReservationError::Counting { .. }
            | ReservationError::Limits(_) => false,
        }
    }
}
