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

use futures::Stream;

use quota_types::flexbuffers_storage_encode_decode;
use quota_types::identifiers::{ResourceName, TenantId};

use crate::Result;

/// Cached number of committed units of a resource owned by a tenant.
///
/// A dirty row no longer reflects the actual number of resources and needs to be recounted
/// before it can be trusted again.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuotaUsage {
    pub in_use: u64,
    pub dirty: bool,
    /// Incremented on every write.
    pub revision: u64,
}

flexbuffers_storage_encode_decode!(QuotaUsage);

impl QuotaUsage {
    pub fn clean(in_use: u64, revision: u64) -> Self {
        Self {
            in_use,
            dirty: false,
            revision,
        }
    }
}

pub trait ReadUsageTable {
    fn get_usage(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> impl Future<Output = Result<Option<QuotaUsage>>> + Send;

    fn get_usages(
        &mut self,
        tenant_id: &TenantId,
    ) -> impl Stream<Item = Result<(ResourceName, QuotaUsage)>> + Send;
}

pub trait WriteUsageTable {
    fn put_usage(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
        usage: &QuotaUsage,
    ) -> Result<()>;

    /// Flags an existing usage row as dirty. Missing rows are left untouched since they are
    /// counted from scratch anyway.
    fn mark_dirty(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Rewrites the usage row with an incremented revision, creating a dirty row if there is none.
///
/// Under [`crate::IsolationLevel::Serializable`] this turns two transactions checking the same
/// quota into a write-write conflict, so only one of them can commit.
pub async fn touch_usage<T>(
    txn: &mut T,
    tenant_id: &TenantId,
    resource: &ResourceName,
) -> Result<QuotaUsage>
where
    T: ReadUsageTable + WriteUsageTable + Send,
{
    let mut usage = txn
        .get_usage(tenant_id, resource)
        .await?
        .unwrap_or_else(|| QuotaUsage {
            dirty: true,
            ..QuotaUsage::default()
        });
    usage.revision += 1;
    txn.put_usage(tenant_id, resource, &usage)?;
    Ok(usage)
}
