// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::trace;

use quota_storage_api::reservation_table::ReadReservationTable;
use quota_storage_api::usage_table::{QuotaUsage, ReadUsageTable, WriteUsageTable};
use quota_storage_api::Transaction;
use quota_types::identifiers::{ResourceName, TenantId};
use quota_types::time::MillisSinceEpoch;

use crate::error::ReservationError;

/// Owner of a resource kind which knows how many units a tenant currently uses.
pub trait UsageSource: Send + Sync + 'static {
    fn count_used<'a>(&'a self, tenant_id: &'a TenantId) -> BoxFuture<'a, anyhow::Result<u64>>;
}

/// Counting capability of a resource kind.
#[derive(Clone)]
pub enum ResourceCounter {
    /// Committed units are always counted by asking the usage source.
    Countable(Arc<dyn UsageSource>),
    /// Committed units are cached in the usage table. Missing or dirty rows are recounted from
    /// the usage source and written back within the counting transaction.
    Tracked(Arc<dyn UsageSource>),
}

impl fmt::Debug for ResourceCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceCounter::Countable(_) => f.write_str("Countable"),
            ResourceCounter::Tracked(_) => f.write_str("Tracked"),
        }
    }
}

impl ResourceCounter {
    pub fn countable(source: impl UsageSource) -> Self {
        ResourceCounter::Countable(Arc::new(source))
    }

    pub fn tracked(source: impl UsageSource) -> Self {
        ResourceCounter::Tracked(Arc::new(source))
    }

    /// Counts the units of `resource` used by the tenant. With `include_reservations`, the
    /// units held by reservations which are still valid at `now` are added.
    pub async fn count<T: Transaction>(
        &self,
        txn: &mut T,
        tenant_id: &TenantId,
        resource: &ResourceName,
        include_reservations: bool,
        now: MillisSinceEpoch,
    ) -> Result<u64, ReservationError> {
        // reservations are read before the usage source is asked
        let reserved = if include_reservations {
            reserved_amount(txn, tenant_id, resource, now).await?
        } else {
            0
        };

        let used = self.count_used(txn, tenant_id, resource).await?;
        Ok(used.saturating_add(reserved))
    }

    async fn count_used<T: Transaction>(
        &self,
        txn: &mut T,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> Result<u64, ReservationError> {
        match self {
            ResourceCounter::Countable(source) => {
                count_from_source(source, tenant_id, resource).await
            }
            ResourceCounter::Tracked(source) => {
                let usage = txn.get_usage(tenant_id, resource).await?;
                if let Some(usage) = usage.as_ref().filter(|usage| !usage.dirty) {
                    return Ok(usage.in_use);
                }

                let in_use = count_from_source(source, tenant_id, resource).await?;
                let revision = usage.map_or(0, |usage| usage.revision) + 1;
                trace!(
                    quota.tenant = %tenant_id,
                    quota.resource = %resource,
                    in_use,
                    "Resynchronized usage"
                );
                txn.put_usage(tenant_id, resource, &QuotaUsage::clean(in_use, revision))?;
                Ok(in_use)
            }
        }
    }
}

async fn count_from_source(
    source: &Arc<dyn UsageSource>,
    tenant_id: &TenantId,
    resource: &ResourceName,
) -> Result<u64, ReservationError> {
    source
        .count_used(tenant_id)
        .await
        .map_err(|source| ReservationError::Counting {
            resource: resource.clone(),
            source,
        })
}

async fn reserved_amount<T: ReadReservationTable + Send>(
    txn: &mut T,
    tenant_id: &TenantId,
    resource: &ResourceName,
    now: MillisSinceEpoch,
) -> Result<u64, ReservationError> {
    let mut reserved: u64 = 0;
    let mut reservations = pin!(txn.get_reservations(tenant_id));

    while let Some(reservation) = reservations.next().await {
        let reservation = reservation?;
        if !reservation.is_expired(now) {
            reserved = reserved.saturating_add(reservation.amount(resource));
        }
    }

    Ok(reserved)
}
