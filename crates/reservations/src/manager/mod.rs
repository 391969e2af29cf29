// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use tracing::{debug, warn};

use quota_storage_api::reservation_table::{
    remove_reservation, reserved_amounts, ReadReservationTable, Reservation,
    WriteReservationTable,
};
use quota_storage_api::usage_table::{touch_usage, WriteUsageTable};
use quota_storage_api::{IsolationLevel, Storage, Transaction};
use quota_types::config::QuotaOptions;
use quota_types::errors::MaybeRetryableError;
use quota_types::identifiers::{ReservationId, ResourceName, TenantId};
use quota_types::retries::RetryPolicy;
use quota_types::time::{Clock, WallClock};

use crate::catalog::ResourceCatalog;
use crate::error::{OverQuota, ReservationError};
use crate::limits::{LimitProvider, UNLIMITED};

/// Limit and consumption of one resource of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDetail {
    pub limit: i64,
    pub used: u64,
    pub reserved: u64,
}

/// Checks requests for additional resources against the tenant's limits and records
/// reservations for the ones that fit.
///
/// Every operation runs inside a single store transaction; no lock is held across tenants or
/// requests. Transactions failing with a retryable storage error are re-run from scratch
/// according to the configured [`RetryPolicy`].
pub struct ReservationManager<S> {
    storage: S,
    catalog: Arc<ResourceCatalog>,
    limits: Arc<dyn LimitProvider>,
    clock: Arc<dyn Clock>,
    reservation_ttl: Duration,
    retry_policy: RetryPolicy,
    isolation: IsolationLevel,
}

impl<S> ReservationManager<S>
where
    S: Storage + Clone + Send + Sync + 'static,
{
    pub fn new(
        storage: S,
        catalog: Arc<ResourceCatalog>,
        limits: Arc<dyn LimitProvider>,
        options: &QuotaOptions,
        isolation: IsolationLevel,
    ) -> Self {
        Self {
            storage,
            catalog,
            limits,
            clock: Arc::new(WallClock),
            reservation_ttl: options.reservation_ttl(),
            retry_policy: options.retry_policy.clone(),
            isolation,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Reserves `deltas` additional units for the tenant if they fit into its limits.
    ///
    /// Resources without a limit are neither checked nor recorded in the reservation.
    /// Resources without a counter in the catalog are never over their limit. Fails with
    /// [`ReservationError::OverQuota`] listing every resource over its limit; nothing is
    /// persisted in that case.
    pub async fn make_reservation(
        &self,
        tenant_id: &TenantId,
        deltas: BTreeMap<ResourceName, u64>,
    ) -> Result<Reservation, ReservationError> {
        let deltas = &deltas;
        self.run_with_retries("make reservation", move || {
            self.try_make_reservation(tenant_id, deltas)
        })
        .await
    }

    async fn try_make_reservation(
        &self,
        tenant_id: &TenantId,
        deltas: &BTreeMap<ResourceName, u64>,
    ) -> Result<Reservation, ReservationError> {
        let mut storage = self.storage.clone();
        let mut txn = storage.transaction_with_isolation(self.isolation);
        let now = self.clock.now();

        let requested: Vec<ResourceName> = deltas.keys().cloned().collect();
        let limits = self
            .limits
            .get_limits(tenant_id, &requested)
            .await
            .map_err(ReservationError::Limits)?;

        let limited: BTreeMap<ResourceName, (u64, u64)> = deltas
            .iter()
            .filter_map(|(resource, delta)| {
                let limit = limits.get(resource).copied().unwrap_or(UNLIMITED);
                u64::try_from(limit)
                    .ok()
                    .map(|limit| (resource.clone(), (*delta, limit)))
            })
            .collect();

        let purged = txn
            .delete_expired_reservations(Some(tenant_id), now)
            .await?;
        if purged > 0 {
            debug!(quota.tenant = %tenant_id, purged, "Purged expired reservations");
        }

        // iterating the sorted map keeps the reported resources sorted by name
        let mut overs = Vec::new();
        for (resource, (delta, limit)) in &limited {
            let Some(counter) = self.catalog.counter(resource) else {
                continue;
            };
            if self.isolation == IsolationLevel::Serializable {
                touch_usage(&mut txn, tenant_id, resource).await?;
            }

            let used_and_reserved = counter
                .count(&mut txn, tenant_id, resource, true, now)
                .await?;
            if *limit < used_and_reserved.saturating_add(*delta) {
                overs.push(resource.clone());
            }
        }

        if !overs.is_empty() {
            debug!(
                quota.tenant = %tenant_id,
                quota.overs = ?overs,
                "Rejected reservation"
            );
            return Err(OverQuota { overs }.into());
        }

        let deltas = limited
            .into_iter()
            .map(|(resource, (delta, _))| (resource, delta))
            .collect();
        let reservation = txn.create_reservation(tenant_id, deltas, now, self.reservation_ttl)?;
        txn.commit().await?;

        debug!(
            quota.tenant = %tenant_id,
            quota.reservation.id = %reservation.id,
            quota.reservation.expiration = %reservation.expiration,
            "Created reservation"
        );
        Ok(reservation)
    }

    /// Deletes the reservation without touching the tenant's usage. Returns whether the
    /// reservation existed; cancelling an unknown reservation succeeds.
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<bool, ReservationError> {
        let removed = self
            .run_with_retries("cancel reservation", move || {
                self.remove(reservation_id, false)
            })
            .await?;
        debug!(quota.reservation.id = %reservation_id, removed, "Cancelled reservation");
        Ok(removed)
    }

    /// Deletes the reservation after the caller created the reserved resources. The usage of
    /// the reserved resources is marked dirty so that it gets recounted. Returns whether the
    /// reservation existed.
    pub async fn commit_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<bool, ReservationError> {
        let removed = self
            .run_with_retries("commit reservation", move || {
                self.remove(reservation_id, true)
            })
            .await?;
        debug!(quota.reservation.id = %reservation_id, removed, "Committed reservation");
        Ok(removed)
    }

    async fn remove(
        &self,
        reservation_id: ReservationId,
        mark_dirty: bool,
    ) -> Result<bool, ReservationError> {
        let mut storage = self.storage.clone();
        let mut txn = storage.transaction_with_isolation(self.isolation);
        let removed = remove_reservation(&mut txn, reservation_id, mark_dirty).await?;
        txn.commit().await?;
        Ok(removed)
    }

    /// Marks the usage of the given resources as dirty, e.g. after resources were created or
    /// deleted without a reservation.
    pub async fn mark_resources_dirty(
        &self,
        tenant_id: &TenantId,
        resources: &[ResourceName],
    ) -> Result<(), ReservationError> {
        self.run_with_retries("mark resources dirty", move || async move {
            let mut storage = self.storage.clone();
            let mut txn = storage.transaction_with_isolation(self.isolation);
            for resource in resources {
                txn.mark_dirty(tenant_id, resource).await?;
            }
            txn.commit().await?;
            Ok(())
        })
        .await
    }

    /// Deletes the reservations which are expired now, optionally only those of one tenant.
    /// Returns the number of deleted reservations.
    pub async fn purge_expired(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<usize, ReservationError> {
        self.run_with_retries("purge expired reservations", move || async move {
            let now = self.clock.now();
            let mut storage = self.storage.clone();
            let mut txn = storage.transaction_with_isolation(self.isolation);
            let purged = txn.delete_expired_reservations(tenant_id, now).await?;
            txn.commit().await?;
            Ok(purged)
        })
        .await
    }

    pub async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, ReservationError> {
        let mut storage = self.storage.clone();
        let mut txn = storage.transaction();
        Ok(txn.get_reservation(reservation_id).await?)
    }

    /// All stored reservations of the tenant, including expired ones which were not purged yet.
    pub async fn reservations(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let mut storage = self.storage.clone();
        let mut txn = storage.transaction();
        Ok(txn.get_reservations(tenant_id).try_collect().await?)
    }

    /// Limit, used and reserved units of every resource in the catalog.
    pub async fn quota_details(
        &self,
        tenant_id: &TenantId,
    ) -> Result<BTreeMap<ResourceName, QuotaDetail>, ReservationError> {
        self.run_with_retries("get quota details", move || {
            self.try_quota_details(tenant_id)
        })
        .await
    }

    async fn try_quota_details(
        &self,
        tenant_id: &TenantId,
    ) -> Result<BTreeMap<ResourceName, QuotaDetail>, ReservationError> {
        let mut storage = self.storage.clone();
        let mut txn = storage.transaction_with_isolation(self.isolation);
        let now = self.clock.now();

        let resources: Vec<ResourceName> = self.catalog.resources().cloned().collect();
        let limits = self
            .limits
            .get_limits(tenant_id, &resources)
            .await
            .map_err(ReservationError::Limits)?;
        let reserved = reserved_amounts(&mut txn, tenant_id, now).await?;

        let mut details = BTreeMap::new();
        for resource in resources {
            let Some(counter) = self.catalog.counter(&resource) else {
                continue;
            };
            let used = counter
                .count(&mut txn, tenant_id, &resource, false, now)
                .await?;
            let detail = QuotaDetail {
                limit: limits.get(&resource).copied().unwrap_or(UNLIMITED),
                used,
                reserved: reserved.get(&resource).copied().unwrap_or_default(),
            };
            details.insert(resource, detail);
        }

        // persists usage rows which were resynchronized while counting
        txn.commit().await?;
        Ok(details)
    }

    async fn run_with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, ReservationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReservationError>>,
    {
        self.retry_policy
            .clone()
            .retry_if_with_inspect(
                f,
                |err: &ReservationError| err.retryable(),
                |attempt, err, pause| {
                    warn!(
                        "Failed to {operation} (attempt {attempt}), retrying in {pause:?}: {err}"
                    );
                },
            )
            .await
    }
}
