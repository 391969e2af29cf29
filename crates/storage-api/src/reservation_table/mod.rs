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
use std::pin::pin;
use std::time::Duration;

use futures::{Stream, StreamExt};

use quota_types::flexbuffers_storage_encode_decode;
use quota_types::identifiers::{ReservationId, ResourceName, TenantId};
use quota_types::time::MillisSinceEpoch;

use crate::usage_table::WriteUsageTable;
use crate::Result;

/// A time bounded claim on resources of a tenant which have not been created yet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    /// Reserved amount per resource. Only contains resources with a finite limit.
    pub deltas: BTreeMap<ResourceName, u64>,
    pub created_at: MillisSinceEpoch,
    pub expiration: MillisSinceEpoch,
}

flexbuffers_storage_encode_decode!(Reservation);

impl Reservation {
    pub fn new(
        id: ReservationId,
        tenant_id: TenantId,
        deltas: BTreeMap<ResourceName, u64>,
        created_at: MillisSinceEpoch,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            tenant_id,
            deltas,
            created_at,
            expiration: created_at + ttl,
        }
    }

    /// A reservation expires at its expiration instant.
    pub fn is_expired(&self, now: MillisSinceEpoch) -> bool {
        self.expiration <= now
    }

    pub fn amount(&self, resource: &ResourceName) -> u64 {
        self.deltas.get(resource).copied().unwrap_or_default()
    }
}

pub trait ReadReservationTable {
    fn get_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send;

    /// All reservations of the tenant, including expired ones which have not been purged yet.
    fn get_reservations(
        &mut self,
        tenant_id: &TenantId,
    ) -> impl Stream<Item = Result<Reservation>> + Send;
}

pub trait WriteReservationTable {
    fn put_reservation(&mut self, reservation: &Reservation) -> Result<()>;

    /// Deletes the reservation and returns it. Deleting an unknown reservation returns `None`.
    fn delete_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send;

    /// Deletes all reservations which are expired at `now`, optionally only those of a single
    /// tenant. Returns the number of deleted reservations.
    fn delete_expired_reservations(
        &mut self,
        tenant_id: Option<&TenantId>,
        now: MillisSinceEpoch,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Stores a new reservation with a freshly generated id that expires `ttl` after `now`.
    fn create_reservation(
        &mut self,
        tenant_id: &TenantId,
        deltas: BTreeMap<ResourceName, u64>,
        now: MillisSinceEpoch,
        ttl: Duration,
    ) -> Result<Reservation> {
        let reservation =
            Reservation::new(ReservationId::new(), tenant_id.clone(), deltas, now, ttl);
        self.put_reservation(&reservation)?;
        Ok(reservation)
    }
}

/// Removes a reservation. With `mark_dirty`, the usage rows of all reserved resources are
/// flagged so that they get resynchronized on their next use. Returns whether a reservation was
/// removed.
pub async fn remove_reservation<T>(
    txn: &mut T,
    reservation_id: ReservationId,
    mark_dirty: bool,
) -> Result<bool>
where
    T: WriteReservationTable + WriteUsageTable + Send,
{
    let Some(reservation) = txn.delete_reservation(reservation_id).await? else {
        return Ok(false);
    };

    if mark_dirty {
        for resource in reservation.deltas.keys() {
            txn.mark_dirty(&reservation.tenant_id, resource).await?;
        }
    }

    Ok(true)
}

/// Sums up the amounts held by the tenant's reservations which are still valid at `now`.
pub async fn reserved_amounts<T>(
    txn: &mut T,
    tenant_id: &TenantId,
    now: MillisSinceEpoch,
) -> Result<BTreeMap<ResourceName, u64>>
where
    T: ReadReservationTable + Send,
{
    let mut reserved: BTreeMap<ResourceName, u64> = BTreeMap::new();
    let mut reservations = pin!(txn.get_reservations(tenant_id));

    while let Some(reservation) = reservations.next().await {
        let reservation = reservation?;
        if reservation.is_expired(now) {
            continue;
        }
        for (resource, amount) in reservation.deltas {
            let total = reserved.entry(resource).or_default();
            *total = total.saturating_add(amount);
        }
    }

    Ok(reserved)
}
