// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::future::{self, Future};

use bytes::Bytes;
use bytestring::ByteString;
use futures::{stream, Stream};

use quota_storage_api::reservation_table::{
    ReadReservationTable, Reservation, WriteReservationTable,
};
use quota_storage_api::{Result, StorageError};
use quota_types::identifiers::{ReservationId, TenantId};
use quota_types::time::MillisSinceEpoch;

use crate::keys::{define_table_key, KeyPrefix};
use crate::{decode_value, RocksDBTransaction, TableKind, TableScanIterationDecision};

define_table_key!(
    TableKind::Reservation,
    KeyPrefix::Reservation,
    ReservationKey(tenant_id: ByteString, reservation_id: ReservationId)
);

// Maps a reservation id to the tenant owning it
define_table_key!(
    TableKind::Reservation,
    KeyPrefix::ReservationIndex,
    ReservationIndexKey(reservation_id: ReservationId)
);

fn reservation_key(tenant_id: &TenantId, reservation_id: ReservationId) -> ReservationKey {
    ReservationKey::default()
        .tenant_id(tenant_id.clone().into_inner())
        .reservation_id(reservation_id)
}

fn tenant_of(
    txn: &mut RocksDBTransaction,
    reservation_id: ReservationId,
) -> Result<Option<TenantId>> {
    txn.get_kv_raw(
        ReservationIndexKey::default().reservation_id(reservation_id),
        |_k, v| {
            v.map(|v| {
                ByteString::try_from(Bytes::copy_from_slice(v))
                    .map(TenantId::from)
                    .map_err(|err| StorageError::Conversion(err.into()))
            })
            .transpose()
        },
    )
}

fn get_reservation(
    txn: &mut RocksDBTransaction,
    reservation_id: ReservationId,
) -> Result<Option<Reservation>> {
    let Some(tenant_id) = tenant_of(txn, reservation_id)? else {
        return Ok(None);
    };
    let reservation: Option<Reservation> =
        txn.get_value(reservation_key(&tenant_id, reservation_id))?;

    // an index entry without its reservation indicates a broken write
    reservation
        .ok_or(StorageError::DataIntegrityError)
        .map(Some)
}

fn scan_reservations(
    txn: &RocksDBTransaction,
    tenant_id: Option<&TenantId>,
) -> Vec<Result<Reservation>> {
    let prefix = match tenant_id {
        Some(tenant_id) => ReservationKey::default().tenant_id(tenant_id.clone().into_inner()),
        None => ReservationKey::default(),
    };

    txn.for_each_key_value_in_place(prefix, |_k, v| {
        TableScanIterationDecision::Emit(decode_value(v))
    })
}

fn put_reservation(txn: &mut RocksDBTransaction, reservation: &Reservation) -> Result<()> {
    txn.put_kv(
        reservation_key(&reservation.tenant_id, reservation.id),
        reservation,
    )?;
    txn.put_kv_raw(
        ReservationIndexKey::default().reservation_id(reservation.id),
        reservation.tenant_id.as_bytes(),
    )
}

fn delete_reservation(
    txn: &mut RocksDBTransaction,
    reservation_id: ReservationId,
) -> Result<Option<Reservation>> {
    let reservation = get_reservation(txn, reservation_id)?;
    if let Some(reservation) = &reservation {
        delete_reservation_rows(txn, reservation)?;
    }
    Ok(reservation)
}

fn delete_reservation_rows(txn: &mut RocksDBTransaction, reservation: &Reservation) -> Result<()> {
    txn.delete_key(&reservation_key(&reservation.tenant_id, reservation.id))?;
    txn.delete_key(&ReservationIndexKey::default().reservation_id(reservation.id))
}

fn delete_expired_reservations(
    txn: &mut RocksDBTransaction,
    tenant_id: Option<&TenantId>,
    now: MillisSinceEpoch,
) -> Result<usize> {
    let mut expired = Vec::new();
    for reservation in scan_reservations(txn, tenant_id) {
        let reservation = reservation?;
        if reservation.is_expired(now) {
            expired.push(reservation);
        }
    }

    for reservation in &expired {
        delete_reservation_rows(txn, reservation)?;
    }

    Ok(expired.len())
}

impl ReadReservationTable for RocksDBTransaction<'_> {
    fn get_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send {
        future::ready(get_reservation(self, reservation_id))
    }

    fn get_reservations(
        &mut self,
        tenant_id: &TenantId,
    ) -> impl Stream<Item = Result<Reservation>> + Send {
        stream::iter(scan_reservations(self, Some(tenant_id)))
    }
}

impl WriteReservationTable for RocksDBTransaction<'_> {
    fn put_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        put_reservation(self, reservation)
    }

    fn delete_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send {
        future::ready(delete_reservation(self, reservation_id))
    }

    fn delete_expired_reservations(
        &mut self,
        tenant_id: Option<&TenantId>,
        now: MillisSinceEpoch,
    ) -> impl Future<Output = Result<usize>> + Send {
        future::ready(delete_expired_reservations(self, tenant_id, now))
    }
}
