// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use quota_storage_api::reservation_table::{
    remove_reservation, reserved_amounts, ReadReservationTable, WriteReservationTable,
};
use quota_storage_api::usage_table::{QuotaUsage, ReadUsageTable, WriteUsageTable};
use quota_storage_api::{Storage, Transaction};
use quota_storage_rocksdb::RocksDBStorage;
use quota_types::identifiers::{ReservationId, ResourceName};
use quota_types::time::MillisSinceEpoch;

use crate::{assert_stream_eq, deltas, tenant, TTL};

async fn tenants_do_not_share_key_space(rocksdb: &mut RocksDBStorage) {
    let mut txn = rocksdb.transaction();
    let acme = txn
        .create_reservation(
            &tenant("acme"),
            deltas(&[("ports", 1)]),
            MillisSinceEpoch::new(0),
            TTL,
        )
        .unwrap();
    let acme2 = txn
        .create_reservation(
            &tenant("acme2"),
            deltas(&[("ports", 4)]),
            MillisSinceEpoch::new(0),
            TTL,
        )
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn = rocksdb.transaction();
    assert_stream_eq(txn.get_reservations(&tenant("acme")), vec![acme.clone()]).await;
    assert_stream_eq(txn.get_reservations(&tenant("acme2")), vec![acme2.clone()]).await;
    assert_eq!(txn.get_reservation(acme2.id).await.unwrap(), Some(acme2));
}

async fn read_your_writes_and_rollback(rocksdb: &mut RocksDBStorage) {
    let reservation = {
        let mut txn = rocksdb.transaction();
        let reservation = txn
            .create_reservation(
                &tenant("rollback"),
                deltas(&[("networks", 1)]),
                MillisSinceEpoch::new(0),
                TTL,
            )
            .unwrap();
        assert_eq!(
            txn.get_reservation(reservation.id).await.unwrap(),
            Some(reservation.clone())
        );
        reservation
        // dropped without commit
    };

    let mut txn = rocksdb.transaction();
    assert_eq!(txn.get_reservation(reservation.id).await.unwrap(), None);
    assert_stream_eq(txn.get_reservations(&tenant("rollback")), vec![]).await;
}

async fn purge_expired_per_tenant_and_globally(rocksdb: &mut RocksDBStorage) {
    let mut txn = rocksdb.transaction();
    let expired = txn
        .create_reservation(
            &tenant("purge-a"),
            deltas(&[("ports", 1)]),
            MillisSinceEpoch::new(0),
            TTL,
        )
        .unwrap();
    let valid = txn
        .create_reservation(
            &tenant("purge-a"),
            deltas(&[("ports", 1)]),
            MillisSinceEpoch::new(30_000),
            TTL,
        )
        .unwrap();
    let other = txn
        .create_reservation(
            &tenant("purge-b"),
            deltas(&[("ports", 1)]),
            MillisSinceEpoch::new(0),
            TTL,
        )
        .unwrap();
    txn.commit().await.unwrap();

    let now = MillisSinceEpoch::new(20_000);
    let mut txn = rocksdb.transaction();
    assert_eq!(
        txn.delete_expired_reservations(Some(&tenant("purge-a")), now)
            .await
            .unwrap(),
        1
    );
    assert_eq!(txn.get_reservation(expired.id).await.unwrap(), None);
    assert_eq!(txn.get_reservation(other.id).await.unwrap(), Some(other.clone()));
    assert_eq!(txn.get_reservation(valid.id).await.unwrap(), Some(valid));

    // purges the remaining expired reservations of every tenant, among them `other`
    let purged = txn.delete_expired_reservations(None, now).await.unwrap();
    assert!(purged >= 1);
    assert_eq!(txn.get_reservation(other.id).await.unwrap(), None);
    txn.commit().await.unwrap();
}

async fn reserved_amounts_only_count_valid_reservations(rocksdb: &mut RocksDBStorage) {
    let mut txn = rocksdb.transaction();
    txn.create_reservation(
        &tenant("amounts"),
        deltas(&[("ports", 2), ("networks", 1)]),
        MillisSinceEpoch::new(0),
        TTL,
    )
    .unwrap();
    txn.create_reservation(
        &tenant("amounts"),
        deltas(&[("ports", 3)]),
        MillisSinceEpoch::new(10_000),
        TTL,
    )
    .unwrap();
    txn.commit().await.unwrap();

    let mut txn = rocksdb.transaction();
    let reserved = reserved_amounts(&mut txn, &tenant("amounts"), MillisSinceEpoch::new(25_000))
        .await
        .unwrap();
    assert_eq!(reserved.get(&ResourceName::from("ports")), Some(&3));
    assert_eq!(reserved.get(&ResourceName::from("networks")), None);
}

async fn removal_is_idempotent(rocksdb: &mut RocksDBStorage) {
    let tenant_id = tenant("removal");
    let ports = ResourceName::from("ports");

    let mut txn = rocksdb.transaction();
    txn.put_usage(&tenant_id, &ports, &QuotaUsage::clean(3, 1))
        .unwrap();
    let reservation = txn
        .create_reservation(
            &tenant_id,
            deltas(&[("ports", 1)]),
            MillisSinceEpoch::new(0),
            TTL,
        )
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn = rocksdb.transaction();
    assert!(remove_reservation(&mut txn, reservation.id, true).await.unwrap());
    assert!(!remove_reservation(&mut txn, reservation.id, true).await.unwrap());
    assert!(!remove_reservation(&mut txn, ReservationId::new(), false)
        .await
        .unwrap());
    txn.commit().await.unwrap();

    let mut txn = rocksdb.transaction();
    let usage = txn.get_usage(&tenant_id, &ports).await.unwrap().unwrap();
    assert!(usage.dirty);
    assert_eq!(usage.revision, 2);
}

pub(crate) async fn run_tests(mut rocksdb: RocksDBStorage) {
    tenants_do_not_share_key_space(&mut rocksdb).await;
    read_your_writes_and_rollback(&mut rocksdb).await;
    purge_expired_per_tenant_and_globally(&mut rocksdb).await;
    reserved_amounts_only_count_valid_reservations(&mut rocksdb).await;
    removal_is_idempotent(&mut rocksdb).await;
}
