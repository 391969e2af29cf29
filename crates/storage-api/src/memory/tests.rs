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
use std::time::Duration;

use futures::TryStreamExt;
use googletest::prelude::*;

use quota_test_util::let_assert;
use quota_types::errors::MaybeRetryableError;

use super::*;
use crate::reservation_table::{remove_reservation, reserved_amounts};
use crate::usage_table::touch_usage;

const TTL: Duration = Duration::from_secs(20);

fn tenant() -> TenantId {
    TenantId::from("tenant-a")
}

fn ports() -> ResourceName {
    ResourceName::from("ports")
}

fn deltas(amount: u64) -> BTreeMap<ResourceName, u64> {
    BTreeMap::from([(ports(), amount)])
}

#[tokio::test]
async fn writes_are_visible_inside_the_transaction_only_until_commit() {
    let mut storage = MemoryStorage::new();
    let now = MillisSinceEpoch::new(1_000);

    let mut txn = storage.transaction();
    let reservation = txn.create_reservation(&tenant(), deltas(2), now, TTL).unwrap();
    assert_that!(
        txn.get_reservation(reservation.id).await.unwrap(),
        some(eq(reservation.clone()))
    );

    let mut other = storage.transaction();
    assert_that!(other.get_reservation(reservation.id).await.unwrap(), none());
    drop(other);

    txn.commit().await.unwrap();

    let mut txn = storage.transaction();
    assert_that!(
        txn.get_reservation(reservation.id).await.unwrap(),
        some(eq(reservation))
    );
}

#[tokio::test]
async fn dropped_transaction_discards_writes() {
    let mut storage = MemoryStorage::new();

    {
        let mut txn = storage.transaction();
        txn.create_reservation(&tenant(), deltas(1), MillisSinceEpoch::new(0), TTL)
            .unwrap();
    }

    assert_eq!(storage.reservation_count(), 0);
}

#[tokio::test]
async fn delete_expired_is_scoped_to_tenant() {
    let mut storage = MemoryStorage::new();
    let other_tenant = TenantId::from("tenant-b");

    let mut txn = storage.transaction();
    let expired = txn
        .create_reservation(&tenant(), deltas(1), MillisSinceEpoch::new(0), TTL)
        .unwrap();
    let valid = txn
        .create_reservation(&tenant(), deltas(1), MillisSinceEpoch::new(15_000), TTL)
        .unwrap();
    txn.create_reservation(&other_tenant, deltas(1), MillisSinceEpoch::new(0), TTL)
        .unwrap();
    txn.commit().await.unwrap();

    // the first reservation expires exactly at 20s
    let now = MillisSinceEpoch::new(20_000);
    let mut txn = storage.transaction();
    assert_eq!(
        txn.delete_expired_reservations(Some(&tenant()), now)
            .await
            .unwrap(),
        1
    );
    txn.commit().await.unwrap();

    let mut txn = storage.transaction();
    assert_that!(txn.get_reservation(expired.id).await.unwrap(), none());
    let remaining: Vec<_> = txn.get_reservations(&tenant()).try_collect().await.unwrap();
    assert_that!(remaining, elements_are![eq(valid)]);
    assert_eq!(
        txn.get_reservations(&other_tenant)
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .len(),
        1
    );

    assert_eq!(txn.delete_expired_reservations(None, now).await.unwrap(), 1);
    txn.commit().await.unwrap();
    assert_eq!(storage.reservation_count(), 1);
}

#[tokio::test]
async fn reserved_amounts_ignore_expired_reservations() {
    let mut storage = MemoryStorage::new();

    let mut txn = storage.transaction();
    txn.create_reservation(&tenant(), deltas(3), MillisSinceEpoch::new(0), TTL)
        .unwrap();
    txn.create_reservation(&tenant(), deltas(2), MillisSinceEpoch::new(10_000), TTL)
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn = storage.transaction();
    let reserved = reserved_amounts(&mut txn, &tenant(), MillisSinceEpoch::new(19_999))
        .await
        .unwrap();
    assert_eq!(reserved.get(&ports()), Some(&5));

    let reserved = reserved_amounts(&mut txn, &tenant(), MillisSinceEpoch::new(20_000))
        .await
        .unwrap();
    assert_eq!(reserved.get(&ports()), Some(&2));
}

#[tokio::test]
async fn remove_reservation_is_idempotent_and_marks_usage_dirty() {
    let mut storage = MemoryStorage::new();

    let mut txn = storage.transaction();
    txn.put_usage(&tenant(), &ports(), &QuotaUsage::clean(3, 1))
        .unwrap();
    let reservation = txn
        .create_reservation(&tenant(), deltas(1), MillisSinceEpoch::new(0), TTL)
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn = storage.transaction();
    assert!(remove_reservation(&mut txn, reservation.id, true)
        .await
        .unwrap());
    assert!(!remove_reservation(&mut txn, reservation.id, true)
        .await
        .unwrap());
    txn.commit().await.unwrap();

    let mut txn = storage.transaction();
    let_assert!(Some(usage) = txn.get_usage(&tenant(), &ports()).await.unwrap());
    assert!(usage.dirty);
    assert_eq!(usage.in_use, 3);
}

#[tokio::test]
async fn mark_dirty_ignores_missing_rows() {
    let mut storage = MemoryStorage::new();

    let mut txn = storage.transaction();
    txn.mark_dirty(&tenant(), &ports()).await.unwrap();
    assert_that!(txn.get_usage(&tenant(), &ports()).await.unwrap(), none());
    let usages: Vec<_> = txn.get_usages(&tenant()).try_collect().await.unwrap();
    assert_that!(usages, empty());
}

#[tokio::test]
async fn serializable_transactions_conflict_on_touched_usage() {
    let mut storage = MemoryStorage::new();

    let mut first = storage.transaction_with_isolation(IsolationLevel::Serializable);
    let mut second = storage.transaction_with_isolation(IsolationLevel::Serializable);

    let usage = touch_usage(&mut first, &tenant(), &ports()).await.unwrap();
    assert!(usage.dirty);
    assert_eq!(usage.revision, 1);
    touch_usage(&mut second, &tenant(), &ports()).await.unwrap();

    first.commit().await.unwrap();
    let_assert!(Err(err) = second.commit().await);
    assert!(matches!(err, StorageError::Conflict(_)));
    assert!(err.retryable());
}

#[tokio::test]
async fn committed_transactions_do_not_conflict() {
    let mut storage = MemoryStorage::new();

    let mut first = storage.transaction();
    let mut second = storage.transaction();
    touch_usage(&mut first, &tenant(), &ports()).await.unwrap();
    touch_usage(&mut second, &tenant(), &ports()).await.unwrap();

    first.commit().await.unwrap();
    second.commit().await.unwrap();
}

#[tokio::test]
async fn injected_commit_failures_are_retryable() {
    let mut storage = MemoryStorage::new();
    storage.fail_next_commits(1);

    let mut txn = storage.transaction();
    txn.create_reservation(&tenant(), deltas(1), MillisSinceEpoch::new(0), TTL)
        .unwrap();
    let_assert!(Err(err) = txn.commit().await);
    assert!(err.retryable());
    assert_eq!(storage.reservation_count(), 0);

    let mut txn = storage.transaction();
    txn.create_reservation(&tenant(), deltas(1), MillisSinceEpoch::new(0), TTL)
        .unwrap();
    txn.commit().await.unwrap();
    assert_eq!(storage.reservation_count(), 1);
}
