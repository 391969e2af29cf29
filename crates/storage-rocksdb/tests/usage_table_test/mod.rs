// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use quota_storage_api::usage_table::{touch_usage, QuotaUsage, ReadUsageTable, WriteUsageTable};
use quota_storage_api::{IsolationLevel, Storage, StorageError, Transaction};
use quota_storage_rocksdb::RocksDBStorage;
use quota_test_util::let_assert;
use quota_types::errors::MaybeRetryableError;
use quota_types::identifiers::ResourceName;

use crate::{assert_stream_eq, tenant};

async fn usages_are_listed_per_tenant(rocksdb: &mut RocksDBStorage) {
    let ports = ResourceName::from("ports");
    let networks = ResourceName::from("networks");

    let mut txn = rocksdb.transaction();
    txn.put_usage(&tenant("usage"), &ports, &QuotaUsage::clean(4, 1))
        .unwrap();
    txn.put_usage(&tenant("usage"), &networks, &QuotaUsage::clean(1, 1))
        .unwrap();
    txn.put_usage(&tenant("usage-other"), &ports, &QuotaUsage::clean(9, 1))
        .unwrap();
    txn.commit().await.unwrap();

    let mut txn = rocksdb.transaction();
    assert_stream_eq(
        txn.get_usages(&tenant("usage")),
        // length delimited keys order shorter names first
        vec![
            (ports.clone(), QuotaUsage::clean(4, 1)),
            (networks.clone(), QuotaUsage::clean(1, 1)),
        ],
    )
    .await;

    txn.mark_dirty(&tenant("usage"), &ports).await.unwrap();
    // missing rows stay missing
    txn.mark_dirty(&tenant("usage"), &ResourceName::from("subnets"))
        .await
        .unwrap();
    assert_eq!(
        txn.get_usage(&tenant("usage"), &ResourceName::from("subnets"))
            .await
            .unwrap(),
        None
    );
    let usage = txn
        .get_usage(&tenant("usage"), &ports)
        .await
        .unwrap()
        .unwrap();
    assert!(usage.dirty);
    assert_eq!(usage.in_use, 4);
}

async fn serializable_transactions_conflict(rocksdb: &mut RocksDBStorage) {
    let ports = ResourceName::from("ports");
    let mut other = rocksdb.clone();

    let mut first = rocksdb.transaction_with_isolation(IsolationLevel::Serializable);
    let mut second = other.transaction_with_isolation(IsolationLevel::Serializable);

    touch_usage(&mut first, &tenant("conflict"), &ports)
        .await
        .unwrap();
    touch_usage(&mut second, &tenant("conflict"), &ports)
        .await
        .unwrap();

    first.commit().await.unwrap();
    let_assert!(Err(err) = second.commit().await);
    assert!(matches!(err, StorageError::Conflict(_)));
    assert!(err.retryable());
}

pub(crate) async fn run_tests(mut rocksdb: RocksDBStorage) {
    usages_are_listed_per_tenant(&mut rocksdb).await;
    serializable_transactions_conflict(&mut rocksdb).await;
}
