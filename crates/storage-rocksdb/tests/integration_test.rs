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
use std::fmt::Debug;
use std::pin::pin;
use std::time::Duration;

use futures::Stream;
use tokio_stream::StreamExt;

use quota_storage_api::StorageError;
use quota_storage_rocksdb::RocksDBStorage;
use quota_types::identifiers::{ResourceName, TenantId};

mod reservation_table_test;
mod usage_table_test;

const TTL: Duration = Duration::from_secs(20);

async fn storage_test_environment() -> (tempfile::TempDir, RocksDBStorage) {
    let temp_dir = tempfile::tempdir().expect("temp dir can be created");
    let storage = RocksDBStorage::open(temp_dir.path().join("db"))
        .await
        .expect("DB storage creation succeeds");
    (temp_dir, storage)
}

#[test_log::test(tokio::test)]
async fn test_read_write() {
    let (_temp_dir, rocksdb) = storage_test_environment().await;

    reservation_table_test::run_tests(rocksdb.clone()).await;
    usage_table_test::run_tests(rocksdb).await;
}

#[test_log::test(tokio::test)]
async fn reservations_survive_reopening() {
    use quota_storage_api::reservation_table::{ReadReservationTable, WriteReservationTable};
    use quota_storage_api::{Storage, Transaction};
    use quota_types::time::MillisSinceEpoch;

    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("db");

    let reservation = {
        let mut storage = RocksDBStorage::open(path.clone()).await.unwrap();
        let mut txn = storage.transaction();
        let reservation = txn
            .create_reservation(
                &tenant("acme"),
                deltas(&[("ports", 2)]),
                MillisSinceEpoch::new(0),
                TTL,
            )
            .unwrap();
        txn.commit().await.unwrap();
        reservation
    };

    let mut storage = RocksDBStorage::open(path).await.unwrap();
    let mut txn = storage.transaction();
    assert_eq!(
        txn.get_reservation(reservation.id).await.unwrap(),
        Some(reservation)
    );
}

#[test_log::test(tokio::test)]
async fn values_are_written_with_the_storage_codec() {
    use googletest::prelude::*;
    use quota_storage_api::usage_table::{QuotaUsage, WriteUsageTable};
    use quota_storage_api::{Storage, Transaction};
    use quota_test_util::matchers::storage_decoded;

    let (_temp_dir, mut rocksdb) = storage_test_environment().await;

    let mut txn = rocksdb.transaction();
    txn.put_usage(&tenant("raw"), &ResourceName::from("ports"), &QuotaUsage::clean(2, 7))
        .unwrap();
    txn.commit().await.unwrap();

    let db = rocksdb.inner();
    let usage_cf = db.cf_handle("usage").expect("usage column family exists");
    let values: Vec<bytes::Bytes> = db
        .iterator_cf(&usage_cf, rocksdb::IteratorMode::Start)
        .map(|item| bytes::Bytes::from(item.expect("iteration succeeds").1.into_vec()))
        .collect();

    assert_that!(
        values,
        elements_are![storage_decoded(eq(QuotaUsage::clean(2, 7)))]
    );
}

pub(crate) fn tenant(name: &str) -> TenantId {
    TenantId::from(name)
}

pub(crate) fn deltas(amounts: &[(&str, u64)]) -> BTreeMap<ResourceName, u64> {
    amounts
        .iter()
        .map(|(resource, amount)| (ResourceName::from(*resource), *amount))
        .collect()
}

pub(crate) async fn assert_stream_eq<T: Send + Debug + PartialEq + 'static>(
    actual: impl Stream<Item = Result<T, StorageError>>,
    expected: Vec<T>,
) {
    let mut actual = pin!(actual);
    let mut items = expected.into_iter();

    while let Some(item) = actual.next().await {
        let got = item.expect("Fail result");
        let expected = items.next();

        assert_eq!(Some(got), expected);
    }

    assert_eq!(None, items.next());
}
