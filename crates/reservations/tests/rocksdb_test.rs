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
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use googletest::prelude::*;
use tokio::sync::Barrier;

use quota_reservations::{
    ConfiguredLimits, ReservationError, ReservationManager, ResourceCatalog, ResourceCounter,
    UsageSource,
};
use quota_storage_api::IsolationLevel;
use quota_storage_rocksdb::RocksDBStorage;
use quota_test_util::let_assert;
use quota_types::config::QuotaOptions;
use quota_types::identifiers::{ResourceName, TenantId};
use quota_types::retries::RetryPolicy;
use quota_types::time::{MillisSinceEpoch, MockClock};

struct Ports(AtomicU64);

impl UsageSource for Arc<Ports> {
    fn count_used<'a>(&'a self, _: &'a TenantId) -> BoxFuture<'a, anyhow::Result<u64>> {
        futures::future::ready(Ok(self.0.load(Ordering::SeqCst))).boxed()
    }
}

/// First two counts wait for each other so that two reservation attempts overlap.
struct Interleaved {
    calls: AtomicUsize,
    barrier: Barrier,
}

impl UsageSource for Arc<Interleaved> {
    fn count_used<'a>(&'a self, _: &'a TenantId) -> BoxFuture<'a, anyhow::Result<u64>> {
        async move {
            if self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait().await;
            }
            Ok(0)
        }
        .boxed()
    }
}

async fn manager(
    catalog: ResourceCatalog,
    limit: i64,
    isolation: IsolationLevel,
) -> (
    tempfile::TempDir,
    MockClock,
    ReservationManager<RocksDBStorage>,
) {
    let temp_dir = tempfile::tempdir().expect("temp dir can be created");
    let storage = RocksDBStorage::open(temp_dir.path().join("db"))
        .await
        .expect("DB storage creation succeeds");

    let mut options = QuotaOptions::default();
    options.retry_policy = RetryPolicy::fixed_delay(Duration::from_millis(5), Some(3));
    let clock = MockClock::with_timestamp(MillisSinceEpoch::new(1_000_000));
    let manager = ReservationManager::new(
        storage,
        Arc::new(catalog),
        Arc::new(ConfiguredLimits::new(limit)),
        &options,
        isolation,
    )
    .with_clock(clock.clone());

    (temp_dir, clock, manager)
}

fn ports(amount: u64) -> BTreeMap<ResourceName, u64> {
    BTreeMap::from([(ResourceName::from("ports"), amount)])
}

#[test_log::test(tokio::test)]
async fn reserve_commit_and_expire() {
    let used = Arc::new(Ports(AtomicU64::new(3)));
    let (_temp_dir, clock, manager) = manager(
        ResourceCatalog::new().with_resource("ports", ResourceCounter::tracked(Arc::clone(&used))),
        5,
        IsolationLevel::Committed,
    )
    .await;
    let tenant = TenantId::from("acme");

    let first = manager.make_reservation(&tenant, ports(1)).await.unwrap();
    let second = manager.make_reservation(&tenant, ports(1)).await.unwrap();
    let err = manager
        .make_reservation(&tenant, ports(1))
        .await
        .unwrap_err();
    let_assert!(ReservationError::OverQuota(over_quota) = err);
    assert_that!(
        over_quota.overs,
        elements_are![eq(ResourceName::from("ports"))]
    );

    // the first reserved port got created
    used.0.store(4, Ordering::SeqCst);
    assert_that!(manager.commit_reservation(first.id).await, ok(eq(true)));

    let details = manager.quota_details(&tenant).await.unwrap();
    let ports_detail = details.get(&ResourceName::from("ports")).copied().unwrap();
    assert_that!(ports_detail.used, eq(4));
    assert_that!(ports_detail.reserved, eq(1));

    clock.advance(Duration::from_secs(20));
    assert_that!(manager.purge_expired(None).await, ok(eq(1)));
    assert_that!(manager.get_reservation(second.id).await, ok(none()));
    assert_that!(manager.reservations(&tenant).await, ok(empty()));
}

#[test_log::test(tokio::test)]
async fn serializable_isolation_prevents_overshooting() {
    let source = Arc::new(Interleaved {
        calls: AtomicUsize::new(0),
        barrier: Barrier::new(2),
    });
    let (_temp_dir, _clock, manager) = manager(
        ResourceCatalog::new().with_resource("ports", ResourceCounter::countable(source)),
        1,
        IsolationLevel::Serializable,
    )
    .await;
    let tenant = TenantId::from("acme");

    let (first, second) = tokio::join!(
        manager.make_reservation(&tenant, ports(1)),
        manager.make_reservation(&tenant, ports(1))
    );

    assert_that!(
        u8::from(first.is_ok()) + u8::from(second.is_ok()),
        eq(1)
    );
    assert_that!(manager.reservations(&tenant).await, ok(len(eq(1))));
}
