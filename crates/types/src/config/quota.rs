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

use serde::{Deserialize, Serialize};

use crate::identifiers::{ResourceName, TenantId};
use crate::retries::RetryPolicy;

/// # Quota options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct QuotaOptions {
    /// # Reservation time to live
    ///
    /// How long a reservation holds its resources before it expires and stops being counted.
    #[serde(with = "serde_with::As::<serde_with::DisplayFromStr>")]
    reservation_ttl: humantime::Duration,

    /// # Expiry purge interval
    ///
    /// Interval of the background task removing expired reservations of all tenants.
    #[serde(with = "serde_with::As::<serde_with::DisplayFromStr>")]
    expiry_purge_interval: humantime::Duration,

    /// # Retry policy
    ///
    /// Retry policy applied when a reservation transaction fails transiently, for example
    /// because of a write conflict.
    pub retry_policy: RetryPolicy,

    /// # Default limit
    ///
    /// Limit applied to resources without an explicit limit. Negative values mean unlimited.
    pub default_limit: i64,

    /// # Per-resource limits
    ///
    /// Default limit per resource name, applied to all tenants without an override.
    pub limits: BTreeMap<ResourceName, i64>,

    /// # Per-tenant limits
    ///
    /// Limit overrides per tenant and resource name.
    pub tenant_limits: BTreeMap<TenantId, BTreeMap<ResourceName, i64>>,
}

impl QuotaOptions {
    pub fn reservation_ttl(&self) -> Duration {
        self.reservation_ttl.into()
    }

    pub fn expiry_purge_interval(&self) -> Duration {
        self.expiry_purge_interval.into()
    }
}

impl Default for QuotaOptions {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(20).into(),
            expiry_purge_interval: Duration::from_secs(60).into(),
            retry_policy: RetryPolicy::exponential(
                Duration::from_millis(50),
                2.0,
                Some(5),
                Some(Duration::from_secs(1)),
            ),
            default_limit: -1,
            limits: BTreeMap::default(),
            tenant_limits: BTreeMap::default(),
        }
    }
}
