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

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::info;

use quota_types::config::QuotaOptions;
use quota_types::identifiers::{ResourceName, TenantId};

/// Limit value of resources without an upper bound. Any negative limit means unlimited.
pub const UNLIMITED: i64 = -1;

/// Source of the effective limits of a tenant.
pub trait LimitProvider: Send + Sync + 'static {
    /// Returns the limits of the given resources. A resource without an entry in the result is
    /// treated as unlimited.
    fn get_limits<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        resources: &'a [ResourceName],
    ) -> BoxFuture<'a, anyhow::Result<BTreeMap<ResourceName, i64>>>;
}

/// Limits resolved from per-tenant overrides, then per-resource defaults, then the global
/// default limit.
#[derive(Debug)]
pub struct ConfiguredLimits {
    default_limit: i64,
    limits: BTreeMap<ResourceName, i64>,
    tenant_limits: RwLock<BTreeMap<TenantId, BTreeMap<ResourceName, i64>>>,
}

impl ConfiguredLimits {
    pub fn new(default_limit: i64) -> Self {
        Self {
            default_limit,
            limits: BTreeMap::new(),
            tenant_limits: RwLock::default(),
        }
    }

    pub fn from_options(options: &QuotaOptions) -> Self {
        Self {
            default_limit: options.default_limit,
            limits: options.limits.clone(),
            tenant_limits: RwLock::new(options.tenant_limits.clone()),
        }
    }

    pub fn with_limit(mut self, resource: impl Into<ResourceName>, limit: i64) -> Self {
        self.limits.insert(resource.into(), limit);
        self
    }

    pub fn set_tenant_limit(
        &self,
        tenant_id: impl Into<TenantId>,
        resource: impl Into<ResourceName>,
        limit: i64,
    ) {
        let tenant_id = tenant_id.into();
        let resource = resource.into();
        info!(
            quota.tenant = %tenant_id,
            quota.resource = %resource,
            limit,
            "Updated tenant limit"
        );
        self.tenant_limits
            .write()
            .entry(tenant_id)
            .or_default()
            .insert(resource, limit);
    }

    /// Removes all overrides of the tenant so that the defaults apply again.
    pub fn clear_tenant_limits(&self, tenant_id: &TenantId) {
        if self.tenant_limits.write().remove(tenant_id).is_some() {
            info!(quota.tenant = %tenant_id, "Cleared tenant limits");
        }
    }

    pub fn limit(&self, tenant_id: &TenantId, resource: &ResourceName) -> i64 {
        self.tenant_limits
            .read()
            .get(tenant_id)
            .and_then(|limits| limits.get(resource))
            .or_else(|| self.limits.get(resource))
            .copied()
            .unwrap_or(self.default_limit)
    }
}

impl LimitProvider for ConfiguredLimits {
    fn get_limits<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        resources: &'a [ResourceName],
    ) -> BoxFuture<'a, anyhow::Result<BTreeMap<ResourceName, i64>>> {
        let limits = resources
            .iter()
            .map(|resource| (resource.clone(), self.limit(tenant_id, resource)))
            .collect();
        future::ready(Ok(limits)).boxed()
    }
}
