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

use quota_types::identifiers::ResourceName;

use crate::counter::ResourceCounter;

/// Resource kinds whose quota is enforced, together with their counting capability.
///
/// The catalog is built once at startup and handed to the
/// [`ReservationManager`](crate::ReservationManager). Resources missing from the catalog are
/// never checked against their limit.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    counters: BTreeMap<ResourceName, ResourceCounter>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(
        mut self,
        resource: impl Into<ResourceName>,
        counter: ResourceCounter,
    ) -> Self {
        self.register(resource, counter);
        self
    }

    /// Registers the counter of a resource. Returns the counter previously registered under
    /// the same name.
    pub fn register(
        &mut self,
        resource: impl Into<ResourceName>,
        counter: ResourceCounter,
    ) -> Option<ResourceCounter> {
        self.counters.insert(resource.into(), counter)
    }

    pub fn counter(&self, resource: &ResourceName) -> Option<&ResourceCounter> {
        self.counters.get(resource)
    }

    /// Registered resources sorted by name.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceName> {
        self.counters.keys()
    }
}
