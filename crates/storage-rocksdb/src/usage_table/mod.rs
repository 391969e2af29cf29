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

use quota_storage_api::usage_table::{QuotaUsage, ReadUsageTable, WriteUsageTable};
use quota_storage_api::Result;
use quota_types::identifiers::{ResourceName, TenantId};

use crate::keys::{define_table_key, KeyPrefix, TableKey};
use crate::{decode_value, RocksDBTransaction, TableKind, TableScanIterationDecision};

define_table_key!(
    TableKind::Usage,
    KeyPrefix::Usage,
    UsageKey(tenant_id: ByteString, resource: ByteString)
);

fn usage_key(tenant_id: &TenantId, resource: &ResourceName) -> UsageKey {
    UsageKey::default()
        .tenant_id(tenant_id.clone().into_inner())
        .resource(resource.clone().into_inner())
}

fn decode_usage_key_value(k: &[u8], v: &[u8]) -> Result<(ResourceName, QuotaUsage)> {
    let mut key = Bytes::copy_from_slice(k);
    let key = UsageKey::deserialize_from(&mut key)?;
    let resource = ResourceName::from(key.resource_ok_or()?.clone());
    Ok((resource, decode_value(v)?))
}

fn mark_dirty(
    txn: &mut RocksDBTransaction,
    tenant_id: &TenantId,
    resource: &ResourceName,
) -> Result<()> {
    let key = usage_key(tenant_id, resource);
    let Some(mut usage) = txn.get_value::<_, QuotaUsage>(key.clone())? else {
        return Ok(());
    };
    usage.dirty = true;
    usage.revision += 1;
    txn.put_kv(key, &usage)
}

impl ReadUsageTable for RocksDBTransaction<'_> {
    fn get_usage(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> impl Future<Output = Result<Option<QuotaUsage>>> + Send {
        future::ready(self.get_value(usage_key(tenant_id, resource)))
    }

    fn get_usages(
        &mut self,
        tenant_id: &TenantId,
    ) -> impl Stream<Item = Result<(ResourceName, QuotaUsage)>> + Send {
        let prefix = UsageKey::default().tenant_id(tenant_id.clone().into_inner());
        stream::iter(self.for_each_key_value_in_place(prefix, |k, v| {
            TableScanIterationDecision::Emit(decode_usage_key_value(k, v))
        }))
    }
}

impl WriteUsageTable for RocksDBTransaction<'_> {
    fn put_usage(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
        usage: &QuotaUsage,
    ) -> Result<()> {
        self.put_kv(usage_key(tenant_id, resource), usage)
    }

    fn mark_dirty(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> impl Future<Output = Result<()>> + Send {
        future::ready(mark_dirty(self, tenant_id, resource))
    }
}
