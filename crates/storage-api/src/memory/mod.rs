// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! In-process implementation of the quota tables.
//!
//! Transactions buffer their writes and apply them atomically on commit. Reads observe the
//! latest committed state overlaid with the transaction's own writes. Under
//! [`IsolationLevel::Serializable`], a commit fails with [`StorageError::Conflict`] if any key it
//! writes was committed by another transaction after it started.

use std::collections::{BTreeMap, HashMap};
use std::future::{self, Future};
use std::sync::Arc;

use anyhow::anyhow;
use futures::{stream, Stream};
use parking_lot::Mutex;
use tracing::trace;

use quota_types::identifiers::{ReservationId, ResourceName, TenantId};
use quota_types::time::MillisSinceEpoch;

use crate::reservation_table::{ReadReservationTable, Reservation, WriteReservationTable};
use crate::usage_table::{QuotaUsage, ReadUsageTable, WriteUsageTable};
use crate::{IsolationLevel, Result, Storage, StorageError, Transaction};

type UsageKey = (TenantId, ResourceName);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Reservation(ReservationId),
    Usage(UsageKey),
}

#[derive(Debug, Default)]
struct State {
    /// Sequence number of the last commit.
    sequence: u64,
    reservations: BTreeMap<ReservationId, Reservation>,
    usages: BTreeMap<UsageKey, QuotaUsage>,
    /// Sequence number of the commit which last wrote or deleted a row.
    last_modified: HashMap<RowKey, u64>,
    failing_commits: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the next `count` commits fail with a retryable [`StorageError::Conflict`] without
    /// applying their writes.
    pub fn fail_next_commits(&self, count: usize) {
        self.state.lock().failing_commits = count;
    }

    /// Number of stored reservations, including expired ones.
    pub fn reservation_count(&self) -> usize {
        self.state.lock().reservations.len()
    }
}

impl Storage for MemoryStorage {
    type TransactionType<'a> = MemoryTransaction;

    fn transaction_with_isolation(
        &mut self,
        isolation: IsolationLevel,
    ) -> Self::TransactionType<'_> {
        let snapshot = self.state.lock().sequence;
        MemoryTransaction {
            state: Arc::clone(&self.state),
            isolation,
            snapshot,
            reservation_writes: BTreeMap::new(),
            usage_writes: BTreeMap::new(),
        }
    }
}

pub struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    isolation: IsolationLevel,
    snapshot: u64,
    // `None` marks a deletion
    reservation_writes: BTreeMap<ReservationId, Option<Reservation>>,
    usage_writes: BTreeMap<UsageKey, Option<QuotaUsage>>,
}

impl MemoryTransaction {
    fn reservation(&self, reservation_id: ReservationId) -> Option<Reservation> {
        match self.reservation_writes.get(&reservation_id) {
            Some(written) => written.clone(),
            None => self
                .state
                .lock()
                .reservations
                .get(&reservation_id)
                .cloned(),
        }
    }

    fn reservations_matching(&self, filter: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut merged: BTreeMap<ReservationId, Reservation> = self
            .state
            .lock()
            .reservations
            .values()
            .filter(|reservation| filter(reservation))
            .map(|reservation| (reservation.id, reservation.clone()))
            .collect();

        for (id, written) in &self.reservation_writes {
            match written {
                Some(reservation) if filter(reservation) => {
                    merged.insert(*id, reservation.clone());
                }
                _ => {
                    merged.remove(id);
                }
            }
        }

        merged.into_values().collect()
    }

    fn usage(&self, key: &UsageKey) -> Option<QuotaUsage> {
        match self.usage_writes.get(key) {
            Some(written) => written.clone(),
            None => self.state.lock().usages.get(key).cloned(),
        }
    }

    fn usages_of(&self, tenant_id: &TenantId) -> Vec<(ResourceName, QuotaUsage)> {
        let mut merged: BTreeMap<ResourceName, QuotaUsage> = self
            .state
            .lock()
            .usages
            .iter()
            .filter(|((tenant, _), _)| tenant == tenant_id)
            .map(|((_, resource), usage)| (resource.clone(), usage.clone()))
            .collect();

        for ((tenant, resource), written) in &self.usage_writes {
            if tenant != tenant_id {
                continue;
            }
            match written {
                Some(usage) => {
                    merged.insert(resource.clone(), usage.clone());
                }
                None => {
                    merged.remove(resource);
                }
            }
        }

        merged.into_iter().collect()
    }

    fn written_keys(&self) -> impl Iterator<Item = RowKey> + '_ {
        self.reservation_writes
            .keys()
            .map(|id| RowKey::Reservation(*id))
            .chain(self.usage_writes.keys().cloned().map(RowKey::Usage))
    }

    fn try_commit(self) -> Result<()> {
        let mut state = self.state.lock();

        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(StorageError::Conflict(anyhow!("injected commit failure")));
        }

        if self.isolation == IsolationLevel::Serializable {
            if let Some(key) = self.written_keys().find(|key| {
                state
                    .last_modified
                    .get(key)
                    .is_some_and(|modified| *modified > self.snapshot)
            }) {
                return Err(StorageError::Conflict(anyhow!(
                    "{key:?} was modified by a concurrent transaction"
                )));
            }
        }

        state.sequence += 1;
        let sequence = state.sequence;

        for (id, written) in &self.reservation_writes {
            match written {
                Some(reservation) => {
                    state.reservations.insert(*id, reservation.clone());
                }
                None => {
                    state.reservations.remove(id);
                }
            }
            state
                .last_modified
                .insert(RowKey::Reservation(*id), sequence);
        }

        for (key, written) in &self.usage_writes {
            match written {
                Some(usage) => {
                    state.usages.insert(key.clone(), usage.clone());
                }
                None => {
                    state.usages.remove(key);
                }
            }
            state
                .last_modified
                .insert(RowKey::Usage(key.clone()), sequence);
        }

        trace!(
            sequence,
            reservations = self.reservation_writes.len(),
            usages = self.usage_writes.len(),
            "Committed in-memory transaction"
        );
        Ok(())
    }
}

impl ReadReservationTable for MemoryTransaction {
    fn get_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send {
        future::ready(Ok(self.reservation(reservation_id)))
    }

    fn get_reservations(
        &mut self,
        tenant_id: &TenantId,
    ) -> impl Stream<Item = Result<Reservation>> + Send {
        let reservations = self.reservations_matching(|r| &r.tenant_id == tenant_id);
        stream::iter(reservations.into_iter().map(Ok))
    }
}

impl WriteReservationTable for MemoryTransaction {
    fn put_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        self.reservation_writes
            .insert(reservation.id, Some(reservation.clone()));
        Ok(())
    }

    fn delete_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>>> + Send {
        let existing = self.reservation(reservation_id);
        if existing.is_some() {
            self.reservation_writes.insert(reservation_id, None);
        }
        future::ready(Ok(existing))
    }

    fn delete_expired_reservations(
        &mut self,
        tenant_id: Option<&TenantId>,
        now: MillisSinceEpoch,
    ) -> impl Future<Output = Result<usize>> + Send {
        let expired = self.reservations_matching(|r| {
            r.is_expired(now) && tenant_id.map_or(true, |tenant| &r.tenant_id == tenant)
        });
        for reservation in &expired {
            self.reservation_writes.insert(reservation.id, None);
        }
        future::ready(Ok(expired.len()))
    }
}

impl ReadUsageTable for MemoryTransaction {
    fn get_usage(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> impl Future<Output = Result<Option<QuotaUsage>>> + Send {
        future::ready(Ok(self.usage(&(tenant_id.clone(), resource.clone()))))
    }

    fn get_usages(
        &mut self,
        tenant_id: &TenantId,
    ) -> impl Stream<Item = Result<(ResourceName, QuotaUsage)>> + Send {
        stream::iter(self.usages_of(tenant_id).into_iter().map(Ok))
    }
}

impl WriteUsageTable for MemoryTransaction {
    fn put_usage(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
        usage: &QuotaUsage,
    ) -> Result<()> {
        self.usage_writes.insert(
            (tenant_id.clone(), resource.clone()),
            Some(usage.clone()),
        );
        Ok(())
    }

    fn mark_dirty(
        &mut self,
        tenant_id: &TenantId,
        resource: &ResourceName,
    ) -> impl Future<Output = Result<()>> + Send {
        let key = (tenant_id.clone(), resource.clone());
        if let Some(mut usage) = self.usage(&key) {
            usage.dirty = true;
            usage.revision += 1;
            self.usage_writes.insert(key, Some(usage));
        }
        future::ready(Ok(()))
    }
}

impl Transaction for MemoryTransaction {
    fn commit(self) -> impl Future<Output = Result<()>> + Send {
        future::ready(self.try_commit())
    }
}

#[cfg(test)]
mod tests;
