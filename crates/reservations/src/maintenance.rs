// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use quota_storage_api::Storage;

use crate::manager::ReservationManager;

/// Periodically deletes the expired reservations of all tenants.
pub struct ExpiryPurger<S> {
    manager: Arc<ReservationManager<S>>,
    purge_interval: Duration,
    cancellation: CancellationToken,
}

impl<S> ExpiryPurger<S>
where
    S: Storage + Clone + Send + Sync + 'static,
{
    pub fn new(
        manager: Arc<ReservationManager<S>>,
        purge_interval: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            manager,
            purge_interval,
            cancellation,
        }
    }

    /// Runs until the cancellation token is cancelled. Failed purges are logged and retried on
    /// the next tick.
    pub async fn run(self) {
        let Self {
            manager,
            purge_interval,
            cancellation,
        } = self;
        debug!(?purge_interval, "Running expiry purger");

        let mut interval = tokio::time::interval(purge_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break;
                },
                _ = interval.tick() => {
                    match manager.purge_expired(None).await {
                        Ok(0) => trace!("No expired reservations"),
                        Ok(purged) => debug!(purged, "Purged expired reservations"),
                        Err(err) => warn!("Failed to purge expired reservations: {err}"),
                    }
                }
            }
        }

        debug!("Stopping expiry purger");
    }
}
