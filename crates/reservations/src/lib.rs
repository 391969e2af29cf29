// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Lock-free quota reservations.
//!
//! A [`ReservationManager`] checks a request for additional resources of a tenant against the
//! tenant's limits and records a time bounded [`Reservation`] if it fits. Checking and recording
//! happen inside one store transaction instead of under a per-tenant lock. Callers later commit
//! or cancel the reservation; abandoned reservations expire and are purged by the
//! [`ExpiryPurger`].

mod catalog;
mod counter;
mod error;
mod limits;
mod maintenance;
mod manager;

pub use catalog::ResourceCatalog;
pub use counter::{ResourceCounter, UsageSource};
pub use error::{OverQuota, ReservationError};
pub use limits::{ConfiguredLimits, LimitProvider, UNLIMITED};
pub use maintenance::ExpiryPurger;
pub use manager::{QuotaDetail, ReservationManager};

pub use quota_storage_api::reservation_table::Reservation;
