// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod common;
mod quota;
mod storage;

pub use common::*;
pub use quota::*;
pub use storage::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::GenericError;

#[derive(Debug, thiserror::Error)]
pub enum InvalidConfigurationError {
    #[error("quota.reservation-ttl must be greater than zero")]
    ZeroReservationTtl,
    #[error("quota.expiry-purge-interval must be greater than zero")]
    ZeroPurgeInterval,
    #[error("retry policy factor must be at least 1.0, got {0}")]
    RetryFactor(f32),
}

/// # Quota configuration file
///
/// Configuration of the quota reservation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    #[serde(flatten)]
    pub common: CommonOptions,
    pub quota: QuotaOptions,
    pub storage: StorageOptions,
}

impl Configuration {
    /// Directory holding the store files, resolved against the base directory.
    pub fn storage_dir(&self) -> PathBuf {
        self.common.base_dir().join(self.storage.data_dir())
    }

    pub fn validate(&self) -> Result<(), InvalidConfigurationError> {
        if self.quota.reservation_ttl().is_zero() {
            return Err(InvalidConfigurationError::ZeroReservationTtl);
        }
        if self.quota.expiry_purge_interval().is_zero() {
            return Err(InvalidConfigurationError::ZeroPurgeInterval);
        }
        if let crate::retries::RetryPolicy::Exponential { factor, .. } = self.quota.retry_policy {
            if factor < 1.0 {
                return Err(InvalidConfigurationError::RetryFactor(factor));
            }
        }
        Ok(())
    }

    /// Dumps the configuration to a string
    pub fn dump(&self) -> Result<String, GenericError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_configuration_is_valid() {
        let config = Configuration::default();
        config.validate().unwrap();
        assert_eq!(config.quota.reservation_ttl(), Duration::from_secs(20));
    }

    #[test]
    fn dump_renders_kebab_case_toml() {
        let dumped = Configuration::default().dump().unwrap();
        assert!(dumped.contains("log-filter"));
        assert!(dumped.contains("[quota]"));
        assert!(dumped.contains("reservation-ttl = \"20s\""));

        let parsed: Configuration = toml::from_str(&dumped).unwrap();
        assert_eq!(parsed.quota, QuotaOptions::default());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = ConfigurationBuilder::default()
            .quota(
                QuotaOptionsBuilder::default()
                    .reservation_ttl(Duration::ZERO.into())
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(InvalidConfigurationError::ZeroReservationTtl)
        ));
    }
}
