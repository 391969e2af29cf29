// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_DIRECTORY: &str = "quota-data";

#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct CommonOptions {
    /// The working directory which should be used for relative paths. The default is
    /// `quota-data` under the current working directory.
    #[builder(setter(strip_option))]
    base_dir: Option<PathBuf>,

    /// # Logging Filter
    ///
    /// Log filter configuration. Can be overridden by the `RUST_LOG` environment variable.
    /// Check the [`RUST_LOG` documentation](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html) for more details how to configure it.
    pub log_filter: String,

    /// # Logging format
    ///
    /// Format to use when logging.
    pub log_format: LogFormat,

    /// # Disable ANSI in log output
    ///
    /// Disable ANSI terminal codes for logs. This is useful when the log collector doesn't support processing ANSI terminal codes.
    pub log_disable_ansi_codes: bool,

    /// # Shutdown grace timeout
    ///
    /// How long to wait for background tasks to finish after a shutdown was requested.
    #[serde(with = "serde_with::As::<serde_with::DisplayFromStr>")]
    shutdown_timeout: humantime::Duration,
}

impl CommonOptions {
    pub fn shutdown_grace_period(&self) -> Duration {
        self.shutdown_timeout.into()
    }

    pub fn set_base_dir(&mut self, path: PathBuf) {
        self.base_dir = Some(path);
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(DEFAULT_BASE_DIRECTORY)
        })
    }
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            log_filter: "warn,quota=info".to_string(),
            log_format: Default::default(),
            log_disable_ansi_codes: false,
            shutdown_timeout: Duration::from_secs(10).into(),
        }
    }
}

/// # Log format
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// # Pretty
    ///
    /// Enables verbose logging. Not recommended in production.
    #[default]
    Pretty,
    /// # Compact
    ///
    /// Enables compact logging.
    Compact,
    /// # Json
    ///
    /// Enables json logging. You can use a json log collector to ingest these logs and further process them.
    Json,
}
