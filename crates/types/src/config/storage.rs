// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::IsolationLevel;

const DEFAULT_DATA_DIR: &str = "db";

/// # Storage options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct StorageOptions {
    /// # Data directory
    ///
    /// Directory of the reservation store, relative to the base directory.
    data_dir: PathBuf,

    /// # Isolation level
    ///
    /// Isolation of the transactions running quota checks. `committed` accepts that concurrent
    /// reservations may slightly overshoot a limit, `serializable` turns such races into
    /// retried conflicts.
    pub isolation: IsolationLevel,
}

impl StorageOptions {
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            isolation: IsolationLevel::default(),
        }
    }
}
