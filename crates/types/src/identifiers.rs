// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Identifiers used by the quota engine.

use std::fmt;
use std::str::FromStr;

use bytestring::ByteString;
use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum IdDecodeError {
    #[error("bad length")]
    Length,
    #[error("invalid ulid: {0}")]
    Ulid(#[from] ulid::DecodeError),
}

/// Defines a cheaply cloneable, string backed identifier.
macro_rules! string_backed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(ByteString);

        impl $name {
            pub fn new(value: impl Into<ByteString>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }

            pub fn into_inner(self) -> ByteString {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(ByteString::from(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(ByteString::from(value))
            }
        }

        impl From<ByteString> for $name {
            fn from(value: ByteString) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_backed_id!(
    /// Identifies the tenant (project) which owns resources and their quotas.
    TenantId
);

string_backed_id!(
    /// Name of a countable resource kind, e.g. `ports` or `networks`.
    ResourceName
);

/// Unique identifier of a quota reservation.
///
/// Reservation ids are ulids, hence they are sortable by their creation time and can be
/// generated without coordination.
#[derive(
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    PartialOrd,
    Ord,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
pub struct ReservationId(Ulid);

impl ReservationId {
    pub const SIZE_IN_BYTES: usize = std::mem::size_of::<u128>();

    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub const fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, random))
    }

    pub fn from_slice(b: &[u8]) -> Result<Self, IdDecodeError> {
        let bytes: [u8; Self::SIZE_IN_BYTES] = b.try_into().map_err(|_| IdDecodeError::Length)?;
        Ok(Self(Ulid::from_bytes(bytes)))
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE_IN_BYTES] {
        self.0.to_bytes()
    }

    /// Milliseconds since the unix epoch at which this id was generated.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl From<u128> for ReservationId {
    fn from(value: u128) -> Self {
        Self(Ulid::from(value))
    }
}

impl From<ReservationId> for u128 {
    fn from(value: ReservationId) -> Self {
        value.0.into()
    }
}

impl fmt::Debug for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // use the same formatting for debug and display to show a consistent representation
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsv_{}", self.0)
    }
}

impl FromStr for ReservationId {
    type Err = IdDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("rsv_").unwrap_or(s);
        Ok(Self(Ulid::from_string(raw)?))
    }
}
