// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;
use prost::encoding::encoded_len_varint;
use strum_macros::EnumIter;

use quota_storage_api::StorageError;
use quota_types::identifiers::ReservationId;

use crate::TableKind;

/// Every table key starts with a key prefix. This allows to multiplex different keys in the same
/// column family and to evolve a key if necessary.
///
/// # Important
/// There must exist a bijective mapping between the enum variant and its byte representation.
/// See [`KeyPrefix::as_bytes`] and [`KeyPrefix::from_bytes`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, EnumIter, derive_more::Display)]
pub enum KeyPrefix {
    Reservation,
    ReservationIndex,
    Usage,
}

impl KeyPrefix {
    pub const SERIALIZED_LENGTH: usize = 2;

    /// A once assigned byte representation must never be changed! Instead, create a new variant
    /// representing a new key.
    fn as_bytes(&self) -> &[u8; Self::SERIALIZED_LENGTH] {
        match self {
            KeyPrefix::Reservation => b"rv",
            KeyPrefix::ReservationIndex => b"ri",
            KeyPrefix::Usage => b"us",
        }
    }

    fn from_bytes(bytes: &[u8; Self::SERIALIZED_LENGTH]) -> Option<Self> {
        match bytes {
            b"rv" => Some(KeyPrefix::Reservation),
            b"ri" => Some(KeyPrefix::ReservationIndex),
            b"us" => Some(KeyPrefix::Usage),
            _ => None,
        }
    }

    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.as_bytes());
    }

    pub fn deserialize<B: Buf>(buf: &mut B) -> Result<Self, StorageError> {
        if buf.remaining() < KeyPrefix::SERIALIZED_LENGTH {
            return Err(StorageError::DataIntegrityError);
        }

        let mut bytes = [0; KeyPrefix::SERIALIZED_LENGTH];
        buf.copy_to_slice(&mut bytes);
        Self::from_bytes(&bytes).ok_or_else(|| {
            StorageError::Generic(anyhow::anyhow!("unknown key prefix: {:x?}", bytes))
        })
    }
}

pub trait TableKey: Sized + Send + 'static {
    fn is_complete(&self) -> bool;
    fn serialize_key_prefix<B: BufMut>(bytes: &mut B);
    fn serialize_to<B: BufMut>(&self, bytes: &mut B);
    fn deserialize_from<B: Buf>(bytes: &mut B) -> crate::Result<Self>;
    fn table() -> TableKind;

    fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.serialized_length());
        self.serialize_to(&mut buf);
        buf
    }

    fn serialized_length(&self) -> usize;
}

/// Defines an ordered, named key tuple which is used as a rocksdb key.
///
/// Given the definition
/// ```ignore
/// define_table_key!(TableKind::Usage, KeyPrefix::Usage, UsageKey(tenant_id: ByteString, resource: ByteString));
/// ```
///
/// the macro generates a `UsageKey` struct holding optional fields, a builder method per field,
/// `<field>_ok_or` accessors failing with [`StorageError::DataIntegrityError`] on missing fields
/// and the [`TableKey`] implementation. Fields are serialized in their declared order, missing
/// trailing fields are omitted which turns a partially filled key into a scan prefix.
macro_rules! define_table_key {

    ($table_kind:expr, $key_prefix:path, $key_name:ident ( $($element: ident: $ty: ty),+ $(,)? ) ) => (paste::paste! {
        #[derive(Default, Debug, Eq, PartialEq, Clone)]
        pub struct $key_name { $(pub $element: Option<$ty>),+ }

        impl $key_name {
            const KEY_PREFIX: $crate::keys::KeyPrefix = $key_prefix;

            $(pub fn $element(mut self, $element: $ty) -> Self {
                self.$element = Some($element);
                self
            })+

            $(#[allow(dead_code)]
            pub fn [< $element _ok_or >](&self) -> crate::Result<& $ty> {
                self.$element.as_ref().ok_or(quota_storage_api::StorageError::DataIntegrityError)
            })+

            pub fn into_inner(self) -> ($(Option<$ty>,)+) {
                ( $(self.$element,)+ )
            }
        }

        impl $crate::keys::TableKey for $key_name {
            #[inline]
            fn table() -> $crate::TableKind {
                $table_kind
            }

            fn is_complete(&self) -> bool {
                $(
                if self.$element.is_none() {
                    return false;
                }
                )+
                true
            }

            #[inline]
            fn serialize_key_prefix<B: bytes::BufMut>(bytes: &mut B) {
                Self::KEY_PREFIX.serialize(bytes);
            }

            #[inline]
            fn serialize_to<B: bytes::BufMut>(&self, bytes: &mut B) {
                Self::serialize_key_prefix(bytes);
                $(
                $crate::keys::serialize(&self.$element, bytes);
                )+
            }

            #[inline]
            fn deserialize_from<B: bytes::Buf>(bytes: &mut B) -> crate::Result<Self> {
                let mut this: Self = Default::default();

                let key_prefix = $crate::keys::KeyPrefix::deserialize(bytes)?;

                if key_prefix != Self::KEY_PREFIX {
                    return Err(quota_storage_api::StorageError::Generic(anyhow::anyhow!(
                        "supported key prefix '{}' but found key prefix '{}'",
                        Self::KEY_PREFIX,
                        key_prefix
                    )));
                }

                $(
                    this.$element = $crate::keys::deserialize(bytes)?;
                )+

                Ok(this)
            }

            #[inline]
            fn serialized_length(&self) -> usize {
                let mut serialized_length = $crate::keys::KeyPrefix::SERIALIZED_LENGTH;
                $(
                    serialized_length += $crate::keys::KeyCodec::serialized_length(&self.$element);
                )+
                serialized_length
            }
        }
    })
}

pub(crate) use define_table_key;

pub(crate) trait KeyCodec: Sized {
    fn encode<B: BufMut>(&self, target: &mut B);
    fn decode<B: Buf>(source: &mut B) -> crate::Result<Self>;

    fn serialized_length(&self) -> usize;
}

impl KeyCodec for ByteString {
    fn encode<B: BufMut>(&self, target: &mut B) {
        write_delimited(self, target);
    }

    fn decode<B: Buf>(source: &mut B) -> crate::Result<Self> {
        let bytes = read_delimited(source)?;
        ByteString::try_from(bytes).map_err(|err| StorageError::Conversion(err.into()))
    }

    fn serialized_length(&self) -> usize {
        self.len() + encoded_len_varint(self.len() as u64)
    }
}

impl KeyCodec for ReservationId {
    fn encode<B: BufMut>(&self, target: &mut B) {
        // ulids are big-endian, hence keys of one tenant are ordered by creation time
        target.put_slice(&self.to_bytes());
    }

    fn decode<B: Buf>(source: &mut B) -> crate::Result<Self> {
        if source.remaining() < ReservationId::SIZE_IN_BYTES {
            return Err(StorageError::DataIntegrityError);
        }
        let bytes = source.copy_to_bytes(ReservationId::SIZE_IN_BYTES);
        ReservationId::from_slice(&bytes).map_err(|err| StorageError::Conversion(err.into()))
    }

    fn serialized_length(&self) -> usize {
        ReservationId::SIZE_IN_BYTES
    }
}

///
/// Blanket implementation for Option.
///
impl<T: KeyCodec> KeyCodec for Option<T> {
    fn encode<B: BufMut>(&self, target: &mut B) {
        if let Some(t) = self {
            t.encode(target);
        }
    }

    fn decode<B: Buf>(source: &mut B) -> crate::Result<Self> {
        if !source.has_remaining() {
            return Ok(None);
        }
        let res = T::decode(source)?;
        Ok(Some(res))
    }

    fn serialized_length(&self) -> usize {
        self.as_ref().map(|v| v.serialized_length()).unwrap_or(0)
    }
}

#[inline]
fn write_delimited<B: BufMut>(source: impl AsRef<[u8]>, target: &mut B) {
    let source = source.as_ref();
    prost::encoding::encode_varint(source.len() as u64, target);
    target.put(source);
}

#[inline]
fn read_delimited<B: Buf>(source: &mut B) -> crate::Result<Bytes> {
    let len = prost::encoding::decode_varint(source)
        .map_err(|error| StorageError::Generic(error.into()))?;
    let len = usize::try_from(len).map_err(|_| StorageError::DataIntegrityError)?;
    if source.remaining() < len {
        return Err(StorageError::DataIntegrityError);
    }
    // note: this is a zero-copy when the source is bytes::Bytes.
    Ok(source.copy_to_bytes(len))
}

#[inline]
pub(crate) fn serialize<T: KeyCodec, B: BufMut>(what: &T, target: &mut B) {
    what.encode(target);
}

#[inline]
pub(crate) fn deserialize<T: KeyCodec, B: Buf>(source: &mut B) -> crate::Result<T> {
    T::decode(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use quota_test_util::let_assert;
    use strum::IntoEnumIterator;

    #[test]
    fn write_read_round_trip() {
        let mut buf = BytesMut::new();
        write_delimited("hello", &mut buf);
        write_delimited(" ", &mut buf);
        write_delimited("world", &mut buf);

        let mut got = buf.freeze();
        assert_eq!(read_delimited(&mut got).unwrap(), "hello");
        assert_eq!(read_delimited(&mut got).unwrap(), " ");
        assert_eq!(read_delimited(&mut got).unwrap(), "world");
    }

    fn concat(a: &'static str, b: &'static str) -> Bytes {
        let mut buf = BytesMut::new();
        write_delimited(a, &mut buf);
        write_delimited(b, &mut buf);
        buf.freeze()
    }

    #[test]
    fn write_delim_keeps_lexicographical_sorting() {
        assert!(concat("a", "b") < concat("a", "c"));
        assert!(concat("a", "") < concat("d", ""));
    }

    define_table_key!(
        TableKind::Usage,
        KeyPrefix::Usage,
        TestKey(tenant_id: ByteString, reservation_id: ReservationId)
    );

    #[test]
    fn partial_key_is_prefix_of_complete_key() {
        let id = ReservationId::new();
        let prefix = TestKey::default()
            .tenant_id(ByteString::from_static("acme"))
            .serialize();
        let complete = TestKey::default()
            .tenant_id(ByteString::from_static("acme"))
            .reservation_id(id)
            .serialize();
        let other_tenant = TestKey::default()
            .tenant_id(ByteString::from_static("acme2"))
            .reservation_id(id)
            .serialize();

        assert!(complete.starts_with(&prefix));
        assert!(!other_tenant.starts_with(&prefix));

        let mut complete = complete.freeze();
        let key = TestKey::deserialize_from(&mut complete).unwrap();
        assert!(key.is_complete());
        assert_eq!(key.reservation_id, Some(id));
    }

    #[test]
    fn key_prefix_mismatch() {
        let mut buffer = TestKey::default()
            .tenant_id(ByteString::from_static("acme"))
            .serialize();
        // overwrite the key prefix
        KeyPrefix::Reservation.serialize(
            &mut buffer
                .get_mut(0..KeyPrefix::SERIALIZED_LENGTH)
                .expect("key prefix must be present"),
        );

        let result = TestKey::deserialize_from(&mut buffer);

        let_assert!(Err(StorageError::Generic(err)) = result);
        assert_eq!(
            err.to_string(),
            format!(
                "supported key prefix '{}' but found key prefix '{}'",
                KeyPrefix::Usage,
                KeyPrefix::Reservation
            )
        );
    }

    /// Tests that the [`KeyPrefix`] has a bijective byte representation.
    #[test]
    fn bijective_byte_representation() {
        let mut buffer = BytesMut::with_capacity(2);

        for key_prefix in KeyPrefix::iter() {
            buffer.clear();

            key_prefix.serialize(&mut buffer);
            let deserialized_key_prefix =
                KeyPrefix::deserialize(&mut buffer).expect("valid byte representation");
            assert_eq!(key_prefix, deserialized_key_prefix);
        }
    }
}
