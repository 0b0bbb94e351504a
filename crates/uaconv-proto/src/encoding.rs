// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary encoding of built-in types.
//!
//! All multi-byte values are little-endian. Strings, byte strings and arrays
//! carry an `i32` length prefix where `-1` denotes null.
//!
//! ```text
//! ┌──────────┬───────────────────────┐
//! │ i32 len  │ len bytes / elements  │   String, ByteString, Array
//! └──────────┴───────────────────────┘
//! ┌──────────────────────────────────┐
//! │ i64 ticks (100ns since 1601-01-01)│  DateTime
//! └──────────────────────────────────┘
//! ```
//!
//! Structures are encoded field by field in declaration order; the
//! [`structure!`] macro generates both directions for them.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};

// =============================================================================
// Traits
// =============================================================================

/// A value that can be written in OPC UA binary form.
pub trait Encode {
    /// Appends the binary form of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Encodes into a fresh buffer.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// A value that can be read from OPC UA binary form.
pub trait Decode: Sized {
    /// Reads one value from the front of `buf`, advancing it.
    fn decode(buf: &mut Bytes) -> CodecResult<Self>;
}

/// Fails with [`CodecError::Truncated`] unless `buf` holds `needed` bytes.
#[inline]
pub(crate) fn ensure(buf: &Bytes, needed: usize) -> CodecResult<()> {
    if buf.remaining() < needed {
        Err(CodecError::truncated(needed, buf.remaining()))
    } else {
        Ok(())
    }
}

/// Reads an `i32` length prefix. `None` means null.
pub(crate) fn decode_length(buf: &mut Bytes, what: &'static str) -> CodecResult<Option<usize>> {
    let length = i32::decode(buf)?;
    if length == -1 {
        return Ok(None);
    }
    if length < 0 || length as usize > buf.remaining() {
        return Err(CodecError::InvalidLength {
            what,
            length: length as i64,
        });
    }
    Ok(Some(length as usize))
}

// =============================================================================
// Primitives
// =============================================================================

macro_rules! primitive {
    ($ty:ty, $size:expr, $put:ident, $get:ident) => {
        impl Encode for $ty {
            #[inline]
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode(buf: &mut Bytes) -> CodecResult<Self> {
                ensure(buf, $size)?;
                Ok(buf.$get())
            }
        }
    };
}

primitive!(u8, 1, put_u8, get_u8);
primitive!(i8, 1, put_i8, get_i8);
primitive!(u16, 2, put_u16_le, get_u16_le);
primitive!(i16, 2, put_i16_le, get_i16_le);
primitive!(u32, 4, put_u32_le, get_u32_le);
primitive!(i32, 4, put_i32_le, get_i32_le);
primitive!(u64, 8, put_u64_le, get_u64_le);
primitive!(i64, 8, put_i64_le, get_i64_le);
primitive!(f32, 4, put_f32_le, get_f32_le);
primitive!(f64, 8, put_f64_le, get_f64_le);

impl Encode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        Ok(u8::decode(buf)? != 0)
    }
}

// =============================================================================
// String
// =============================================================================

/// Writes a string; the empty string is written as null.
pub fn encode_str(value: &str, buf: &mut BytesMut) {
    if value.is_empty() {
        (-1i32).encode(buf);
    } else {
        (value.len() as i32).encode(buf);
        buf.put_slice(value.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        encode_str(self, buf);
    }
}

impl Decode for String {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        match decode_length(buf, "String")? {
            None => Ok(String::new()),
            Some(len) => {
                let raw = buf.split_to(len);
                String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
            }
        }
    }
}

// =============================================================================
// ByteString
// =============================================================================

/// OPC UA ByteString. Empty and null are treated alike.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ByteString(pub Vec<u8>);

impl ByteString {
    /// The null byte string.
    pub const fn null() -> Self {
        Self(Vec::new())
    }

    /// Returns `true` if the byte string is null or empty.
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteString({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Encode for ByteString {
    fn encode(&self, buf: &mut BytesMut) {
        if self.0.is_empty() {
            (-1i32).encode(buf);
        } else {
            (self.0.len() as i32).encode(buf);
            buf.put_slice(&self.0);
        }
    }
}

impl Decode for ByteString {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        match decode_length(buf, "ByteString")? {
            None => Ok(Self::null()),
            Some(len) => Ok(Self(buf.split_to(len).to_vec())),
        }
    }
}

// =============================================================================
// DateTime
// =============================================================================

const TICKS_PER_SECOND: i64 = 10_000_000;
const SECONDS_1601_TO_1970: i64 = 11_644_473_600;

/// Converts a timestamp to OPC UA ticks (100 ns since 1601-01-01 UTC).
pub fn to_ticks(value: &DateTime<Utc>) -> i64 {
    let seconds = value.timestamp() + SECONDS_1601_TO_1970;
    let ticks = seconds
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(i64::from(value.timestamp_subsec_nanos() / 100));
    ticks.max(0)
}

/// The current time at tick precision, so it survives an encode/decode.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(7)
}

/// Converts OPC UA ticks to a timestamp. Non-positive ticks map to 1601-01-01.
pub fn from_ticks(ticks: i64) -> CodecResult<DateTime<Utc>> {
    let unix = ticks.max(0) - SECONDS_1601_TO_1970 * TICKS_PER_SECOND;
    let seconds = unix.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(seconds, nanos).ok_or(CodecError::InvalidDateTime(ticks))
}

impl Encode for DateTime<Utc> {
    fn encode(&self, buf: &mut BytesMut) {
        to_ticks(self).encode(buf);
    }
}

impl Decode for DateTime<Utc> {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        from_ticks(i64::decode(buf)?)
    }
}

// =============================================================================
// Guid
// =============================================================================

impl Encode for Uuid {
    fn encode(&self, buf: &mut BytesMut) {
        let (data1, data2, data3, data4) = self.as_fields();
        data1.encode(buf);
        data2.encode(buf);
        data3.encode(buf);
        buf.put_slice(data4);
    }
}

impl Decode for Uuid {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        ensure(buf, 16)?;
        let data1 = buf.get_u32_le();
        let data2 = buf.get_u16_le();
        let data3 = buf.get_u16_le();
        let mut data4 = [0u8; 8];
        buf.copy_to_slice(&mut data4);
        Ok(Uuid::from_fields(data1, data2, data3, &data4))
    }
}

// =============================================================================
// Arrays
// =============================================================================

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        (self.len() as i32).encode(buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(buf: &mut Bytes) -> CodecResult<Self> {
        match decode_length(buf, "Array")? {
            None => Ok(Vec::new()),
            Some(len) => {
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(T::decode(buf)?);
                }
                Ok(items)
            }
        }
    }
}

// =============================================================================
// Generators
// =============================================================================

/// Declares a structure encoded field by field in declaration order.
macro_rules! structure {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::encoding::Encode for $name {
            #[allow(unused_variables)]
            fn encode(&self, buf: &mut ::bytes::BytesMut) {
                $( $crate::encoding::Encode::encode(&self.$field, buf); )*
            }
        }

        impl $crate::encoding::Decode for $name {
            #[allow(unused_variables)]
            fn decode(buf: &mut ::bytes::Bytes) -> $crate::error::CodecResult<Self> {
                Ok(Self {
                    $( $field: <$ty as $crate::encoding::Decode>::decode(buf)?, )*
                })
            }
        }
    };
}

/// Declares an enumeration encoded as `i32`.
macro_rules! enumeration {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Default,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Returns the wire value.
            pub const fn value(self) -> i32 {
                self as i32
            }

            /// Looks up a variant by wire value.
            pub fn from_value(value: i32) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl $crate::encoding::Encode for $name {
            fn encode(&self, buf: &mut ::bytes::BytesMut) {
                $crate::encoding::Encode::encode(&self.value(), buf);
            }
        }

        impl $crate::encoding::Decode for $name {
            fn decode(buf: &mut ::bytes::Bytes) -> $crate::error::CodecResult<Self> {
                let value = <i32 as $crate::encoding::Decode>::decode(buf)?;
                Self::from_value(value).ok_or($crate::error::CodecError::InvalidEnumValue {
                    name: stringify!($name),
                    value,
                })
            }
        }
    };
}

pub(crate) use enumeration;
pub(crate) use structure;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_string_null_and_value() {
        let mut buf = BytesMut::new();
        String::new().encode(&mut buf);
        "abc".to_string().encode(&mut buf);
        assert_eq!(&buf[..4], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(&buf[4..], &[3, 0, 0, 0, b'a', b'b', b'c']);

        let mut bytes = buf.freeze();
        assert_eq!(String::decode(&mut bytes).unwrap(), "");
        assert_eq!(String::decode(&mut bytes).unwrap(), "abc");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_string_length_beyond_input() {
        let mut bytes = Bytes::from_static(&[10, 0, 0, 0, b'a']);
        assert!(matches!(
            String::decode(&mut bytes),
            Err(CodecError::InvalidLength { what: "String", length: 10 })
        ));
    }

    #[test]
    fn test_truncated_primitive() {
        let mut bytes = Bytes::from_static(&[1, 2]);
        assert_eq!(u32::decode(&mut bytes), Err(CodecError::truncated(4, 2)));
    }

    #[test]
    fn test_datetime_epoch() {
        let unix_epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(to_ticks(&unix_epoch), 116_444_736_000_000_000);
        assert_eq!(from_ticks(116_444_736_000_000_000).unwrap(), unix_epoch);
        assert_eq!(from_ticks(0).unwrap(), Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(from_ticks(-5).unwrap(), from_ticks(0).unwrap());
    }

    #[test]
    fn test_datetime_keeps_100ns_precision() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap();
        let mut bytes = ts.to_bytes();
        assert_eq!(DateTime::<Utc>::decode(&mut bytes).unwrap(), ts);
    }

    #[test]
    fn test_now_survives_roundtrip() {
        for _ in 0..50 {
            let ts = now();
            assert_eq!(ts.timestamp_subsec_nanos() % 100, 0);
            let mut bytes = ts.to_bytes();
            assert_eq!(DateTime::<Utc>::decode(&mut bytes).unwrap(), ts);
        }
    }

    #[test]
    fn test_guid_layout() {
        let guid = Uuid::parse_str("72962b91-fa75-4ae6-8d28-b404dc7daf63").unwrap();
        let bytes = guid.to_bytes();
        assert_eq!(&bytes[..4], &[0x91, 0x2b, 0x96, 0x72]);
        assert_eq!(&bytes[4..6], &[0x75, 0xfa]);
        assert_eq!(&bytes[8..], &[0x8d, 0x28, 0xb4, 0x04, 0xdc, 0x7d, 0xaf, 0x63]);
        let mut bytes = bytes;
        assert_eq!(Uuid::decode(&mut bytes).unwrap(), guid);
    }

    #[test]
    fn test_array_null_decodes_empty() {
        let mut bytes = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]);
        assert!(Vec::<u32>::decode(&mut bytes).unwrap().is_empty());
    }

    #[test]
    fn test_byte_string() {
        let value = ByteString::from(vec![1, 2, 3]);
        let mut bytes = value.to_bytes();
        assert_eq!(bytes.len(), 7);
        assert_eq!(ByteString::decode(&mut bytes).unwrap(), value);
        assert_eq!(format!("{:?}", value), "ByteString(3 bytes)");
    }
}
