//! Key and value encoding for column families.
//!
//! Keys are encoded so that lexicographic byte order matches the natural order of
//! the typed key. This is what makes iteration and prefix scans ordered.
//!
//! # Key Format Specification (v1)
//!
//! | Type | Encoding |
//! |------|----------|
//! | `u64` | 8 bytes big-endian |
//! | `i64` | 8 bytes big-endian with the sign bit flipped |
//! | `i32` | 4 bytes big-endian with the sign bit flipped |
//! | `String` | UTF-8 bytes, `0x00` escaped as `0x00 0xFF`, terminated by `0x00` |
//! | `(A, B)`, `(A, B, C)` | concatenation of the component encodings |
//! | [`DbForeignKey<K>`] | 2-byte referenced family id, then the encoding of `K` |
//!
//! The string terminator keeps composite keys prefix-free: the prefix `("Q", 2)`
//! never matches keys of queue `"QQ"`.
//!
//! Values are encoded with bincode unless the type says otherwise
//! ([`DbNil`] is empty, [`DbForeignKey`] uses its key encoding).

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::column_family::ColumnFamilyName;
use crate::error::{StateError, StateResult};

/// Escape byte following a literal `0x00` inside an encoded string.
const STRING_ESCAPE: u8 = 0xFF;

/// Terminator of an encoded string.
const STRING_TERMINATOR: u8 = 0x00;

/// A reference from a stored key or value into another column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// The family the referenced key must exist in.
    pub column_family: ColumnFamilyName,
    /// The encoded referenced key.
    pub key: Vec<u8>,
}

/// A typed, order-preserving column family key.
pub trait DbKey: Sized + Clone + fmt::Debug {
    /// Append the encoding of this key to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>);

    /// Decode a key from the front of `bytes`, advancing the slice.
    fn decode_from(bytes: &mut &[u8]) -> Option<Self>;

    /// Collect the foreign keys this key contains.
    fn foreign_keys(&self, _refs: &mut Vec<ForeignKeyRef>) {}

    /// Encode this key into a fresh buffer.
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Decode a key that must span all of `bytes`.
    fn decode(mut bytes: &[u8]) -> Option<Self> {
        let key = Self::decode_from(&mut bytes)?;
        bytes.is_empty().then_some(key)
    }
}

/// A typed column family value.
pub trait DbValue: Sized + Clone {
    fn to_bytes(&self) -> StateResult<Vec<u8>>;

    fn from_bytes(bytes: &[u8]) -> StateResult<Self>;

    /// Collect the foreign keys this value contains.
    fn foreign_keys(&self, _refs: &mut Vec<ForeignKeyRef>) {}
}

/// Implement [`DbValue`] for serde types using bincode.
#[macro_export]
macro_rules! impl_bincode_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::db::DbValue for $ty {
                fn to_bytes(&self) -> $crate::error::StateResult<Vec<u8>> {
                    $crate::db::encode_bincode(self)
                }

                fn from_bytes(bytes: &[u8]) -> $crate::error::StateResult<Self> {
                    $crate::db::decode_bincode(bytes)
                }
            }
        )+
    };
}

/// Encode a serde value with bincode.
pub fn encode_bincode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a serde value with bincode.
pub fn decode_bincode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

impl_bincode_value!(u64, i64, i32, String);

fn take<const N: usize>(bytes: &mut &[u8]) -> Option<[u8; N]> {
    if bytes.len() < N {
        return None;
    }
    let (head, tail) = bytes.split_at(N);
    *bytes = tail;
    head.try_into().ok()
}

impl DbKey for u64 {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        take::<8>(bytes).map(u64::from_be_bytes)
    }
}

impl DbKey for i64 {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&((*self as u64) ^ (1 << 63)).to_be_bytes());
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        take::<8>(bytes).map(|b| (u64::from_be_bytes(b) ^ (1 << 63)) as i64)
    }
}

impl DbKey for i32 {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&((*self as u32) ^ (1 << 31)).to_be_bytes());
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        take::<4>(bytes).map(|b| (u32::from_be_bytes(b) ^ (1 << 31)) as i32)
    }
}

impl DbKey for String {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        for &byte in self.as_bytes() {
            buf.push(byte);
            if byte == STRING_TERMINATOR {
                buf.push(STRING_ESCAPE);
            }
        }
        buf.push(STRING_TERMINATOR);
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        let mut out = Vec::new();
        let mut i = 0;
        loop {
            let byte = *bytes.get(i)?;
            if byte == STRING_TERMINATOR {
                if bytes.get(i + 1) == Some(&STRING_ESCAPE) {
                    out.push(STRING_TERMINATOR);
                    i += 2;
                    continue;
                }
                *bytes = &bytes[i + 1..];
                return String::from_utf8(out).ok();
            }
            out.push(byte);
            i += 1;
        }
    }
}

impl<A: DbKey, B: DbKey> DbKey for (A, B) {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.0.encode_into(buf);
        self.1.encode_into(buf);
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        Some((A::decode_from(bytes)?, B::decode_from(bytes)?))
    }

    fn foreign_keys(&self, refs: &mut Vec<ForeignKeyRef>) {
        self.0.foreign_keys(refs);
        self.1.foreign_keys(refs);
    }
}

impl<A: DbKey, B: DbKey, C: DbKey> DbKey for (A, B, C) {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        self.0.encode_into(buf);
        self.1.encode_into(buf);
        self.2.encode_into(buf);
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        Some((
            A::decode_from(bytes)?,
            B::decode_from(bytes)?,
            C::decode_from(bytes)?,
        ))
    }

    fn foreign_keys(&self, refs: &mut Vec<ForeignKeyRef>) {
        self.0.foreign_keys(refs);
        self.1.foreign_keys(refs);
        self.2.foreign_keys(refs);
    }
}

/// A key that must exist in another column family.
///
/// Existence is enforced at write time by a lookup in the referenced family,
/// never by following an in-memory pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbForeignKey<K> {
    inner: K,
    references: ColumnFamilyName,
}

impl<K: DbKey> DbForeignKey<K> {
    pub fn new(inner: K, references: ColumnFamilyName) -> Self {
        Self { inner, references }
    }

    /// The referenced key.
    pub fn inner(&self) -> &K {
        &self.inner
    }

    pub fn into_inner(self) -> K {
        self.inner
    }

    /// The family the key must exist in.
    pub fn references(&self) -> ColumnFamilyName {
        self.references
    }

    fn reference(&self) -> ForeignKeyRef {
        ForeignKeyRef {
            column_family: self.references,
            key: self.inner.encode(),
        }
    }
}

impl<K: DbKey> DbKey for DbForeignKey<K> {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.references.id().to_be_bytes());
        self.inner.encode_into(buf);
    }

    fn decode_from(bytes: &mut &[u8]) -> Option<Self> {
        let references = ColumnFamilyName::from_id(u16::from_be_bytes(take::<2>(bytes)?))?;
        Some(Self {
            inner: K::decode_from(bytes)?,
            references,
        })
    }

    fn foreign_keys(&self, refs: &mut Vec<ForeignKeyRef>) {
        refs.push(self.reference());
    }
}

impl<K: DbKey> DbValue for DbForeignKey<K> {
    fn to_bytes(&self) -> StateResult<Vec<u8>> {
        Ok(self.encode())
    }

    fn from_bytes(bytes: &[u8]) -> StateResult<Self> {
        <Self as DbKey>::decode(bytes)
            .ok_or_else(|| StateError::Serialization("malformed foreign key value".into()))
    }

    fn foreign_keys(&self, refs: &mut Vec<ForeignKeyRef>) {
        refs.push(self.reference());
    }
}

/// The empty value, for families where the key carries all information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbNil;

impl DbValue for DbNil {
    fn to_bytes(&self) -> StateResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn from_bytes(_bytes: &[u8]) -> StateResult<Self> {
        Ok(DbNil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_order_matches_bytes() {
        let keys = [0u64, 1, 255, 256, u64::MAX / 2, u64::MAX];
        for pair in keys.windows(2) {
            assert!(pair[0].encode() < pair[1].encode());
        }
    }

    #[test]
    fn test_signed_order_matches_bytes() {
        let keys = [i64::MIN, -2, -1, 0, 1, i64::MAX];
        for pair in keys.windows(2) {
            assert!(pair[0].encode() < pair[1].encode());
        }
        let keys = [i32::MIN, -1, 0, 7, i32::MAX];
        for pair in keys.windows(2) {
            assert!(pair[0].encode() < pair[1].encode());
        }
        assert_eq!(i32::decode(&(-5i32).encode()), Some(-5));
        assert_eq!(i64::decode(&(-5i64).encode()), Some(-5));
    }

    #[test]
    fn test_string_order_is_lexicographic() {
        let keys = ["", "a", "a\0", "ab", "b"].map(String::from);
        for pair in keys.windows(2) {
            assert!(pair[0].encode() < pair[1].encode(), "{:?}", pair);
        }
    }

    #[test]
    fn test_string_with_nul_decodes() {
        let key = String::from("a\0b");
        assert_eq!(String::decode(&key.encode()), Some(key));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = 5u64.encode();
        bytes.push(0);
        assert_eq!(u64::decode(&bytes), None);
        assert_eq!(u64::decode(&[1, 2, 3]), None);
    }

    #[test]
    fn test_string_component_is_prefix_free() {
        let queue_q = (String::from("Q"), 2i32).encode();
        let queue_qq = (String::from("QQ"), 2i32, 1u64).encode();
        assert!(!queue_qq.starts_with(&queue_q));

        let entry = (String::from("Q"), 2i32, 10u64).encode();
        assert!(entry.starts_with(&queue_q));
    }

    #[test]
    fn test_composite_decode() {
        let key = (String::from("deploy"), 3i32, 11u64);
        assert_eq!(<(String, i32, u64)>::decode(&key.encode()), Some(key));
    }

    #[test]
    fn test_foreign_key_reports_reference() {
        let fk = DbForeignKey::new(7u64, ColumnFamilyName::CommandDistributionRecord);
        let mut refs = Vec::new();
        (fk.clone(), 2i32).foreign_keys(&mut refs);
        assert_eq!(
            refs,
            vec![ForeignKeyRef {
                column_family: ColumnFamilyName::CommandDistributionRecord,
                key: 7u64.encode(),
            }]
        );
        let decoded = <DbForeignKey<u64> as DbValue>::from_bytes(&fk.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, fk);
    }

    #[test]
    fn test_nil_value_is_empty() {
        assert!(DbNil.to_bytes().unwrap().is_empty());
    }
}
