//! Fixed-width backing storage for published field values.
//!
//! Every scalar lives in an atomic of its native width so the publish cycle
//! can change it with a single read-modify-write and any concurrent reader
//! sees either the old or the new value, never a mix. Byte sequences are
//! immutable once stored.

use crate::uadp::types::{put_byte_sequence, Transform, UaValue};
use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering,
};

#[derive(Debug)]
pub enum FieldStorage {
    Boolean(AtomicBool),
    Byte(AtomicU8),
    UInt16(AtomicU16),
    Int32(AtomicI32),
    UInt32(AtomicU32),
    Int64(AtomicI64),
    UInt64(AtomicU64),
    /// f64 bit pattern
    Double(AtomicU64),
    Text(Box<str>),
    Bytes(Box<[u8]>),
}

impl FieldStorage {
    /// Build storage holding `value`. The caller has already checked that the
    /// value conforms to the field type.
    pub fn from_value(value: &UaValue) -> Self {
        match value {
            UaValue::Boolean(v) => FieldStorage::Boolean(AtomicBool::new(*v)),
            UaValue::Byte(v) => FieldStorage::Byte(AtomicU8::new(*v)),
            UaValue::UInt16(v) => FieldStorage::UInt16(AtomicU16::new(*v)),
            UaValue::Int32(v) => FieldStorage::Int32(AtomicI32::new(*v)),
            UaValue::UInt32(v) => FieldStorage::UInt32(AtomicU32::new(*v)),
            UaValue::Int64(v) => FieldStorage::Int64(AtomicI64::new(*v)),
            UaValue::UInt64(v) => FieldStorage::UInt64(AtomicU64::new(*v)),
            UaValue::Double(v) => FieldStorage::Double(AtomicU64::new(v.to_bits())),
            UaValue::String(s) => FieldStorage::Text(s.clone().into_boxed_str()),
            UaValue::ByteString(b) => FieldStorage::Bytes(b.clone().into_boxed_slice()),
        }
    }

    pub fn load(&self) -> UaValue {
        match self {
            FieldStorage::Boolean(a) => UaValue::Boolean(a.load(Ordering::Acquire)),
            FieldStorage::Byte(a) => UaValue::Byte(a.load(Ordering::Acquire)),
            FieldStorage::UInt16(a) => UaValue::UInt16(a.load(Ordering::Acquire)),
            FieldStorage::Int32(a) => UaValue::Int32(a.load(Ordering::Acquire)),
            FieldStorage::UInt32(a) => UaValue::UInt32(a.load(Ordering::Acquire)),
            FieldStorage::Int64(a) => UaValue::Int64(a.load(Ordering::Acquire)),
            FieldStorage::UInt64(a) => UaValue::UInt64(a.load(Ordering::Acquire)),
            FieldStorage::Double(a) => UaValue::Double(f64::from_bits(a.load(Ordering::Acquire))),
            FieldStorage::Text(s) => UaValue::String(s.to_string()),
            FieldStorage::Bytes(b) => UaValue::ByteString(b.to_vec()),
        }
    }

    /// Whether a counter transform can be applied in place.
    pub fn is_atomic_counter(&self) -> bool {
        matches!(
            self,
            FieldStorage::Byte(_)
                | FieldStorage::UInt16(_)
                | FieldStorage::Int32(_)
                | FieldStorage::UInt32(_)
                | FieldStorage::Int64(_)
                | FieldStorage::UInt64(_)
        )
    }

    /// One atomic wrapping step. Returns false when the storage is not an
    /// integer, which freeze validation rules out for dynamic fields.
    pub fn apply(&self, transform: Transform) -> bool {
        let up = transform == Transform::Increment;
        match self {
            FieldStorage::Byte(a) => step(up, || a.fetch_add(1, Ordering::AcqRel), || a.fetch_sub(1, Ordering::AcqRel)),
            FieldStorage::UInt16(a) => step(up, || a.fetch_add(1, Ordering::AcqRel), || a.fetch_sub(1, Ordering::AcqRel)),
            FieldStorage::Int32(a) => step(up, || a.fetch_add(1, Ordering::AcqRel), || a.fetch_sub(1, Ordering::AcqRel)),
            FieldStorage::UInt32(a) => step(up, || a.fetch_add(1, Ordering::AcqRel), || a.fetch_sub(1, Ordering::AcqRel)),
            FieldStorage::Int64(a) => step(up, || a.fetch_add(1, Ordering::AcqRel), || a.fetch_sub(1, Ordering::AcqRel)),
            FieldStorage::UInt64(a) => step(up, || a.fetch_add(1, Ordering::AcqRel), || a.fetch_sub(1, Ordering::AcqRel)),
            _ => return false,
        }
        true
    }

    /// Append the little-endian payload.
    pub fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            FieldStorage::Text(s) => put_byte_sequence(out, s.as_bytes()),
            FieldStorage::Bytes(b) => put_byte_sequence(out, b),
            scalar => {
                let mut buf = [0u8; 8];
                let n = scalar.write_scalar(&mut buf);
                out.extend_from_slice(&buf[..n]);
            }
        }
    }

    /// Overwrite a pre-encoded scalar payload in place. `dst` must be exactly
    /// the width of the scalar; byte sequences never change and are skipped.
    pub fn patch_payload(&self, dst: &mut [u8]) {
        let mut buf = [0u8; 8];
        let n = self.write_scalar(&mut buf);
        if n == dst.len() {
            dst.copy_from_slice(&buf[..n]);
        }
    }

    /// Single atomic load of a scalar, written little-endian into `buf`.
    fn write_scalar(&self, buf: &mut [u8; 8]) -> usize {
        fn put(buf: &mut [u8; 8], bytes: &[u8]) -> usize {
            buf[..bytes.len()].copy_from_slice(bytes);
            bytes.len()
        }
        match self {
            FieldStorage::Boolean(a) => put(buf, &[a.load(Ordering::Acquire) as u8]),
            FieldStorage::Byte(a) => put(buf, &[a.load(Ordering::Acquire)]),
            FieldStorage::UInt16(a) => put(buf, &a.load(Ordering::Acquire).to_le_bytes()),
            FieldStorage::Int32(a) => put(buf, &a.load(Ordering::Acquire).to_le_bytes()),
            FieldStorage::UInt32(a) => put(buf, &a.load(Ordering::Acquire).to_le_bytes()),
            FieldStorage::Int64(a) => put(buf, &a.load(Ordering::Acquire).to_le_bytes()),
            FieldStorage::UInt64(a) => put(buf, &a.load(Ordering::Acquire).to_le_bytes()),
            FieldStorage::Double(a) => put(buf, &a.load(Ordering::Acquire).to_le_bytes()),
            FieldStorage::Text(_) | FieldStorage::Bytes(_) => 0,
        }
    }
}

#[inline(always)]
fn step<T>(up: bool, add: impl FnOnce() -> T, sub: impl FnOnce() -> T) {
    if up {
        add();
    } else {
        sub();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uadp::types::TypeTag;

    #[test]
    fn test_apply_wraps_native_width() {
        let seq = FieldStorage::from_value(&UaValue::UInt16(u16::MAX));
        assert!(seq.apply(Transform::Increment));
        assert_eq!(seq.load(), UaValue::UInt16(0));

        let offset = FieldStorage::from_value(&UaValue::UInt32(0));
        assert!(offset.apply(Transform::Decrement));
        assert_eq!(offset.load(), UaValue::UInt32(u32::MAX));
    }

    #[test]
    fn test_apply_rejects_non_integer() {
        let name = FieldStorage::from_value(&UaValue::String("Arty A7_-_".into()));
        assert!(!name.apply(Transform::Increment));
        assert!(!name.is_atomic_counter());
    }

    #[test]
    fn test_patch_payload_matches_encode() {
        let storage = FieldStorage::from_value(&UaValue::UInt64(0x12345));
        let mut encoded = Vec::new();
        storage.encode_payload(&mut encoded);

        let mut patched = [0u8; 8];
        storage.patch_payload(&mut patched);
        assert_eq!(&encoded[..], &patched[..]);
    }

    #[test]
    fn test_patch_payload_ignores_wrong_width() {
        let storage = FieldStorage::from_value(&UaValue::UInt16(7));
        let mut dst = [0xAAu8; 4];
        storage.patch_payload(&mut dst);
        assert_eq!(dst, [0xAA; 4]);
    }

    #[test]
    fn test_byte_sequence_payload_includes_prefix() {
        let gm = FieldStorage::from_value(&UaValue::ByteString(b"12345678".to_vec()));
        let mut out = Vec::new();
        gm.encode_payload(&mut out);
        assert_eq!(out.len(), TypeTag::FixedByteString(8).static_width().unwrap());
        assert_eq!(gm.load(), UaValue::ByteString(b"12345678".to_vec()));
    }
}
