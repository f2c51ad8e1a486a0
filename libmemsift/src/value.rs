//! Typed values read from target memory.
//!
//! Every match carries the value it had when last observed. Scalars are kept
//! inline; `Bytes` owns its buffer. All decoding is little-endian and
//! tolerant of unaligned source offsets.

use std::fmt;

use bitflags::bitflags;

/// Closed set of match types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bytes,
}

impl TypeTag {
    /// Width in bytes; `None` for `Bytes` (length is per match).
    pub fn width(self) -> Option<usize> {
        match self {
            TypeTag::U8 | TypeTag::I8 => Some(1),
            TypeTag::U16 | TypeTag::I16 => Some(2),
            TypeTag::U32 | TypeTag::I32 | TypeTag::F32 => Some(4),
            TypeTag::U64 | TypeTag::I64 | TypeTag::F64 => Some(8),
            TypeTag::Bytes => None,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, TypeTag::F32 | TypeTag::F64 | TypeTag::Bytes)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, TypeTag::I8 | TypeTag::I16 | TypeTag::I32 | TypeTag::I64)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::U8 => "U8",
            TypeTag::U16 => "U16",
            TypeTag::U32 => "U32",
            TypeTag::U64 => "U64",
            TypeTag::I8 => "I8",
            TypeTag::I16 => "I16",
            TypeTag::I32 => "I32",
            TypeTag::I64 => "I64",
            TypeTag::F32 => "F32",
            TypeTag::F64 => "F64",
            TypeTag::Bytes => "BYTES",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Set of scannable types requested by one scan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeSet: u32 {
        const U8 = 1;
        const U16 = 1 << 1;
        const U32 = 1 << 2;
        const U64 = 1 << 3;
        const I8 = 1 << 4;
        const I16 = 1 << 5;
        const I32 = 1 << 6;
        const I64 = 1 << 7;
        const F32 = 1 << 8;
        const F64 = 1 << 9;
    }
}

impl TypeSet {
    pub const INTEGER: TypeSet = TypeSet::from_bits_truncate(0xff);

    /// Scan order: unsigned widths ascending, signed widths ascending,
    /// then floats.
    pub const SCAN_ORDER: [(TypeSet, TypeTag); 10] = [
        (TypeSet::U8, TypeTag::U8),
        (TypeSet::U16, TypeTag::U16),
        (TypeSet::U32, TypeTag::U32),
        (TypeSet::U64, TypeTag::U64),
        (TypeSet::I8, TypeTag::I8),
        (TypeSet::I16, TypeTag::I16),
        (TypeSet::I32, TypeTag::I32),
        (TypeSet::I64, TypeTag::I64),
        (TypeSet::F32, TypeTag::F32),
        (TypeSet::F64, TypeTag::F64),
    ];

    /// Width of the narrowest requested type, used when the caller leaves
    /// the step unspecified.
    pub fn narrowest_width(self) -> Option<usize> {
        TypeSet::SCAN_ORDER
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .filter_map(|(_, tag)| tag.width())
            .min()
    }
}

/// A value observed in the target.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Box<[u8]>),
}

macro_rules! scalar_dispatch {
    ($value:expr, $v:ident => $body:expr, $bytes:ident => $bytes_body:expr) => {
        match $value {
            Value::U8($v) => $body,
            Value::U16($v) => $body,
            Value::U32($v) => $body,
            Value::U64($v) => $body,
            Value::I8($v) => $body,
            Value::I16($v) => $body,
            Value::I32($v) => $body,
            Value::I64($v) => $body,
            Value::F32($v) => $body,
            Value::F64($v) => $body,
            Value::Bytes($bytes) => $bytes_body,
        }
    };
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::U8(_) => TypeTag::U8,
            Value::U16(_) => TypeTag::U16,
            Value::U32(_) => TypeTag::U32,
            Value::U64(_) => TypeTag::U64,
            Value::I8(_) => TypeTag::I8,
            Value::I16(_) => TypeTag::I16,
            Value::I32(_) => TypeTag::I32,
            Value::I64(_) => TypeTag::I64,
            Value::F32(_) => TypeTag::F32,
            Value::F64(_) => TypeTag::F64,
            Value::Bytes(_) => TypeTag::Bytes,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Value::Bytes(b) => b.len(),
            other => other.tag().width().unwrap_or(0),
        }
    }

    /// Decode a scalar of type `tag` from `bytes` at `offset`.
    /// `tag` must not be `Bytes`.
    pub fn from_bytes(tag: TypeTag, bytes: &[u8], offset: usize) -> Option<Value> {
        let width = tag.width()?;
        let slice = bytes.get(offset..offset + width)?;
        Some(match tag {
            TypeTag::U8 => Value::U8(slice[0]),
            TypeTag::U16 => Value::U16(u16::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::U32 => Value::U32(u32::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::U64 => Value::U64(u64::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::I8 => Value::I8(slice[0] as i8),
            TypeTag::I16 => Value::I16(i16::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::I32 => Value::I32(i32::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::I64 => Value::I64(i64::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::F32 => Value::F32(f32::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::F64 => Value::F64(f64::from_le_bytes(slice.try_into().ok()?)),
            TypeTag::Bytes => return None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        scalar_dispatch!(self, v => v.to_le_bytes().to_vec(), b => b.to_vec())
    }

    /// Overwrite this value in place from freshly read bytes of the same
    /// length. Returns `false` (value untouched) on a length mismatch.
    pub fn overwrite(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() != self.size() {
            return false;
        }
        if let Value::Bytes(buf) = self {
            let mut owned = buf.to_vec();
            owned.copy_from_slice(bytes);
            *buf = owned.into_boxed_slice();
            return true;
        }
        match Value::from_bytes(self.tag(), bytes, 0) {
            Some(v) => {
                *self = v;
                true
            }
            None => false,
        }
    }

    /// Word image fed to JIT predicates: signed scalars are sign-extended,
    /// unsigned ones zero-extended. `None` for floats and byte strings.
    pub fn as_word(&self) -> Option<u64> {
        Some(match *self {
            Value::U8(v) => v as u64,
            Value::U16(v) => v as u64,
            Value::U32(v) => v as u64,
            Value::U64(v) => v,
            Value::I8(v) => v as i64 as u64,
            Value::I16(v) => v as i64 as u64,
            Value::I32(v) => v as i64 as u64,
            Value::I64(v) => v as u64,
            Value::F32(_) | Value::F64(_) | Value::Bytes(_) => return None,
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => {
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            other => scalar_dispatch!(other, v => write!(f, "{v}"), _b => unreachable!()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(TypeTag::U8.width(), Some(1));
        assert_eq!(TypeTag::I64.width(), Some(8));
        assert_eq!(TypeTag::F32.width(), Some(4));
        assert_eq!(TypeTag::Bytes.width(), None);
    }

    #[test]
    fn decode_unaligned() {
        let bytes = [0xff, 0x09, 0x01, 0x00, 0x00, 0xaa];
        assert_eq!(
            Value::from_bytes(TypeTag::U32, &bytes, 1),
            Some(Value::U32(0x109))
        );
        assert_eq!(Value::from_bytes(TypeTag::U32, &bytes, 3), None);
    }

    #[test]
    fn round_trip_scalars() {
        let v = Value::I32(-24831);
        let bytes = v.to_bytes();
        assert_eq!(Value::from_bytes(TypeTag::I32, &bytes, 0), Some(v));
    }

    #[test]
    fn overwrite_in_place() {
        let mut v = Value::U16(1);
        assert!(v.overwrite(&[0x34, 0x12]));
        assert_eq!(v, Value::U16(0x1234));
        assert!(!v.overwrite(&[0x00]));

        let mut b = Value::Bytes(vec![0, 0].into_boxed_slice());
        assert!(b.overwrite(&[1, 2]));
        assert_eq!(b, Value::Bytes(vec![1, 2].into_boxed_slice()));
    }

    #[test]
    fn word_extension() {
        assert_eq!(Value::I8(-1).as_word(), Some(u64::MAX));
        assert_eq!(Value::U8(0xff).as_word(), Some(0xff));
        assert_eq!(Value::F32(1.0).as_word(), None);
    }

    #[test]
    fn narrowest_width() {
        assert_eq!((TypeSet::I32 | TypeSet::U8).narrowest_width(), Some(1));
        assert_eq!((TypeSet::F64 | TypeSet::I64).narrowest_width(), Some(8));
        assert_eq!(TypeSet::empty().narrowest_width(), None);
    }
}
