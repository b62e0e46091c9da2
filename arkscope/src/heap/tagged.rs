//! Tagged value decoding
//!
//! A JS value is one 64-bit word:
//!
//! ```text
//!   0xFFFF_xxxx_xxxx_xxxx   int32 in the low half
//!   other non-zero high 16  double, offset by 1 << 48
//!   0x02 / 0x06 / 0x07      null / false / true
//!   0x0A / 0x05 / 0x12      undefined / hole / exception
//!   ....._...0              strong heap object (8-byte aligned)
//!   ....._...1              weak heap object
//! ```
//!
//! Raw words are decoded once into [`HeapValue`] and matched from there.

use crate::address_space::AddressSpace;
use crate::domain::UnwindError;
use crate::heap::HeapLayout;

pub const TAG_INT: u64 = 0xFFFF_0000_0000_0000;
pub const TAG_SPECIAL: u64 = 0x02;
pub const TAG_BOOLEAN: u64 = 0x04;
pub const TAG_WEAK: u64 = 0x01;
pub const TAG_HEAP_MASK: u64 = TAG_INT | TAG_SPECIAL | TAG_BOOLEAN;
pub const DOUBLE_ENCODE_OFFSET: u64 = 1 << 48;

pub const VALUE_NULL: u64 = TAG_SPECIAL;
pub const VALUE_FALSE: u64 = TAG_BOOLEAN | TAG_SPECIAL;
pub const VALUE_TRUE: u64 = VALUE_FALSE | 1;
pub const VALUE_UNDEFINED: u64 = 0x0A;
pub const VALUE_HOLE: u64 = 0x05;
pub const VALUE_EXCEPTION: u64 = 0x12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeapValue {
    Int(i32),
    Double(f64),
    Undefined,
    Null,
    Hole,
    Boolean(bool),
    Exception,
    /// Weak reference to the object at the address; never followed
    Weak(u64),
    Object(u64),
}

impl HeapValue {
    /// Decode a raw value word
    ///
    /// # Errors
    /// Returns [`UnwindError::MalformedTag`] for zero and for special
    /// patterns no value encodes to.
    pub fn decode(raw: u64) -> Result<Self, UnwindError> {
        let malformed = |reason| UnwindError::MalformedTag { value: raw, reason };

        match raw & TAG_INT {
            TAG_INT => {
                let low = u32::try_from(raw & u64::from(u32::MAX)).unwrap_or(0);
                return Ok(HeapValue::Int(i32::from_ne_bytes(low.to_ne_bytes())));
            }
            0 => {}
            _ => return Ok(HeapValue::Double(f64::from_bits(raw - DOUBLE_ENCODE_OFFSET))),
        }

        match raw {
            VALUE_NULL => return Ok(HeapValue::Null),
            VALUE_FALSE => return Ok(HeapValue::Boolean(false)),
            VALUE_TRUE => return Ok(HeapValue::Boolean(true)),
            VALUE_UNDEFINED => return Ok(HeapValue::Undefined),
            VALUE_HOLE => return Ok(HeapValue::Hole),
            VALUE_EXCEPTION => return Ok(HeapValue::Exception),
            0 => return Err(malformed("null reference")),
            _ => {}
        }

        if raw & TAG_HEAP_MASK != 0 {
            return Err(malformed("unknown special value"));
        }

        let addr = raw & !TAG_WEAK;
        if raw & TAG_WEAK != 0 {
            Ok(HeapValue::Weak(addr))
        } else {
            Ok(HeapValue::Object(addr))
        }
    }

    /// Address of a strong heap object, or the reason there isn't one
    ///
    /// # Errors
    /// Weak references and immediates are refused with
    /// [`UnwindError::MalformedTag`].
    pub fn strong_object(raw: u64) -> Result<u64, UnwindError> {
        match Self::decode(raw)? {
            HeapValue::Object(addr) => Ok(addr),
            HeapValue::Weak(_) => {
                Err(UnwindError::MalformedTag { value: raw, reason: "weak reference" })
            }
            _ => Err(UnwindError::MalformedTag { value: raw, reason: "not a heap object" }),
        }
    }
}

/// What a heap object's hidden class says it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    FunctionBase,
    Proxy,
    Other(u8),
}

/// Read an object's hidden class and classify it
///
/// # Errors
/// Fails if the header or bit field is unreadable, or the header is not a
/// strong object pointer.
pub fn object_kind<A: AddressSpace + ?Sized>(
    space: &A,
    layout: &HeapLayout,
    object: u64,
) -> Result<ObjectKind, UnwindError> {
    let hclass = HeapValue::strong_object(space.read_word(object)?)?;
    let bitfield = space.read_u32(hclass.wrapping_add(layout.hclass_bitfield_offset))?;
    let js_type = bitfield.to_le_bytes()[0];

    Ok(if layout.is_function_type(js_type) {
        ObjectKind::FunctionBase
    } else if js_type == layout.proxy_type {
        ObjectKind::Proxy
    } else {
        ObjectKind::Other(js_type)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::SnapshotSpace;

    #[test]
    fn test_decode_immediates() {
        assert_eq!(HeapValue::decode(TAG_INT | 7).unwrap(), HeapValue::Int(7));
        assert_eq!(HeapValue::decode(TAG_INT | 0xFFFF_FFFF).unwrap(), HeapValue::Int(-1));
        assert_eq!(HeapValue::decode(VALUE_UNDEFINED).unwrap(), HeapValue::Undefined);
        assert_eq!(HeapValue::decode(VALUE_HOLE).unwrap(), HeapValue::Hole);
        assert_eq!(HeapValue::decode(VALUE_TRUE).unwrap(), HeapValue::Boolean(true));
        assert_eq!(HeapValue::decode(VALUE_NULL).unwrap(), HeapValue::Null);
        assert_eq!(HeapValue::decode(VALUE_EXCEPTION).unwrap(), HeapValue::Exception);
    }

    #[test]
    fn test_decode_double() {
        let raw = 1.5f64.to_bits() + DOUBLE_ENCODE_OFFSET;
        assert_eq!(HeapValue::decode(raw).unwrap(), HeapValue::Double(1.5));
    }

    #[test]
    fn test_decode_objects_and_weak() {
        assert_eq!(HeapValue::decode(0x7f00_1000).unwrap(), HeapValue::Object(0x7f00_1000));
        assert_eq!(HeapValue::decode(0x7f00_1001).unwrap(), HeapValue::Weak(0x7f00_1000));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(HeapValue::decode(0), Err(UnwindError::MalformedTag { .. })));
        assert!(HeapValue::decode(0x7f00_1004).is_err());
        assert!(HeapValue::decode(0x7f00_1003).is_err());
        assert!(HeapValue::decode(0x16).is_err());
    }

    #[test]
    fn test_strong_object_refuses_weak() {
        let err = HeapValue::strong_object(0x7f00_1001).unwrap_err();
        assert_eq!(err, UnwindError::MalformedTag { value: 0x7f00_1001, reason: "weak reference" });
        assert!(HeapValue::strong_object(VALUE_UNDEFINED).is_err());
    }

    #[test]
    fn test_object_kind_from_hidden_class() {
        let layout = HeapLayout::default();
        let mut space = SnapshotSpace::new();
        // object -> hclass, hclass bit field low byte = js type
        space.map_words(0x1000, &[0x2000]);
        space.map_words(0x2000, &[0, 10]);
        space.map_words(0x3000, &[0x4000]);
        space.map_words(0x4000, &[0, u64::from(layout.proxy_type)]);
        space.map_words(0x5000, &[0x6000]);
        space.map_words(0x6000, &[0, 99]);

        assert_eq!(object_kind(&space, &layout, 0x1000).unwrap(), ObjectKind::FunctionBase);
        assert_eq!(object_kind(&space, &layout, 0x3000).unwrap(), ObjectKind::Proxy);
        assert_eq!(object_kind(&space, &layout, 0x5000).unwrap(), ObjectKind::Other(99));
        assert!(object_kind(&space, &layout, 0x9000).is_err());
    }
}
