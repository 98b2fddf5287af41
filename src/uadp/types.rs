use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Numeric node identity inside the server address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub namespace: u16,
    pub id: u32,
}

impl NodeId {
    pub const fn numeric(namespace: u16, id: u32) -> Self {
        NodeId { namespace, id }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.namespace, self.id)
    }
}

impl FromStr for NodeId {
    type Err = String;

    /// Accepts "ns=2;i=6045" or the short form "2:6045".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((ns, id)) = s.split_once(';') {
            let ns = ns
                .trim()
                .strip_prefix("ns=")
                .ok_or_else(|| format!("missing 'ns=' in node id '{}'", s))?;
            let id = id
                .trim()
                .strip_prefix("i=")
                .ok_or_else(|| format!("missing 'i=' in node id '{}'", s))?;
            return Ok(NodeId {
                namespace: ns.parse().map_err(|e| format!("bad namespace in '{}': {}", s, e))?,
                id: id.parse().map_err(|e| format!("bad numeric id in '{}': {}", s, e))?,
            });
        }
        if let Some((ns, id)) = s.split_once(':') {
            return Ok(NodeId {
                namespace: ns.parse().map_err(|e| format!("bad namespace in '{}': {}", s, e))?,
                id: id.parse().map_err(|e| format!("bad numeric id in '{}': {}", s, e))?,
            });
        }
        Err(format!("invalid node id '{}'", s))
    }
}

/// Variant encoding-byte flag for a one-dimensional array.
pub const VARIANT_ARRAY: u8 = 0x80;

/// Built-in data type of a published field.
///
/// `FixedString(n)` and `FixedByteString(n)` carry their declared length and
/// therefore have a static wire width; plain `String` and `ByteString` do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Boolean,
    Byte,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Double,
    String,
    ByteString,
    FixedString(u16),
    FixedByteString(u16),
}

impl TypeTag {
    /// Built-in type id used in the Variant encoding byte.
    pub fn builtin_id(&self) -> u8 {
        match self {
            TypeTag::Boolean => 1,
            TypeTag::Byte => 3,
            TypeTag::Int32 => 6,
            TypeTag::UInt16 => 5,
            TypeTag::UInt32 => 7,
            TypeTag::Int64 => 8,
            TypeTag::UInt64 => 9,
            TypeTag::Double => 11,
            TypeTag::String | TypeTag::FixedString(_) => 12,
            TypeTag::ByteString | TypeTag::FixedByteString(_) => 15,
        }
    }

    /// Byte sequences are published as single-element arrays.
    pub fn is_array_variant(&self) -> bool {
        matches!(
            self,
            TypeTag::String | TypeTag::ByteString | TypeTag::FixedString(_) | TypeTag::FixedByteString(_)
        )
    }

    /// Variant encoding byte: built-in id plus the array flag where it applies.
    pub fn variant_encoding(&self) -> u8 {
        if self.is_array_variant() {
            self.builtin_id() | VARIANT_ARRAY
        } else {
            self.builtin_id()
        }
    }

    /// Encoded payload width in bytes (length prefix included for byte
    /// sequences), or `None` when it depends on the value.
    pub fn static_width(&self) -> Option<usize> {
        match self {
            TypeTag::Boolean | TypeTag::Byte => Some(1),
            TypeTag::UInt16 => Some(2),
            TypeTag::Int32 | TypeTag::UInt32 => Some(4),
            TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Double => Some(8),
            TypeTag::FixedString(n) | TypeTag::FixedByteString(n) => Some(4 + *n as usize),
            TypeTag::String | TypeTag::ByteString => None,
        }
    }

    /// Integer types that a per-tick counter transform can act on.
    pub fn is_counter(&self) -> bool {
        matches!(
            self,
            TypeTag::Byte
                | TypeTag::UInt16
                | TypeTag::Int32
                | TypeTag::UInt32
                | TypeTag::Int64
                | TypeTag::UInt64
        )
    }

    /// The type with any declared length dropped, used to match a field
    /// against the data type of the node it binds to.
    pub fn base(&self) -> TypeTag {
        match self {
            TypeTag::FixedString(_) => TypeTag::String,
            TypeTag::FixedByteString(_) => TypeTag::ByteString,
            other => *other,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Boolean => write!(f, "Boolean"),
            TypeTag::Byte => write!(f, "Byte"),
            TypeTag::UInt16 => write!(f, "UInt16"),
            TypeTag::Int32 => write!(f, "Int32"),
            TypeTag::UInt32 => write!(f, "UInt32"),
            TypeTag::Int64 => write!(f, "Int64"),
            TypeTag::UInt64 => write!(f, "UInt64"),
            TypeTag::Double => write!(f, "Double"),
            TypeTag::String => write!(f, "String"),
            TypeTag::ByteString => write!(f, "ByteString"),
            TypeTag::FixedString(n) => write!(f, "String[{}]", n),
            TypeTag::FixedByteString(n) => write!(f, "ByteString[{}]", n),
        }
    }
}

impl FromStr for TypeTag {
    type Err = String;

    /// Parses the names printed by `Display`, e.g. "UInt16" or "String[32]".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((name, rest)) = s.split_once('[') {
            let len = rest
                .strip_suffix(']')
                .ok_or_else(|| format!("unterminated length in type '{}'", s))?
                .trim()
                .parse::<u16>()
                .map_err(|e| format!("bad length in type '{}': {}", s, e))?;
            return match name.trim() {
                "String" => Ok(TypeTag::FixedString(len)),
                "ByteString" => Ok(TypeTag::FixedByteString(len)),
                other => Err(format!("type '{}' cannot carry a length", other)),
            };
        }
        match s {
            "Boolean" => Ok(TypeTag::Boolean),
            "Byte" => Ok(TypeTag::Byte),
            "UInt16" => Ok(TypeTag::UInt16),
            "Int32" => Ok(TypeTag::Int32),
            "UInt32" => Ok(TypeTag::UInt32),
            "Int64" => Ok(TypeTag::Int64),
            "UInt64" => Ok(TypeTag::UInt64),
            "Double" => Ok(TypeTag::Double),
            "String" => Ok(TypeTag::String),
            "ByteString" => Ok(TypeTag::ByteString),
            other => Err(format!("unknown type '{}'", other)),
        }
    }
}

/// Per-tick change applied to a dynamic field. Both wrap on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Increment,
    Decrement,
}

/// A decoded field value, the variant form used at configuration time and by
/// the unoptimised update path.
#[derive(Debug, Clone, PartialEq)]
pub enum UaValue {
    Boolean(bool),
    Byte(u8),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ByteString(Vec<u8>),
}

impl UaValue {
    /// Zero value of a type, used for freshly created nodes.
    pub fn default_for(tag: TypeTag) -> UaValue {
        match tag {
            TypeTag::Boolean => UaValue::Boolean(false),
            TypeTag::Byte => UaValue::Byte(0),
            TypeTag::UInt16 => UaValue::UInt16(0),
            TypeTag::Int32 => UaValue::Int32(0),
            TypeTag::UInt32 => UaValue::UInt32(0),
            TypeTag::Int64 => UaValue::Int64(0),
            TypeTag::UInt64 => UaValue::UInt64(0),
            TypeTag::Double => UaValue::Double(0.0),
            TypeTag::String => UaValue::String(String::new()),
            TypeTag::FixedString(n) => UaValue::String(" ".repeat(n as usize)),
            TypeTag::ByteString => UaValue::ByteString(Vec::new()),
            TypeTag::FixedByteString(n) => UaValue::ByteString(vec![0; n as usize]),
        }
    }

    /// Whether this value can be stored in a field of type `tag`. Fixed
    /// length tags require the exact declared length.
    pub fn conforms_to(&self, tag: TypeTag) -> bool {
        match (self, tag) {
            (UaValue::Boolean(_), TypeTag::Boolean)
            | (UaValue::Byte(_), TypeTag::Byte)
            | (UaValue::UInt16(_), TypeTag::UInt16)
            | (UaValue::Int32(_), TypeTag::Int32)
            | (UaValue::UInt32(_), TypeTag::UInt32)
            | (UaValue::Int64(_), TypeTag::Int64)
            | (UaValue::UInt64(_), TypeTag::UInt64)
            | (UaValue::Double(_), TypeTag::Double)
            | (UaValue::String(_), TypeTag::String)
            | (UaValue::ByteString(_), TypeTag::ByteString) => true,
            (UaValue::String(s), TypeTag::FixedString(n)) => s.len() == n as usize,
            (UaValue::ByteString(b), TypeTag::FixedByteString(n)) => b.len() == n as usize,
            _ => false,
        }
    }

    /// Apply a counter transform, `None` for non-integer values.
    pub fn apply(&self, transform: Transform) -> Option<UaValue> {
        let up = transform == Transform::Increment;
        let next = match self {
            UaValue::Byte(v) => UaValue::Byte(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
            UaValue::UInt16(v) => UaValue::UInt16(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
            UaValue::Int32(v) => UaValue::Int32(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
            UaValue::UInt32(v) => UaValue::UInt32(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
            UaValue::Int64(v) => UaValue::Int64(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
            UaValue::UInt64(v) => UaValue::UInt64(if up { v.wrapping_add(1) } else { v.wrapping_sub(1) }),
            _ => return None,
        };
        Some(next)
    }

    /// Append the little-endian payload (no Variant encoding byte).
    pub fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            UaValue::Boolean(v) => out.push(*v as u8),
            UaValue::Byte(v) => out.push(*v),
            UaValue::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
            UaValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            UaValue::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
            UaValue::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            UaValue::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
            UaValue::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            UaValue::String(s) => put_byte_sequence(out, s.as_bytes()),
            UaValue::ByteString(b) => put_byte_sequence(out, b),
        }
    }

    /// Variant name for logs.
    pub fn variant_name(&self) -> &'static str {
        match self {
            UaValue::Boolean(_) => "Boolean",
            UaValue::Byte(_) => "Byte",
            UaValue::UInt16(_) => "UInt16",
            UaValue::Int32(_) => "Int32",
            UaValue::UInt32(_) => "UInt32",
            UaValue::Int64(_) => "Int64",
            UaValue::UInt64(_) => "UInt64",
            UaValue::Double(_) => "Double",
            UaValue::String(_) => "String",
            UaValue::ByteString(_) => "ByteString",
        }
    }
}

/// Int32 length prefix followed by the raw bytes.
pub(crate) fn put_byte_sequence(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse_both_forms() {
        assert_eq!("ns=2;i=6045".parse::<NodeId>().unwrap(), NodeId::numeric(2, 6045));
        assert_eq!("2:6074".parse::<NodeId>().unwrap(), NodeId::numeric(2, 6074));
        assert!("6045".parse::<NodeId>().is_err());
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_type_tag_display_parse_agree() {
        for tag in [
            TypeTag::Byte,
            TypeTag::UInt64,
            TypeTag::String,
            TypeTag::FixedString(32),
            TypeTag::FixedByteString(8),
        ] {
            assert_eq!(tag.to_string().parse::<TypeTag>().unwrap(), tag);
        }
        assert!("UInt16[2]".parse::<TypeTag>().is_err());
        assert!("Float".parse::<TypeTag>().is_err());
    }

    #[test]
    fn test_byte_sequences_use_array_encoding() {
        assert_eq!(TypeTag::FixedString(32).variant_encoding(), 0x8C);
        assert_eq!(TypeTag::ByteString.variant_encoding(), 0x8F);
        assert_eq!(TypeTag::UInt16.variant_encoding(), 5);
        assert!(!TypeTag::Double.is_array_variant());
    }

    #[test]
    fn test_static_width() {
        assert_eq!(TypeTag::Byte.static_width(), Some(1));
        assert_eq!(TypeTag::UInt16.static_width(), Some(2));
        assert_eq!(TypeTag::UInt64.static_width(), Some(8));
        assert_eq!(TypeTag::FixedString(32).static_width(), Some(36));
        assert_eq!(TypeTag::String.static_width(), None);
        assert_eq!(TypeTag::ByteString.static_width(), None);
    }

    #[test]
    fn test_conforms_to_checks_fixed_length() {
        let vendor = UaValue::String("NetTimeLogic_GmbH_-_-_-_-_-_-_-_".to_string());
        assert!(vendor.conforms_to(TypeTag::FixedString(32)));
        assert!(!vendor.conforms_to(TypeTag::FixedString(31)));
        assert!(vendor.conforms_to(TypeTag::String));
        assert!(!UaValue::UInt16(1).conforms_to(TypeTag::UInt32));
    }

    #[test]
    fn test_apply_wraps() {
        assert_eq!(UaValue::UInt16(u16::MAX).apply(Transform::Increment), Some(UaValue::UInt16(0)));
        assert_eq!(UaValue::UInt32(0).apply(Transform::Decrement), Some(UaValue::UInt32(u32::MAX)));
        assert_eq!(UaValue::String("x".into()).apply(Transform::Increment), None);
    }

    #[test]
    fn test_encode_payload_little_endian() {
        let mut out = Vec::new();
        UaValue::UInt32(0x2000).encode_payload(&mut out);
        assert_eq!(out, vec![0x00, 0x20, 0x00, 0x00]);

        out.clear();
        UaValue::ByteString(b"12345678".to_vec()).encode_payload(&mut out);
        assert_eq!(&out[..4], &8i32.to_le_bytes());
        assert_eq!(&out[4..], b"12345678");
    }
}
