//! The binary value model.
//!
//! [`Value`] is a closed tagged sum over every type a document field can
//! hold. Values are totally ordered (see [`compare`]), hash consistently
//! with that order, and carry a self-describing binary encoding used by the
//! document codec and the index node codec alike.

mod compare;
mod convert;

pub(crate) use compare::compare;

use crate::document::codec::{self, ByteReader};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::types::ObjectId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single typed value stored in a document or an index key
#[derive(Debug, Clone)]
pub enum Value {
    /// Sorts below every other value
    MinKey,
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(Decimal),
    String(String),
    ObjectId(ObjectId),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Document(Document),
    /// Sorts above every other value
    MaxKey,
}

/// On-disk type tag of a value.
///
/// The discriminants are the wire bytes written before each payload. Tags
/// the core never produces (regex, js, ...) are still declared so that the
/// ordering table covers them and decoding reports them precisely.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Undefined = 0x06,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    Regex = 0x0B,
    Js = 0x0D,
    Symbol = 0x0E,
    JsWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    Decimal = 0x13,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl ValueTag {
    /// Convert from a wire byte
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Double),
            0x02 => Some(Self::String),
            0x03 => Some(Self::Document),
            0x04 => Some(Self::Array),
            0x05 => Some(Self::Binary),
            0x06 => Some(Self::Undefined),
            0x07 => Some(Self::ObjectId),
            0x08 => Some(Self::Boolean),
            0x09 => Some(Self::DateTime),
            0x0A => Some(Self::Null),
            0x0B => Some(Self::Regex),
            0x0D => Some(Self::Js),
            0x0E => Some(Self::Symbol),
            0x0F => Some(Self::JsWithScope),
            0x10 => Some(Self::Int32),
            0x11 => Some(Self::Timestamp),
            0x12 => Some(Self::Int64),
            0x13 => Some(Self::Decimal),
            0x7F => Some(Self::MaxKey),
            0xFF => Some(Self::MinKey),
            _ => None,
        }
    }

    /// Position in the fixed cross-type ordering table
    pub fn rank(self) -> u8 {
        match self {
            Self::MinKey => 0,
            Self::Null => 1,
            Self::Boolean => 2,
            Self::Int32 => 3,
            Self::Int64 => 4,
            Self::Double => 5,
            Self::Decimal => 6,
            Self::String => 7,
            Self::ObjectId => 8,
            Self::DateTime => 9,
            Self::Binary => 10,
            Self::Array => 11,
            Self::Document => 12,
            Self::Regex => 13,
            Self::Js => 14,
            Self::JsWithScope => 15,
            Self::Timestamp => 16,
            Self::Symbol => 17,
            Self::Undefined => 18,
            Self::MaxKey => 19,
        }
    }

    /// Human-readable tag name for error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::String => "string",
            Self::Document => "document",
            Self::Array => "array",
            Self::Binary => "binary",
            Self::Undefined => "undefined",
            Self::ObjectId => "object-id",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Null => "null",
            Self::Regex => "regex",
            Self::Js => "js",
            Self::Symbol => "symbol",
            Self::JsWithScope => "js-with-scope",
            Self::Int32 => "int32",
            Self::Timestamp => "timestamp",
            Self::Int64 => "int64",
            Self::Decimal => "decimal",
            Self::MaxKey => "max-key",
            Self::MinKey => "min-key",
        }
    }
}

impl Value {
    /// The type tag of this value
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::MinKey => ValueTag::MinKey,
            Self::Null => ValueTag::Null,
            Self::Boolean(_) => ValueTag::Boolean,
            Self::Int32(_) => ValueTag::Int32,
            Self::Int64(_) => ValueTag::Int64,
            Self::Double(_) => ValueTag::Double,
            Self::Decimal(_) => ValueTag::Decimal,
            Self::String(_) => ValueTag::String,
            Self::ObjectId(_) => ValueTag::ObjectId,
            Self::DateTime(_) => ValueTag::DateTime,
            Self::Binary(_) => ValueTag::Binary,
            Self::Array(_) => ValueTag::Array,
            Self::Document(_) => ValueTag::Document,
            Self::MaxKey => ValueTag::MaxKey,
        }
    }

    /// Human-readable type name
    pub fn type_name(&self) -> &'static str {
        self.tag().name()
    }

    /// Whether this value participates in cross-tag numeric comparison
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32(_) | Self::Int64(_) | Self::Double(_) | Self::Decimal(_)
        )
    }

    /// Whether this value is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The payload, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The payload, if this is an int32
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// The payload, if this is an int64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// The payload, if this is a double
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The payload, if this is an object-id
    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Self::ObjectId(id) => Some(id),
            _ => None,
        }
    }

    /// The payload, if this is a datetime
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Borrow the bytes, if this is a binary value
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Borrow the document payload, if this is a document
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Borrow the array payload, if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Append this value's payload (without its tag byte) to `buf`
    pub(crate) fn write_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Self::MinKey | Self::Null | Self::MaxKey => {}
            Self::Boolean(b) => buf.push(*b as u8),
            Self::Int32(i) => buf.extend_from_slice(&i.to_le_bytes()),
            Self::Int64(i) => buf.extend_from_slice(&i.to_le_bytes()),
            Self::Double(d) => buf.extend_from_slice(&d.to_le_bytes()),
            Self::Decimal(d) => buf.extend_from_slice(&d.serialize()),
            Self::String(s) => {
                buf.extend_from_slice(&(s.len() as u32 + 1).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
            Self::ObjectId(id) => buf.extend_from_slice(id.as_bytes()),
            Self::DateTime(dt) => buf.extend_from_slice(&dt.timestamp_millis().to_le_bytes()),
            Self::Binary(bytes) => {
                buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
            }
            Self::Array(items) => codec::write_array(buf, items),
            Self::Document(doc) => codec::write_document(buf, doc),
        }
    }

    /// Read a payload of the given tag from `r`
    pub(crate) fn read_payload(tag: ValueTag, r: &mut ByteReader<'_>) -> Result<Value> {
        Ok(match tag {
            ValueTag::MinKey => Value::MinKey,
            ValueTag::Null => Value::Null,
            ValueTag::MaxKey => Value::MaxKey,
            ValueTag::Boolean => match r.read_u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(Error::invalid_encoding(format!(
                        "boolean payload must be 0 or 1, got {other}"
                    )))
                }
            },
            ValueTag::Int32 => Value::Int32(r.read_i32()?),
            ValueTag::Int64 => Value::Int64(r.read_i64()?),
            ValueTag::Double => Value::Double(r.read_f64()?),
            ValueTag::Decimal => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(r.read_bytes(16)?);
                Value::Decimal(Decimal::deserialize(raw))
            }
            ValueTag::String => {
                let len = r.read_u32()? as usize;
                if len == 0 {
                    return Err(Error::invalid_encoding("string length must include NUL"));
                }
                let bytes = r.read_bytes(len - 1)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::invalid_encoding(format!("string payload: {e}")))?
                    .to_owned();
                if r.read_u8()? != 0 {
                    return Err(Error::invalid_encoding("string missing NUL terminator"));
                }
                Value::String(text)
            }
            ValueTag::ObjectId => {
                let mut raw = [0u8; 12];
                raw.copy_from_slice(r.read_bytes(12)?);
                Value::ObjectId(ObjectId::from_bytes(raw))
            }
            ValueTag::DateTime => {
                let millis = r.read_i64()?;
                let dt = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    Error::invalid_encoding(format!("datetime out of range: {millis}"))
                })?;
                Value::DateTime(dt)
            }
            ValueTag::Binary => {
                let len = r.read_u32()? as usize;
                Value::Binary(r.read_bytes(len)?.to_vec())
            }
            ValueTag::Array => Value::Array(codec::read_array(r)?),
            ValueTag::Document => Value::Document(codec::read_document(r)?),
            other => {
                return Err(Error::invalid_encoding(format!(
                    "unsupported value tag {:#04x} ({})",
                    other as u8,
                    other.name()
                )))
            }
        })
    }

    /// Append the tag byte followed by the payload
    pub(crate) fn write_tagged(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag() as u8);
        self.write_payload(buf);
    }

    /// Read a tag byte and its payload
    pub(crate) fn read_tagged(r: &mut ByteReader<'_>) -> Result<Value> {
        let byte = r.read_u8()?;
        let tag = ValueTag::from_byte(byte)
            .ok_or_else(|| Error::invalid_encoding(format!("unknown value tag {byte:#04x}")))?;
        Self::read_payload(tag, r)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        compare::hash_value(self, state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinKey => write!(f, "$min"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int32(i) => write!(f, "{i}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::ObjectId(id) => write!(f, "{id}"),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Binary(bytes) => write!(f, "binary({} bytes)", bytes.len()),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Document(doc) => write!(f, "{doc}"),
            Self::MaxKey => write!(f, "$max"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::ObjectId(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_wire_roundtrip() {
        for v in [
            Value::MinKey,
            Value::Null,
            Value::Boolean(true),
            Value::Int32(1),
            Value::Int64(1),
            Value::Double(1.0),
            Value::String("x".into()),
            Value::MaxKey,
        ] {
            assert_eq!(ValueTag::from_byte(v.tag() as u8), Some(v.tag()));
        }
    }

    #[test]
    fn test_rank_table_order() {
        let ordered = [
            ValueTag::MinKey,
            ValueTag::Null,
            ValueTag::Boolean,
            ValueTag::Int32,
            ValueTag::Int64,
            ValueTag::Double,
            ValueTag::Decimal,
            ValueTag::String,
            ValueTag::ObjectId,
            ValueTag::DateTime,
            ValueTag::Binary,
            ValueTag::Array,
            ValueTag::Document,
            ValueTag::Regex,
            ValueTag::Js,
            ValueTag::JsWithScope,
            ValueTag::Timestamp,
            ValueTag::Symbol,
            ValueTag::Undefined,
            ValueTag::MaxKey,
        ];
        for (i, tag) in ordered.iter().enumerate() {
            assert_eq!(tag.rank() as usize, i);
        }
    }

    #[test]
    fn test_tagged_roundtrip() {
        let values = [
            Value::Null,
            Value::Boolean(false),
            Value::Int32(-7),
            Value::Int64(1 << 40),
            Value::Double(3.5),
            Value::Decimal(Decimal::new(12345, 2)),
            Value::String("hello".into()),
            Value::ObjectId(ObjectId::new()),
            Value::Binary(vec![1, 2, 3]),
            Value::Array(vec![Value::Int32(1), Value::String("a".into())]),
            Value::MinKey,
            Value::MaxKey,
        ];
        for v in values {
            let mut buf = Vec::new();
            v.write_tagged(&mut buf);
            let mut r = ByteReader::new(&buf);
            let back = Value::read_tagged(&mut r).unwrap();
            assert_eq!(back, v);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let buf = [0x42u8, 0, 0, 0];
        let mut r = ByteReader::new(&buf);
        assert!(matches!(
            Value::read_tagged(&mut r),
            Err(Error::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_reserved_tag_rejected() {
        // regex is a known tag but carries no payload decoder in this core
        let buf = [0x0Bu8];
        let mut r = ByteReader::new(&buf);
        assert!(matches!(
            Value::read_tagged(&mut r),
            Err(Error::InvalidEncoding(_))
        ));
    }
}
