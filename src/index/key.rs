//! Composite index keys.

use crate::document::codec::ByteReader;
use crate::error::{Error, Result};
use crate::value::Value;
use std::fmt;

/// A tuple of values ordered lexicographically component-wise.
///
/// An index key's arity is fixed per index; a single-field key is an
/// arity-1 tuple. A missing document field contributes `Null`, which sorts
/// before every concrete value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<Value>);

impl IndexKey {
    /// Build a key from its components
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Build an arity-1 key
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Number of components
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// The components in order
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Append the wire form: u16 arity, then each component tagged
    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.0.len() as u16).to_le_bytes());
        for value in &self.0 {
            value.write_tagged(buf);
        }
    }

    /// Read the wire form
    pub(crate) fn read(r: &mut ByteReader<'_>) -> Result<Self> {
        let arity = r.read_u16()? as usize;
        if arity == 0 {
            return Err(Error::invalid_encoding("index key arity must be positive"));
        }
        let mut values = Vec::with_capacity(arity);
        for _ in 0..arity {
            values.push(Value::read_tagged(r)?);
        }
        Ok(Self(values))
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

impl From<Value> for IndexKey {
    fn from(value: Value) -> Self {
        Self(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_order() {
        let a = IndexKey::new(vec![Value::Int32(1), Value::String("a".into())]);
        let b = IndexKey::new(vec![Value::Int32(1), Value::String("b".into())]);
        let c = IndexKey::new(vec![Value::Int32(2), Value::String("a".into())]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_null_component_sorts_first() {
        let missing = IndexKey::new(vec![Value::Int32(1), Value::Null]);
        let present = IndexKey::new(vec![Value::Int32(1), Value::Int32(0)]);
        assert!(missing < present);
    }

    #[test]
    fn test_min_max_bracket_components() {
        let lo = IndexKey::new(vec![Value::String("cn".into()), Value::MinKey]);
        let mid = IndexKey::new(vec![Value::String("cn".into()), Value::Int32(5)]);
        let hi = IndexKey::new(vec![Value::String("cn".into()), Value::MaxKey]);
        assert!(lo < mid);
        assert!(mid < hi);
    }

    #[test]
    fn test_wire_roundtrip() {
        let key = IndexKey::new(vec![
            Value::String("de".into()),
            Value::Int64(77),
            Value::Null,
        ]);
        let mut buf = Vec::new();
        key.write(&mut buf);
        let mut r = ByteReader::new(&buf);
        assert_eq!(IndexKey::read(&mut r).unwrap(), key);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_zero_arity_rejected() {
        let buf = 0u16.to_le_bytes();
        let mut r = ByteReader::new(&buf);
        assert!(IndexKey::read(&mut r).is_err());
    }
}
