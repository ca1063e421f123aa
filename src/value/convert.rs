//! Explicit value coercions.
//!
//! The engine never converts implicitly; callers opt in through the
//! `try_to_*` methods. Numeric conversions preserve value or fail with
//! `InvalidCast`; null coerces to each scalar's default; strings parse
//! with the standard invariant syntax. Comparisons are unaffected: null
//! still ranks as its own type.

use crate::error::{Error, Result};
use crate::value::Value;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

impl Value {
    fn cast_error(&self, to: &'static str) -> Error {
        Error::InvalidCast {
            from: self.type_name(),
            to,
        }
    }

    /// Coerce to `i32`, failing when magnitude would be lost
    pub fn try_to_i32(&self) -> Result<i32> {
        match self {
            Self::Null => Ok(0),
            Self::Boolean(b) => Ok(*b as i32),
            Self::Int32(i) => Ok(*i),
            Self::Int64(i) => i32::try_from(*i).map_err(|_| self.cast_error("int32")),
            Self::Double(d) => {
                if d.fract() == 0.0 && *d >= f64::from(i32::MIN) && *d <= f64::from(i32::MAX) {
                    Ok(*d as i32)
                } else {
                    Err(self.cast_error("int32"))
                }
            }
            Self::Decimal(d) => d.to_i32().ok_or_else(|| self.cast_error("int32")),
            Self::String(s) => s.trim().parse().map_err(|_| self.cast_error("int32")),
            _ => Err(self.cast_error("int32")),
        }
    }

    /// Coerce to `i64`, failing when magnitude would be lost
    pub fn try_to_i64(&self) -> Result<i64> {
        match self {
            Self::Null => Ok(0),
            Self::Boolean(b) => Ok(*b as i64),
            Self::Int32(i) => Ok(i64::from(*i)),
            Self::Int64(i) => Ok(*i),
            Self::Double(d) => {
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                    Ok(*d as i64)
                } else {
                    Err(self.cast_error("int64"))
                }
            }
            Self::Decimal(d) => d.to_i64().ok_or_else(|| self.cast_error("int64")),
            Self::String(s) => s.trim().parse().map_err(|_| self.cast_error("int64")),
            Self::DateTime(dt) => Ok(dt.timestamp_millis()),
            _ => Err(self.cast_error("int64")),
        }
    }

    /// Coerce to `f64`
    pub fn try_to_f64(&self) -> Result<f64> {
        match self {
            Self::Null => Ok(0.0),
            Self::Boolean(b) => Ok(*b as i32 as f64),
            Self::Int32(i) => Ok(f64::from(*i)),
            Self::Int64(i) => Ok(*i as f64),
            Self::Double(d) => Ok(*d),
            Self::Decimal(d) => d.to_f64().ok_or_else(|| self.cast_error("double")),
            Self::String(s) => s.trim().parse().map_err(|_| self.cast_error("double")),
            _ => Err(self.cast_error("double")),
        }
    }

    /// Coerce to `Decimal`, failing when scale or magnitude cannot fit
    pub fn try_to_decimal(&self) -> Result<Decimal> {
        match self {
            Self::Null => Ok(Decimal::ZERO),
            Self::Boolean(b) => Ok(Decimal::from(*b as i32)),
            Self::Int32(i) => Ok(Decimal::from(*i)),
            Self::Int64(i) => Ok(Decimal::from(*i)),
            Self::Double(d) => Decimal::from_f64(*d).ok_or_else(|| self.cast_error("decimal")),
            Self::Decimal(d) => Ok(*d),
            Self::String(s) => s.trim().parse().map_err(|_| self.cast_error("decimal")),
            _ => Err(self.cast_error("decimal")),
        }
    }

    /// Coerce to `bool`: zero is false, any other numeric is true
    pub fn try_to_bool(&self) -> Result<bool> {
        match self {
            Self::Null => Ok(false),
            Self::Boolean(b) => Ok(*b),
            Self::Int32(i) => Ok(*i != 0),
            Self::Int64(i) => Ok(*i != 0),
            Self::Double(d) => Ok(*d != 0.0),
            Self::Decimal(d) => Ok(!d.is_zero()),
            Self::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.cast_error("boolean")),
            },
            _ => Err(self.cast_error("boolean")),
        }
    }

    /// Coerce to a display string; scalars format with invariant syntax
    pub fn try_to_string(&self) -> Result<String> {
        match self {
            Self::Null => Ok(String::new()),
            Self::Boolean(b) => Ok(b.to_string()),
            Self::Int32(i) => Ok(i.to_string()),
            Self::Int64(i) => Ok(i.to_string()),
            Self::Double(d) => Ok(d.to_string()),
            Self::Decimal(d) => Ok(d.to_string()),
            Self::String(s) => Ok(s.clone()),
            Self::ObjectId(id) => Ok(id.to_string()),
            Self::DateTime(dt) => Ok(dt.to_rfc3339()),
            _ => Err(self.cast_error("string")),
        }
    }

    /// Coerce to a datetime: epoch milliseconds or an RFC 3339 string
    pub fn try_to_datetime(&self) -> Result<DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Ok(*dt),
            Self::Int64(millis) => {
                DateTime::from_timestamp_millis(*millis).ok_or_else(|| self.cast_error("datetime"))
            }
            Self::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| self.cast_error("datetime")),
            _ => Err(self.cast_error("datetime")),
        }
    }
}
