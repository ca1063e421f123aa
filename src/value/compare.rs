//! Total ordering and hashing over values.
//!
//! Same-tag values compare by the natural order of their payload. Values of
//! different tags compare by the fixed rank table, except that commensurable
//! numerics (int32/int64/double/decimal) compare by numeric value first and
//! fall back to rank order only when numerically equal.

use crate::document::Document;
use crate::value::Value;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::hash::Hasher;

/// Compare two values under the engine's total order
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    if a.is_numeric() && b.is_numeric() {
        return match numeric_cmp(a, b) {
            Ordering::Equal => rank(a).cmp(&rank(b)),
            ord => ord,
        };
    }

    use Value::*;
    match (a, b) {
        (MinKey, MinKey) | (Null, Null) | (MaxKey, MaxKey) => Ordering::Equal,
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (String(x), String(y)) => x.cmp(y),
        (ObjectId(x), ObjectId(y)) => x.as_bytes().cmp(y.as_bytes()),
        (DateTime(x), DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Binary(x), Binary(y)) => x.cmp(y),
        (Array(x), Array(y)) => compare_arrays(x, y),
        (Document(x), Document(y)) => compare_documents(x, y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Element-wise array comparison, then by length
fn compare_arrays(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match compare(x, y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// Field-wise document comparison in insertion order, then by length
fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        match ka.cmp(kb) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match compare(va, vb) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

fn rank(v: &Value) -> u8 {
    v.tag().rank()
}

/// Compare two numeric values by magnitude, ignoring their tags.
///
/// Decimal comparisons are exact where a conversion exists; mixed
/// double comparisons go through f64 with a total order that places NaN
/// above every number and folds -0.0 into 0.0.
fn numeric_cmp(a: &Value, b: &Value) -> Ordering {
    use Value::*;
    match (a, b) {
        (Int32(x), Int32(y)) => x.cmp(y),
        (Int64(x), Int64(y)) => x.cmp(y),
        (Int32(x), Int64(y)) => i64::from(*x).cmp(y),
        (Int64(x), Int32(y)) => x.cmp(&i64::from(*y)),
        (Decimal(x), Decimal(y)) => x.cmp(y),
        (Decimal(x), Int32(y)) => x.cmp(&self::Decimal::from(*y)),
        (Decimal(x), Int64(y)) => x.cmp(&self::Decimal::from(*y)),
        (Int32(x), Decimal(y)) => self::Decimal::from(*x).cmp(y),
        (Int64(x), Decimal(y)) => self::Decimal::from(*x).cmp(y),
        (Decimal(x), Double(y)) => decimal_vs_f64(x, *y),
        (Double(x), Decimal(y)) => decimal_vs_f64(y, *x).reverse(),
        _ => cmp_f64(as_f64(a), as_f64(b)),
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Int32(i) => f64::from(*i),
        Value::Int64(i) => *i as f64,
        Value::Double(d) => *d,
        Value::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        _ => unreachable!("as_f64 on non-numeric value"),
    }
}

/// Total order over f64: -0.0 == 0.0, NaN above everything
fn cmp_f64(a: f64, b: f64) -> Ordering {
    let norm = |x: f64| if x == 0.0 { 0.0 } else { x };
    norm(a).total_cmp(&norm(b))
}

fn decimal_vs_f64(d: &Decimal, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    if f.is_infinite() {
        return if f > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    match Decimal::from_f64(f) {
        Some(df) => d.cmp(&df),
        // finite but outside the decimal range
        None => {
            if f > 0.0 {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

/// Hash a value consistently with `compare`-based equality.
///
/// Equal values always share a tag (cross-tag numeric ties break on rank),
/// so hashing rank plus a canonical payload image is sufficient.
pub(crate) fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    state.write_u8(rank(v));
    match v {
        Value::MinKey | Value::Null | Value::MaxKey => {}
        Value::Boolean(b) => state.write_u8(*b as u8),
        Value::Int32(i) => state.write_i32(*i),
        Value::Int64(i) => state.write_i64(*i),
        Value::Double(d) => state.write_u64(canonical_f64_bits(*d)),
        Value::Decimal(d) => state.write(&d.normalize().serialize()),
        Value::String(s) => state.write(s.as_bytes()),
        Value::ObjectId(id) => state.write(id.as_bytes()),
        Value::DateTime(dt) => state.write_i64(dt.timestamp_millis()),
        Value::Binary(bytes) => state.write(bytes),
        Value::Array(items) => {
            state.write_usize(items.len());
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Document(doc) => {
            state.write_usize(doc.len());
            for (name, value) in doc.iter() {
                state.write(name.as_bytes());
                hash_value(value, state);
            }
        }
    }
}

fn canonical_f64_bits(d: f64) -> u64 {
    if d.is_nan() {
        0x7FF8_0000_0000_0000
    } else if d == 0.0 {
        0
    } else {
        d.to_bits()
    }
}
