//! The document wire codec.
//!
//! A document encodes as a 4-byte little-endian total length (including the
//! prefix itself), a sequence of fields, and a terminating zero byte. Each
//! field is a 1-byte value tag, a NUL-terminated UTF-8 name, and the
//! tag-specific payload. Arrays share the document form with numeric string
//! keys ("0", "1", ...). The codec round-trips any legal encoding
//! byte-for-byte.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::value::{Value, ValueTag};

/// A cursor over a byte slice with little-endian primitive readers
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current position from the start of the slice
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::invalid_encoding("truncated: expected 1 more byte"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::invalid_encoding(format!(
                "truncated: expected {n} bytes, {} remain",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator
    pub fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::invalid_encoding("truncated: unterminated name"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::invalid_encoding(format!("field name: {e}")))?;
        self.pos += nul + 1;
        Ok(s)
    }
}

/// Append the full encoding of `doc` to `buf`
pub(crate) fn write_document(buf: &mut Vec<u8>, doc: &Document) {
    let start = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes());
    for (name, value) in doc.iter() {
        write_field(buf, name, value);
    }
    buf.push(0);
    patch_length(buf, start);
}

/// Append the array encoding (document form with numeric keys) to `buf`
pub(crate) fn write_array(buf: &mut Vec<u8>, items: &[Value]) {
    let start = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes());
    let mut key = String::new();
    for (i, item) in items.iter().enumerate() {
        key.clear();
        itoa_into(&mut key, i);
        write_field(buf, &key, item);
    }
    buf.push(0);
    patch_length(buf, start);
}

fn write_field(buf: &mut Vec<u8>, name: &str, value: &Value) {
    buf.push(value.tag() as u8);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    value.write_payload(buf);
}

fn patch_length(buf: &mut Vec<u8>, start: usize) {
    let total = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
}

fn itoa_into(out: &mut String, mut n: usize) {
    if n == 0 {
        out.push('0');
        return;
    }
    let mut digits = [0u8; 20];
    let mut i = digits.len();
    while n > 0 {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }
    for &d in &digits[i..] {
        out.push(d as char);
    }
}

/// Decode one document from the start of `bytes`
pub(crate) fn decode_document(bytes: &[u8]) -> Result<Document> {
    let mut r = ByteReader::new(bytes);
    let doc = read_document(&mut r)?;
    Ok(doc)
}

/// Read a document (length prefix, fields, terminator) from `r`
pub(crate) fn read_document(r: &mut ByteReader<'_>) -> Result<Document> {
    let mut doc = Document::new();
    read_body(r, |name, value, doc: &mut Document| {
        if doc.contains_key(name) {
            return Err(Error::invalid_encoding(format!(
                "duplicate field name '{name}'"
            )));
        }
        doc.set(name, value);
        Ok(())
    }, &mut doc)?;
    Ok(doc)
}

/// Read an array (document form, keys ignored beyond validation) from `r`
pub(crate) fn read_array(r: &mut ByteReader<'_>) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    read_body(r, |_name, value, items: &mut Vec<Value>| {
        items.push(value);
        Ok(())
    }, &mut items)?;
    Ok(items)
}

fn read_body<T>(
    r: &mut ByteReader<'_>,
    mut field: impl FnMut(&str, Value, &mut T) -> Result<()>,
    out: &mut T,
) -> Result<()> {
    let start = r.position();
    let total = r.read_u32()? as usize;
    if total < 5 {
        return Err(Error::invalid_encoding(format!(
            "document length {total} below minimum"
        )));
    }
    let end = start + total;

    loop {
        if r.position() >= end {
            return Err(Error::invalid_encoding(
                "document ran past its declared length",
            ));
        }
        let byte = r.read_u8()?;
        if byte == 0 {
            break;
        }
        let tag = ValueTag::from_byte(byte).ok_or_else(|| {
            Error::invalid_encoding(format!("unknown value tag {byte:#04x}"))
        })?;
        let name = r.read_cstring()?.to_owned();
        let value = Value::read_payload(tag, r)?;
        field(&name, value, out)?;
    }

    if r.position() != end {
        return Err(Error::invalid_encoding(format!(
            "document length mismatch: declared {total}, consumed {}",
            r.position() - start
        )));
    }
    Ok(())
}
