//! Bencode decoding and encoding: the dictionary/list/integer/byte-string
//! wire format used by `.torrent` files and tracker replies.
//!
//! The decoder produces a tagged value tree ([`Value`]) rather than
//! deserializing directly into typed structs: callers (metainfo parsing,
//! tracker response parsing) walk the tree themselves, which keeps this
//! crate free of derive-macro machinery and makes strict-mode re-encoding
//! (needed to stabilize the infohash) a direct tree round-trip.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    Eof,
    #[error("expected one of 'i', 'l', 'd', or a digit at offset {0}")]
    UnexpectedByte(usize),
    #[error("integer has a leading zero or a malformed sign at offset {0}")]
    MalformedInteger(usize),
    #[error("invalid integer at offset {0}")]
    InvalidInteger(usize),
    #[error("byte-string length is not numeric at offset {0}")]
    InvalidStringLength(usize),
    #[error("missing ':' after byte-string length at offset {0}")]
    MissingStringColon(usize),
    #[error("dictionary keys are not sorted at offset {0}")]
    UnsortedDictKeys(usize),
    #[error("dictionary key is not a byte string at offset {0}")]
    NonStringDictKey(usize),
    #[error("trailing bytes after a complete value")]
    TrailingData,
}

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Bytes),
    List(Vec<Value>),
    /// Keyed by raw byte-string keys and kept in sorted order so that
    /// re-encoding a strictly-decoded dict is byte-identical to the input.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(key.as_bytes())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "{s:?}"),
                Err(_) => write!(f, "<{} raw bytes>", b.len()),
            },
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Dict(d) => {
                write!(f, "{{")?;
                for (i, (k, v)) in d.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match std::str::from_utf8(k) {
                        Ok(s) => write!(f, "{s:?}: {v}")?,
                        Err(_) => write!(f, "<bytes>: {v}")?,
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

/// Whether the decoder enforces the strict-mode invariants: sorted dict
/// keys, no leading zeros / negative zero in integers. Tracker replies are
/// decoded leniently; infohash computation requires strict re-encoding to
/// stabilize the hash (see §4.1 of the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Strict,
    Lenient,
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    mode: Mode,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8], mode: Mode) -> Self {
        Self { buf, pos: 0, mode }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn value(&mut self) -> Result<Value, DecodeError> {
        match self.peek().ok_or(DecodeError::Eof)? {
            b'i' => self.integer(),
            b'l' => self.list(),
            b'd' => self.dict(),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            _ => Err(DecodeError::UnexpectedByte(self.pos)),
        }
    }

    fn integer(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        self.advance(); // 'i'
        let digits_start = self.pos;
        if self.peek() == Some(b'e') {
            return Err(DecodeError::InvalidInteger(start));
        }
        let negative = self.peek() == Some(b'-');
        if negative {
            self.advance();
        }
        let num_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        let digits = &self.buf[num_start..self.pos];
        if digits.is_empty() {
            return Err(DecodeError::InvalidInteger(start));
        }
        if self.mode == Mode::Strict {
            if digits.len() > 1 && digits[0] == b'0' {
                return Err(DecodeError::MalformedInteger(start));
            }
            if negative && digits == b"0" {
                return Err(DecodeError::MalformedInteger(start));
            }
        }
        if self.advance() != Some(b'e') {
            return Err(DecodeError::InvalidInteger(start));
        }
        let text = std::str::from_utf8(&self.buf[digits_start..self.pos - 1])
            .map_err(|_| DecodeError::InvalidInteger(start))?;
        let n: i64 = text.parse().map_err(|_| DecodeError::InvalidInteger(start))?;
        Ok(Value::Int(n))
    }

    fn bytes(&mut self) -> Result<Bytes, DecodeError> {
        let start = self.pos;
        let len_start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.advance();
        }
        if self.pos == len_start {
            return Err(DecodeError::InvalidStringLength(start));
        }
        let len_text = std::str::from_utf8(&self.buf[len_start..self.pos])
            .map_err(|_| DecodeError::InvalidStringLength(start))?;
        let len: usize = len_text
            .parse()
            .map_err(|_| DecodeError::InvalidStringLength(start))?;
        if self.advance() != Some(b':') {
            return Err(DecodeError::MissingStringColon(start));
        }
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or(DecodeError::Eof)?;
        let out = Bytes::copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn list(&mut self) -> Result<Value, DecodeError> {
        self.advance(); // 'l'
        let mut items = Vec::new();
        loop {
            match self.peek().ok_or(DecodeError::Eof)? {
                b'e' => {
                    self.advance();
                    return Ok(Value::List(items));
                }
                _ => items.push(self.value()?),
            }
        }
    }

    fn dict(&mut self) -> Result<Value, DecodeError> {
        let dict_start = self.pos;
        self.advance(); // 'd'
        let mut map = BTreeMap::new();
        let mut last_key: Option<Bytes> = None;
        loop {
            match self.peek().ok_or(DecodeError::Eof)? {
                b'e' => {
                    self.advance();
                    return Ok(Value::Dict(map));
                }
                b'0'..=b'9' => {
                    let key_start = self.pos;
                    let key = self.bytes()?;
                    if self.mode == Mode::Strict {
                        if let Some(prev) = &last_key {
                            if &key <= prev {
                                return Err(DecodeError::UnsortedDictKeys(key_start));
                            }
                        }
                        last_key = Some(key.clone());
                    }
                    let value = self.value()?;
                    map.insert(key, value);
                }
                _ => return Err(DecodeError::NonStringDictKey(dict_start)),
            }
        }
    }
}

/// Decode a single bencode value from `buf`. `buf` must contain exactly
/// one value with no trailing bytes.
pub fn decode(buf: &[u8], mode: Mode) -> Result<Value, DecodeError> {
    let (value, rest) = decode_prefix(buf, mode)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingData);
    }
    Ok(value)
}

/// Decode a single bencode value, returning the unconsumed remainder of
/// `buf`. Used by the infohash computation, which needs to know exactly
/// how many bytes the `info` dictionary occupied.
pub fn decode_prefix(buf: &[u8], mode: Mode) -> Result<(Value, &[u8]), DecodeError> {
    let mut d = Decoder::new(buf, mode);
    let value = d.value()?;
    Ok((value, &buf[d.pos..]))
}

/// Encode a value. This is the exact inverse of [`decode`] for any value
/// that was itself produced by the decoder (dict keys are always emitted
/// in sorted order, which is also bencode's canonical order).
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(b) => {
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(b);
        }
        Value::List(l) => {
            out.push(b'l');
            for v in l {
                encode_into(v, out);
            }
            out.push(b'e');
        }
        Value::Dict(d) => {
            out.push(b'd');
            for (k, v) in d {
                encode_into(&Value::Bytes(k.clone()), out);
                encode_into(v, out);
            }
            out.push(b'e');
        }
    }
}

/// Convenience: build a dict `Value` from `(&str, Value)` pairs.
pub fn dict(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut map = BTreeMap::new();
    for (k, v) in entries {
        map.insert(Bytes::from_static(k.as_bytes()), v);
    }
    Value::Dict(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Value {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn decode_integers() {
        assert_eq!(decode(b"i42e", Mode::Strict).unwrap(), Value::Int(42));
        assert_eq!(decode(b"i-42e", Mode::Strict).unwrap(), Value::Int(-42));
        assert_eq!(decode(b"i0e", Mode::Strict).unwrap(), Value::Int(0));
    }

    #[test]
    fn reject_leading_zero_and_negative_zero_in_strict_mode() {
        assert!(decode(b"i04e", Mode::Strict).is_err());
        assert!(decode(b"i-0e", Mode::Strict).is_err());
        // Lenient mode still parses them (tracker replies are lenient).
        assert_eq!(decode(b"i04e", Mode::Lenient).unwrap(), Value::Int(4));
    }

    #[test]
    fn decode_bytes() {
        assert_eq!(decode(b"4:spam", Mode::Strict).unwrap(), b("spam"));
        assert_eq!(decode(b"0:", Mode::Strict).unwrap(), b(""));
    }

    #[test]
    fn decode_list_and_dict() {
        let v = decode(b"l4:spam4:eggse", Mode::Strict).unwrap();
        assert_eq!(v, Value::List(vec![b("spam"), b("eggs")]));

        let v = decode(b"d3:cow3:moo4:spam4:eggse", Mode::Strict).unwrap();
        let d = v.as_dict().unwrap();
        assert_eq!(d.get(&Bytes::from_static(b"cow")), Some(&b("moo")));
        assert_eq!(d.get(&Bytes::from_static(b"spam")), Some(&b("eggs")));
    }

    #[test]
    fn strict_mode_rejects_unsorted_keys() {
        // "spam" then "cow" is not lexicographic order.
        assert!(decode(b"d4:spam4:eggs3:cow3:mooe", Mode::Strict).is_err());
        assert!(decode(b"d4:spam4:eggs3:cow3:mooe", Mode::Lenient).is_ok());
    }

    #[test]
    fn round_trip_is_byte_identical_for_canonical_input() {
        let inputs: &[&[u8]] = &[
            b"i42e",
            b"4:spam",
            b"l4:spam4:eggse",
            b"d3:cow3:moo4:spam4:eggse",
            b"d8:intervali1800e5:peers6:\x01\x02\x03\x04\x1f\x90e",
        ];
        for input in inputs {
            let v = decode(input, Mode::Strict).unwrap();
            let back = encode(&v);
            assert_eq!(&back, input);
            // decode(encode(v)) == v
            let v2 = decode(&back, Mode::Strict).unwrap();
            assert_eq!(v, v2);
        }
    }

    #[test]
    fn decode_prefix_reports_remainder() {
        let (v, rest) = decode_prefix(b"i1e_extra", Mode::Strict).unwrap();
        assert_eq!(v, Value::Int(1));
        assert_eq!(rest, b"_extra");
    }

    #[test]
    fn truncated_input_is_an_error() {
        assert_eq!(decode(b"5:spam", Mode::Strict), Err(DecodeError::Eof));
        assert_eq!(decode(b"i42", Mode::Strict), Err(DecodeError::InvalidInteger(0)));
        assert_eq!(decode(b"d3:cow", Mode::Strict), Err(DecodeError::Eof));
    }
}
