//! RESP (REdis Serialization Protocol) wire codec.
//!
//! Decoding works off an incrementally-filled byte buffer: a truncated frame
//! is not an error, it's a signal to read more bytes and retry.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("protocol error: expected '{expected}', got '{got}'")]
    UnexpectedPrefix { expected: char, got: char },
    #[error("protocol error: invalid integer in frame")]
    InvalidInteger,
    #[error("protocol error: {0}")]
    Malformed(&'static str),
}

/// A decoded (or to-be-encoded) RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string ($-1\r\n).
    Bulk(Option<Bytes>),
    /// `None` is the null array (*-1\r\n); unused by this server but decodable.
    Array(Option<Vec<Value>>),
}

impl Value {
    pub fn bulk(bytes: impl Into<Bytes>) -> Self {
        Value::Bulk(Some(bytes.into()))
    }

    pub fn null_bulk() -> Self {
        Value::Bulk(None)
    }

    pub fn ok() -> Self {
        Value::Simple("OK".to_string())
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Some(values))
    }

    pub fn empty_array() -> Self {
        Value::Array(Some(Vec::new()))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Value::Error(msg.into())
    }

    /// Extracts a top-level command array as a vector of argument byte strings,
    /// if this value decodes as one (clients always send commands as arrays of
    /// bulk strings).
    pub fn as_command_args(&self) -> Option<Vec<Bytes>> {
        let Value::Array(Some(items)) = self else {
            return None;
        };
        let mut args = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Bulk(Some(b)) => args.push(b.clone()),
                _ => return None,
            }
        }
        Some(args)
    }

    /// Encodes this value into `out`, following RESP rules (§4.1 of the design):
    /// integers as `:N\r\n`, bulk strings length-prefixed, nulls as `$-1\r\n`,
    /// text beginning with `-` as an error line, otherwise a simple string.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Value::Simple(s) => {
                out.extend_from_slice(b"+");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Error(s) => {
                out.extend_from_slice(b"-");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Integer(n) => {
                out.extend_from_slice(b":");
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(CRLF);
            }
            Value::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Value::Bulk(Some(bytes)) => {
                out.extend_from_slice(b"$");
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                out.extend_from_slice(bytes);
                out.extend_from_slice(CRLF);
            }
            Value::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            Value::Array(Some(items)) => {
                out.extend_from_slice(b"*");
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(CRLF);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Encodes a bulk payload with no trailing CRLF, as required to ship the RDB
/// snapshot during full resync (§4.1's "bare bulk" emission).
pub fn encode_bare_bulk(payload: &[u8], out: &mut BytesMut) {
    out.extend_from_slice(b"$");
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(payload);
}

/// Attempts to decode a single RESP value from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds an incomplete frame; the caller
/// should read more bytes and call again without consuming anything. On
/// success, the consumed bytes are split off the front of `buf`.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Value>, DecodeError> {
    Ok(decode_frame(buf)?.map(|(value, _raw)| value))
}

/// Like [`decode`], but also returns the exact raw bytes that made up the
/// frame. Replication propagation (§4.5, §8 invariant 9) must forward what a
/// client actually sent byte-for-byte, not a re-encoding of the decoded
/// value, so the write-command path threads this through instead of
/// `decode`.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<(Value, Bytes)>, DecodeError> {
    let mut cursor = Cursor::new(buf);
    match parse_value(&mut cursor)? {
        Some(value) => {
            let consumed = cursor.pos;
            let raw = Bytes::copy_from_slice(&cursor.buf[..consumed]);
            cursor.buf.advance(consumed);
            Ok(Some((value, raw)))
        }
        None => Ok(None),
    }
}

/// A read-only view over `buf` that tracks how many bytes have been consumed
/// so far, without mutating the underlying buffer until the whole frame is
/// known to be present.
struct Cursor<'a> {
    buf: &'a mut BytesMut,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(2).position(|w| w == CRLF)
}

fn parse_value(c: &mut Cursor) -> Result<Option<Value>, DecodeError> {
    if c.remaining().is_empty() {
        return Ok(None);
    }
    let prefix = c.remaining()[0];
    match prefix {
        b'*' => parse_array(c),
        b'$' => parse_bulk(c),
        b'+' => parse_simple(c),
        b':' => parse_integer(c),
        b'-' => parse_error(c),
        other => Err(DecodeError::UnexpectedPrefix {
            expected: '*',
            got: other as char,
        }),
    }
}

fn parse_line_after_prefix(c: &mut Cursor) -> Option<Vec<u8>> {
    // Skip the one-byte type prefix, then read to CRLF.
    let rest = &c.buf[c.pos + 1..];
    let idx = find_crlf(rest)?;
    let line = c.buf[c.pos + 1..c.pos + 1 + idx].to_vec();
    c.pos += 1 + idx + 2;
    Some(line)
}

fn parse_simple(c: &mut Cursor) -> Result<Option<Value>, DecodeError> {
    match parse_line_after_prefix(c) {
        Some(line) => Ok(Some(Value::Simple(String::from_utf8_lossy(&line).into_owned()))),
        None => Ok(None),
    }
}

fn parse_error(c: &mut Cursor) -> Result<Option<Value>, DecodeError> {
    match parse_line_after_prefix(c) {
        Some(line) => Ok(Some(Value::Error(String::from_utf8_lossy(&line).into_owned()))),
        None => Ok(None),
    }
}

fn parse_integer(c: &mut Cursor) -> Result<Option<Value>, DecodeError> {
    match parse_line_after_prefix(c) {
        Some(line) => {
            let text = std::str::from_utf8(&line).map_err(|_| DecodeError::InvalidInteger)?;
            let n = text.trim().parse::<i64>().map_err(|_| DecodeError::InvalidInteger)?;
            Ok(Some(Value::Integer(n)))
        }
        None => Ok(None),
    }
}

fn parse_bulk(c: &mut Cursor) -> Result<Option<Value>, DecodeError> {
    let start = c.pos;
    let len_line = match parse_line_after_prefix(c) {
        Some(line) => line,
        None => return Ok(None),
    };
    let len_text = std::str::from_utf8(&len_line).map_err(|_| DecodeError::InvalidInteger)?;
    let len: i64 = len_text
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidInteger)?;

    if len < 0 {
        return Ok(Some(Value::Bulk(None)));
    }
    let len = len as usize;

    let remaining = c.buf.len() - c.pos;
    if remaining < len + 2 {
        c.pos = start;
        return Ok(None);
    }

    let payload = c.buf[c.pos..c.pos + len].to_vec();
    if &c.buf[c.pos + len..c.pos + len + 2] != CRLF {
        return Err(DecodeError::Malformed("bulk string missing trailing CRLF"));
    }
    c.pos += len + 2;
    Ok(Some(Value::Bulk(Some(Bytes::from(payload)))))
}

fn parse_array(c: &mut Cursor) -> Result<Option<Value>, DecodeError> {
    let start = c.pos;
    let len_line = match parse_line_after_prefix(c) {
        Some(line) => line,
        None => return Ok(None),
    };
    let len_text = std::str::from_utf8(&len_line).map_err(|_| DecodeError::InvalidInteger)?;
    let len: i64 = len_text
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidInteger)?;

    if len < 0 {
        return Ok(Some(Value::Array(None)));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        match parse_value(c)? {
            Some(v) => items.push(v),
            None => {
                c.pos = start;
                return Ok(None);
            }
        }
    }
    Ok(Some(Value::Array(Some(items))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(s: &[u8]) -> BytesMut {
        BytesMut::from(s)
    }

    #[test]
    fn decodes_simple_ping_array() {
        let mut b = buf(b"*1\r\n$4\r\nPING\r\n");
        let v = decode(&mut b).unwrap().unwrap();
        assert_eq!(
            v.as_command_args().unwrap(),
            vec![Bytes::from_static(b"PING")]
        );
        assert!(b.is_empty());
    }

    #[test]
    fn signals_need_more_on_truncated_bulk() {
        let mut b = buf(b"*1\r\n$4\r\nPI");
        assert!(decode(&mut b).unwrap().is_none());
        // nothing was consumed
        assert_eq!(&b[..], b"*1\r\n$4\r\nPI");
    }

    #[test]
    fn decodes_back_to_back_frames_independently() {
        let mut b = buf(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        let first = decode(&mut b).unwrap().unwrap();
        let second = decode(&mut b).unwrap().unwrap();
        assert_eq!(first, second);
        assert!(b.is_empty());
    }

    #[test]
    fn decodes_null_bulk() {
        let mut b = buf(b"$-1\r\n");
        assert_eq!(decode(&mut b).unwrap().unwrap(), Value::Bulk(None));
    }

    #[test]
    fn encodes_error_for_text_starting_with_dash() {
        let mut out = BytesMut::new();
        Value::error("ERR bad thing").encode(&mut out);
        assert_eq!(&out[..], b"-ERR bad thing\r\n");
    }

    #[test]
    fn encodes_bare_bulk_without_trailing_crlf() {
        let mut out = BytesMut::new();
        encode_bare_bulk(b"abc", &mut out);
        assert_eq!(&out[..], b"$3\r\nabc");
    }
}
