//! Wire protocol for RedVault
//!
//! A RESP-like, type-prefixed and CRLF-terminated format. Decoding uses nom's
//! streaming combinators so a partially received frame reports "incomplete"
//! instead of failing, which lets the connection simply read more bytes.

use crate::error::{RedVaultError, Result};
use bytes::{Buf, Bytes, BytesMut};
use nom::{
    bytes::streaming::{tag, take, take_until},
    error::{Error as NomError, ErrorKind},
    sequence::terminated,
    Err as NomErr, IResult, Needed,
};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

const CRLF: &[u8] = b"\r\n";

/// Deepest array nesting accepted from the wire.
pub const MAX_NESTING: usize = 512;

/// Largest bulk string payload accepted from the wire (512 MiB).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// A single protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<Value>),
    Null,
    /// Produces no bytes at all. Returned by commands whose replies were
    /// already pushed to the session.
    Empty,
}

/// Discriminant of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Error,
    Integer,
    BulkString,
    Array,
    Null,
    Empty,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Error => "error",
            ValueKind::Integer => "integer",
            ValueKind::BulkString => "bulk_string",
            ValueKind::Array => "array",
            ValueKind::Null => "null",
            ValueKind::Empty => "empty",
        };
        f.write_str(name)
    }
}

impl Value {
    /// The `+OK` reply
    pub fn ok() -> Self {
        Value::String("OK".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(message.into())
    }

    pub fn bulk(payload: impl Into<Bytes>) -> Self {
        Value::BulkString(payload.into())
    }

    /// Build a request frame: an Array of BulkStrings
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Value::Array(
            args.into_iter()
                .map(|arg| Value::BulkString(Bytes::copy_from_slice(arg.as_ref())))
                .collect(),
        )
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Error(_) => ValueKind::Error,
            Value::Integer(_) => ValueKind::Integer,
            Value::BulkString(_) => ValueKind::BulkString,
            Value::Array(_) => ValueKind::Array,
            Value::Null => ValueKind::Null,
            Value::Empty => ValueKind::Empty,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Value::BulkString(payload) => Some(payload),
            _ => None,
        }
    }

    /// Serialize to the wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            Value::String(text) => {
                buf.push(b'+');
                write_line(buf, text);
            }
            Value::Error(message) => {
                buf.push(b'-');
                write_line(buf, message);
            }
            Value::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::BulkString(payload) => {
                buf.push(b'$');
                buf.extend_from_slice(payload.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(payload);
                buf.extend_from_slice(CRLF);
            }
            Value::Array(items) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::Null => buf.extend_from_slice(b"_\r\n"),
            Value::Empty => {}
        }
    }
}

/// Simple lines cannot carry CR or LF; they become spaces so one value
/// always stays one frame.
fn write_line(buf: &mut Vec<u8>, text: &str) {
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(CRLF);
}

/// Decode one frame from the front of `input`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and the
/// number of bytes it occupied.
pub fn parse_value(input: &[u8]) -> Result<Option<(Value, usize)>> {
    match frame(input) {
        Ok((rest, value)) => Ok(Some((value, input.len() - rest.len()))),
        Err(NomErr::Incomplete(_)) => Ok(None),
        Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => Err(RedVaultError::Protocol(format!(
            "invalid {} at byte {}",
            describe(e.code),
            input.len() - e.input.len()
        ))),
    }
}

fn describe(code: ErrorKind) -> &'static str {
    match code {
        ErrorKind::Digit => "length or integer field",
        ErrorKind::LengthValue => "negative length",
        ErrorKind::TooLarge => "bulk length over limit",
        ErrorKind::Count => "nesting depth",
        ErrorKind::Tag => "type tag or terminator",
        _ => "frame",
    }
}

/// Top-level entry point. An unknown type byte here is reported as a
/// bulk-string notice rather than an error.
fn frame(input: &[u8]) -> IResult<&[u8], Value> {
    match input.first() {
        None => Err(NomErr::Incomplete(Needed::new(1))),
        Some(b'+' | b'-' | b':' | b'$' | b'*' | b'_') => value(input, 0),
        Some(&other) => {
            let (rest, _) = line(&input[1..])?;
            let notice = format!("unrecognized type tag '{}'", (other as char).escape_default());
            Ok((rest, Value::BulkString(Bytes::from(notice))))
        }
    }
}

fn value(input: &[u8], depth: usize) -> IResult<&[u8], Value> {
    let (rest, type_tag) = take(1usize)(input)?;
    match type_tag[0] {
        b'+' => {
            let (rest, text) = line(rest)?;
            Ok((rest, Value::String(String::from_utf8_lossy(text).into_owned())))
        }
        b'-' => {
            let (rest, text) = line(rest)?;
            Ok((rest, Value::Error(String::from_utf8_lossy(text).into_owned())))
        }
        b':' => {
            let (rest, n) = integer(rest)?;
            Ok((rest, Value::Integer(n)))
        }
        b'$' => bulk_string(rest),
        b'*' => array(rest, depth),
        b'_' => {
            let (rest, _) = tag(CRLF)(rest)?;
            Ok((rest, Value::Null))
        }
        _ => Err(NomErr::Failure(NomError::new(input, ErrorKind::Tag))),
    }
}

fn line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until(CRLF), tag(CRLF))(input)
}

fn integer(input: &[u8]) -> IResult<&[u8], i64> {
    let (rest, digits) = line(input)?;
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .map(|n| (rest, n))
        .ok_or_else(|| NomErr::Failure(NomError::new(input, ErrorKind::Digit)))
}

fn bulk_string(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, len) = integer(input)?;
    match len {
        -1 => Ok((rest, Value::Null)),
        len if len < 0 => Err(NomErr::Failure(NomError::new(input, ErrorKind::LengthValue))),
        len if len > MAX_BULK_LEN => {
            Err(NomErr::Failure(NomError::new(input, ErrorKind::TooLarge)))
        }
        len => {
            let (rest, payload) = terminated(take(len as usize), tag(CRLF))(rest)?;
            Ok((rest, Value::BulkString(Bytes::copy_from_slice(payload))))
        }
    }
}

fn array(input: &[u8], depth: usize) -> IResult<&[u8], Value> {
    if depth >= MAX_NESTING {
        return Err(NomErr::Failure(NomError::new(input, ErrorKind::Count)));
    }

    let (mut rest, len) = integer(input)?;
    match len {
        -1 => Ok((rest, Value::Null)),
        len if len < 0 => Err(NomErr::Failure(NomError::new(input, ErrorKind::LengthValue))),
        len => {
            // Grow as elements arrive; the header alone is not trusted for capacity.
            let mut items = Vec::new();
            for _ in 0..len {
                let (next, item) = value(rest, depth + 1)?;
                items.push(item);
                rest = next;
            }
            Ok((rest, Value::Array(items)))
        }
    }
}

/// Buffered frame decoder over any async byte stream
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read the next complete value.
    ///
    /// `Ok(None)` means the peer closed the stream on a frame boundary.
    /// This method is cancel safe: bytes already read stay buffered.
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some((value, consumed)) = parse_value(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some(value));
            }

            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(RedVaultError::Protocol(
                        "unexpected end of stream".to_string(),
                    ))
                };
            }
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}
