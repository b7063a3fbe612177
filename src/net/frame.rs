//! Data structures and functions for parsing and representing values from RESP as
//! message frames in a network environment

use std::io::Cursor;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const MAX_BULK_STRING_LENGTH: usize = 512 * (1 << 20); // 512MB

// Commands are flat arrays, deeper nesting is only tolerated up to this level
const MAX_DEPTH: usize = 32;

/// Error from parsing a frame
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// There's not enough bytes to form a frame
    #[error("Incomplete frame")]
    Incomplete,

    /// Unexpected bytes encountered during parse
    #[error("Invalid frame encoding")]
    BadEncoding,

    /// Could not read bytes as integer
    #[error("Could not parse bytes as an integer (got {0})")]
    NotInteger(String),

    /// Could not read bytes as utf8 string
    #[error("Could not parse bytes as an UTF-8 string - {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

/// A frame in [Redis Serialization Protocol (RESP)].
///
/// This is the smallest data unit that is accepted by the client and the server when
/// they communicate over the network.
///
/// [Redis Serialization Protocol (RESP)]: https://redis.io/topics/protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// An UTF-8 string that does not contain a line terminator. Every reply sent by the
    /// server is of this kind.
    SimpleString(String),
    /// An UTF-8 string that does not contain a line terminator, used for reporting errors.
    Error(String),
    /// A signed 64-bit number.
    Integer(i64),
    /// A length-prefixed bytes sequence.
    BulkString(Bytes),
    /// A sequence of frames.
    Array(Vec<Frame>),
    /// Nothingness. Produced by a `$-1` bulk string or by an empty line.
    Null,
}

/// Wraps a text as a simple string frame: `+`, the text, then CRLF.
///
/// The text must not contain a line terminator.
pub fn serialize(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 3);
    buf.put_u8(b'+');
    buf.put_slice(text.as_bytes());
    buf.put_slice(b"\r\n");
    buf.freeze()
}

impl Frame {
    /// Try to read data of a frame from the given reader.
    ///
    /// Returns the frame if it can be parsed from the reader, otherwise, returns an error.
    /// The error variant [`Error::Incomplete`] indicates that the reader does not have
    /// enough data for the frame; caller should retry later after receiving this error.
    /// On success, the reader is positioned right after the parsed frame.
    pub fn parse(reader: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        parse_nested(reader, MAX_DEPTH, false)
    }

    /// Parse the last bytes a peer sent before closing its side of the stream.
    ///
    /// An array keeps the elements that were fully received, the ones that never arrived are
    /// left out. Any other incomplete frame is still [`Error::Incomplete`]. The reader is
    /// positioned at the end of its data when an array was cut short.
    pub fn parse_truncated(reader: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        parse_nested(reader, MAX_DEPTH, true)
    }

    /// Checks if a message frame can be parsed from the reader without memory allocations.
    pub fn check(buf: &mut Cursor<&[u8]>) -> Result<(), Error> {
        check_nested(buf, MAX_DEPTH)
    }
}

fn parse_nested(
    reader: &mut Cursor<&[u8]>,
    depth: usize,
    truncated: bool,
) -> Result<Frame, Error> {
    match get_byte(reader)? {
        b'\r' => {
            // An empty line carries no command
            expect_byte(reader, b'\n')?;
            Ok(Frame::Null)
        }
        b'+' => {
            let s = get_string(reader)?;
            Ok(Frame::SimpleString(s))
        }
        b'-' => {
            let e = get_string(reader)?;
            Ok(Frame::Error(e))
        }
        b':' => {
            let x = get_integer(reader)?;
            Ok(Frame::Integer(x))
        }
        b'$' => match get_bulk_length(reader)? {
            None => Ok(Frame::Null),
            Some(len) => {
                if len + 2 > reader.remaining() {
                    return Err(Error::Incomplete);
                }
                let b = reader.copy_to_bytes(len);
                expect_crlf(reader)?;
                Ok(Frame::BulkString(b))
            }
        },
        b'*' => {
            let depth = depth.checked_sub(1).ok_or(Error::BadEncoding)?;
            let len = get_array_length(reader)?;
            // Don't trust the declared length for the allocation
            let mut items = Vec::with_capacity(len.min(reader.remaining()));
            for _ in 0..len {
                match parse_nested(reader, depth, truncated) {
                    Ok(item) => items.push(item),
                    Err(Error::Incomplete) if truncated => {
                        let end = reader.get_ref().len() as u64;
                        reader.set_position(end);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(Frame::Array(items))
        }
        // Unknown markers are tolerated, the rest of the line is taken as is
        _ => {
            let s = get_string(reader)?;
            Ok(Frame::SimpleString(s))
        }
    }
}

fn check_nested(buf: &mut Cursor<&[u8]>, depth: usize) -> Result<(), Error> {
    match get_byte(buf)? {
        b'\r' => expect_byte(buf, b'\n')?,
        b':' => {
            get_integer(buf)?;
        }
        b'$' => {
            if let Some(len) = get_bulk_length(buf)? {
                skip(buf, len)?;
                expect_crlf(buf)?;
            }
        }
        b'*' => {
            let depth = depth.checked_sub(1).ok_or(Error::BadEncoding)?;
            let len = get_array_length(buf)?;
            for _ in 0..len {
                check_nested(buf, depth)?;
            }
        }
        _ => {
            get_line(buf)?;
        }
    }
    Ok(())
}

/// Read until a CRLF sequence and skip past it. A lone '\r' is part of the line, a lone '\n'
/// is rejected.
fn get_line<'a>(buf: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let data: &'a [u8] = *buf.get_ref();
    let start = buf.position() as usize;
    for i in start..data.len() {
        match data[i] {
            b'\r' => match data.get(i + 1) {
                Some(b'\n') => {
                    buf.set_position((i + 2) as u64);
                    return Ok(&data[start..i]);
                }
                Some(_) => {}
                None => return Err(Error::Incomplete),
            },
            b'\n' => return Err(Error::BadEncoding),
            _ => {}
        }
    }
    Err(Error::Incomplete)
}

fn get_string(buf: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let line = get_line(buf)?;
    Ok(std::str::from_utf8(line)?.to_string())
}

fn get_integer(buf: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = get_line(buf)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::NotInteger(String::from_utf8_lossy(line).to_string()))
}

/// Returns `None` for the null bulk string.
fn get_bulk_length(buf: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    match get_integer(buf)? {
        -1 => Ok(None),
        n => {
            let len: usize = n.try_into().map_err(|_| Error::BadEncoding)?;
            if len > MAX_BULK_STRING_LENGTH {
                return Err(Error::BadEncoding);
            }
            Ok(Some(len))
        }
    }
}

fn get_array_length(buf: &mut Cursor<&[u8]>) -> Result<usize, Error> {
    let n = get_integer(buf)?;
    n.try_into().map_err(|_| Error::BadEncoding)
}

fn get_byte(buf: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !buf.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(buf.get_u8())
}

fn expect_byte(buf: &mut Cursor<&[u8]>, expected: u8) -> Result<(), Error> {
    if get_byte(buf)? != expected {
        return Err(Error::BadEncoding);
    }
    Ok(())
}

fn expect_crlf(buf: &mut Cursor<&[u8]>) -> Result<(), Error> {
    if buf.remaining() < 2 {
        return Err(Error::Incomplete);
    }
    expect_byte(buf, b'\r')?;
    expect_byte(buf, b'\n')
}

fn skip(buf: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if buf.remaining() < n {
        return Err(Error::Incomplete);
    }
    buf.advance(n);
    Ok(())
}
