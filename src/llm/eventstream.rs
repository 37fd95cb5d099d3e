//! AWS event-stream framing.
//!
//! Streaming Bedrock responses arrive as binary frames:
//!
//! ```text
//! | total len (u32) | headers len (u32) | prelude crc (u32) |
//! | headers ...                                           |
//! | payload ...                                           |
//! | message crc (u32)                                     |
//! ```
//!
//! All integers are big-endian; both checksums are CRC-32 (IEEE). Frames may
//! be split arbitrarily across network chunks, so the decoder buffers input.

use crate::error::{DatabotError, DatabotResult};

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + CRC_LEN;
/// Frames larger than this are treated as corruption.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// A typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl Message {
    /// Value of a string header.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(k, v)| match v {
            HeaderValue::String(s) if k == name => Some(s.as_str()),
            _ => None,
        })
    }

    /// `:message-type` header (`event`, `exception` or `error`).
    pub fn message_type(&self) -> Option<&str> {
        self.header_str(":message-type")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }
}

/// Incremental frame decoder.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buf: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_message(&mut self) -> DatabotResult<Option<Message>> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buf[0..4]) as usize;
        let headers_len = read_u32(&self.buf[4..8]) as usize;
        let prelude_crc = read_u32(&self.buf[8..12]);

        if crc32fast::hash(&self.buf[0..8]) != prelude_crc {
            return Err(DatabotError::llm("Event stream prelude checksum mismatch"));
        }
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len)
            || headers_len > total_len - MIN_MESSAGE_LEN
        {
            return Err(DatabotError::llm(format!(
                "Invalid event stream frame lengths (total {}, headers {})",
                total_len, headers_len
            )));
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buf.drain(..total_len).collect();
        let message_crc = read_u32(&frame[total_len - CRC_LEN..]);
        if crc32fast::hash(&frame[..total_len - CRC_LEN]) != message_crc {
            return Err(DatabotError::llm("Event stream message checksum mismatch"));
        }

        let headers = decode_headers(&frame[PRELUDE_LEN..PRELUDE_LEN + headers_len])?;
        let payload = frame[PRELUDE_LEN + headers_len..total_len - CRC_LEN].to_vec();
        Ok(Some(Message { headers, payload }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Bounds-checked reader over the header block.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> DatabotResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| DatabotError::llm("Truncated event stream header"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> DatabotResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> DatabotResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn array<const N: usize>(&mut self) -> DatabotResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

fn decode_headers(data: &[u8]) -> DatabotResult<Vec<(String, HeaderValue)>> {
    let mut cursor = Cursor { data, pos: 0 };
    let mut headers = Vec::new();

    while cursor.pos < data.len() {
        let name_len = cursor.u8()? as usize;
        let name = String::from_utf8_lossy(cursor.take(name_len)?).into_owned();
        let value = match cursor.u8()? {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(i8::from_be_bytes(cursor.array()?)),
            3 => HeaderValue::Short(i16::from_be_bytes(cursor.array()?)),
            4 => HeaderValue::Int(i32::from_be_bytes(cursor.array()?)),
            5 => HeaderValue::Long(i64::from_be_bytes(cursor.array()?)),
            6 => {
                let len = cursor.u16()? as usize;
                HeaderValue::Bytes(cursor.take(len)?.to_vec())
            }
            7 => {
                let len = cursor.u16()? as usize;
                HeaderValue::String(String::from_utf8_lossy(cursor.take(len)?).into_owned())
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(cursor.array()?)),
            9 => HeaderValue::Uuid(cursor.array()?),
            other => {
                return Err(DatabotError::llm(format!(
                    "Unknown event stream header type {}",
                    other
                )));
            }
        };
        headers.push((name, value));
    }

    Ok(headers)
}

/// Encode a frame with string-typed headers.
///
/// The inverse of [`MessageDecoder`] for the header type Bedrock uses.
/// Exposed for producing event streams outside a live service, such as local
/// stand-ins for the Bedrock endpoint.
pub fn encode_message(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        header_bytes.push(7);
        header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_bytes.extend_from_slice(value.as_bytes());
    }

    let total_len = (MIN_MESSAGE_LEN + header_bytes.len() + payload.len()) as u32;
    let mut frame = Vec::with_capacity(total_len as usize);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&header_bytes);
    frame.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}
