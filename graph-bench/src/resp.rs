//! Minimal RESP2 framing for the handful of commands the benchmark sends.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{BenchError, Result};

/// Largest bulk string or array accepted from the server
const MAX_LENGTH: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string
    Bulk(Option<Bytes>),
    /// `None` is the null array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Command array of bulk strings
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        RespValue::Array(Some(
            parts
                .into_iter()
                .map(|p| RespValue::Bulk(Some(Bytes::copy_from_slice(p.as_ref().as_bytes()))))
                .collect(),
        ))
    }

    /// Text of a simple or bulk string
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(Some(items)) => Some(items),
            _ => None,
        }
    }
}

/// RESP2 codec: decodes any reply, encodes any value (commands are arrays).
///
/// Decoding is resumable. Finished elements of an array are consumed from the
/// buffer as soon as they parse and kept on a stack of partial arrays, so a
/// reply arriving over many reads is scanned once.
#[derive(Debug, Default, Clone)]
pub struct RespCodec {
    pending: Vec<PartialArray>,
}

#[derive(Debug, Clone)]
struct PartialArray {
    remaining: usize,
    items: Vec<RespValue>,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a finished value to the innermost open array, closing every
    /// array it completes. Returns the value once no array is left open.
    fn complete(&mut self, mut value: RespValue) -> Option<RespValue> {
        while let Some(top) = self.pending.last_mut() {
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let finished = self.pending.pop()?;
            value = RespValue::Array(Some(finished.items));
        }
        Some(value)
    }
}

/// One step of decoding: a whole scalar or the header of a non-empty array
enum Token {
    Value(RespValue),
    ArrayStart(usize),
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = BenchError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>> {
        loop {
            let Some((token, consumed)) = next_token(src)? else {
                return Ok(None);
            };
            src.advance(consumed);

            match token {
                Token::ArrayStart(len) => self.pending.push(PartialArray {
                    remaining: len,
                    items: Vec::with_capacity(len.min(1024)),
                }),
                Token::Value(value) => {
                    if let Some(done) = self.complete(value) {
                        return Ok(Some(done));
                    }
                }
            }
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = BenchError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<()> {
        write_value(&item, dst);
        Ok(())
    }
}

fn write_value(value: &RespValue, dst: &mut BytesMut) {
    match value {
        RespValue::Simple(s) => write_line(dst, b'+', s.as_bytes()),
        RespValue::Error(s) => write_line(dst, b'-', s.as_bytes()),
        RespValue::Integer(n) => write_line(dst, b':', n.to_string().as_bytes()),
        RespValue::Bulk(None) => write_line(dst, b'$', b"-1"),
        RespValue::Bulk(Some(data)) => {
            write_line(dst, b'$', data.len().to_string().as_bytes());
            dst.reserve(data.len() + 2);
            dst.put_slice(data);
            dst.put_slice(b"\r\n");
        }
        RespValue::Array(None) => write_line(dst, b'*', b"-1"),
        RespValue::Array(Some(items)) => {
            write_line(dst, b'*', items.len().to_string().as_bytes());
            for item in items {
                write_value(item, dst);
            }
        }
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

/// Line starting at `pos` without its CRLF, plus the offset after it
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..end], pos + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            BenchError::Protocol(format!(
                "invalid integer '{}'",
                String::from_utf8_lossy(line)
            ))
        })
}

fn parse_length(line: &[u8]) -> Result<i64> {
    let len = parse_int(line)?;
    if len < -1 || len > MAX_LENGTH {
        return Err(BenchError::Protocol(format!("invalid length {}", len)));
    }
    Ok(len)
}

/// Parse the next token at the start of `buf`. `Ok(None)` means more bytes
/// are needed; nothing is consumed in that case.
fn next_token(buf: &mut BytesMut) -> Result<Option<(Token, usize)>> {
    let Some(&kind) = buf.first() else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, 1) else {
        return Ok(None);
    };

    let token = match kind {
        b'+' => (Token::Value(RespValue::Simple(String::from_utf8_lossy(line).into_owned())), next),
        b'-' => (Token::Value(RespValue::Error(String::from_utf8_lossy(line).into_owned())), next),
        b':' => (Token::Value(RespValue::Integer(parse_int(line)?)), next),
        b'$' => {
            let len = parse_length(line)?;
            if len < 0 {
                (Token::Value(RespValue::Bulk(None)), next)
            } else {
                let end = next + len as usize;
                if buf.len() < end + 2 {
                    buf.reserve(end + 2 - buf.len());
                    return Ok(None);
                }
                if &buf[end..end + 2] != b"\r\n" {
                    return Err(BenchError::Protocol(
                        "bulk string is not terminated by CRLF".to_string(),
                    ));
                }
                let data = Bytes::copy_from_slice(&buf[next..end]);
                (Token::Value(RespValue::Bulk(Some(data))), end + 2)
            }
        }
        b'*' => match parse_length(line)? {
            len if len < 0 => (Token::Value(RespValue::Array(None)), next),
            0 => (Token::Value(RespValue::Array(Some(Vec::new()))), next),
            len => (Token::ArrayStart(len as usize), next),
        },
        other => {
            return Err(BenchError::Protocol(format!(
                "unexpected type byte 0x{:02x}",
                other
            )))
        }
    };

    Ok(Some(token))
}
