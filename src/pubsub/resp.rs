//! RESP2 framing for the Redis broker.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::BrokerError;

/// A decoded RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Text content of a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(s) => Some(s.clone()),
            RespValue::Bulk(Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }
}

/// A command sent as an array of bulk strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(pub Vec<Vec<u8>>);

impl Command {
    pub fn new<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Command(args.into_iter().map(|a| a.as_ref().to_vec()).collect())
    }
}

/// Upper bound on a single bulk string or array length.
const MAX_LENGTH: i64 = 512 * 1024 * 1024;

/// Codec for RESP2 replies (decode) and commands (encode).
#[derive(Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, BrokerError> {
        match parse(src, 0)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Command> for RespCodec {
    type Error = BrokerError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), BrokerError> {
        dst.put_slice(format!("*{}\r\n", command.0.len()).as_bytes());
        for arg in command.0 {
            dst.put_slice(format!("${}\r\n", arg.len()).as_bytes());
            dst.put_slice(&arg);
            dst.put_slice(b"\r\n");
        }
        Ok(())
    }
}

/// Parse one value starting at `pos`. Returns the value and the end offset,
/// or `None` if the buffer does not hold a complete value yet.
fn parse(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, BrokerError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((RespValue::Simple(text(line)?), next))),
        b'-' => Ok(Some((RespValue::Error(text(line)?), next))),
        b':' => Ok(Some((RespValue::Integer(number(line)?), next))),
        b'$' => {
            let len = number(line)?;
            if len < 0 {
                return Ok(Some((RespValue::Bulk(None), next)));
            }
            check_length(len)?;
            let end = next + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(BrokerError::Protocol("bulk string not terminated".into()));
            }
            Ok(Some((RespValue::Bulk(Some(buf[next..end].to_vec())), end + 2)))
        }
        b'*' => {
            let len = number(line)?;
            if len < 0 {
                return Ok(Some((RespValue::Array(None), next)));
            }
            check_length(len)?;
            let mut items = Vec::with_capacity(len.min(64) as usize);
            let mut cursor = next;
            for _ in 0..len {
                match parse(buf, cursor)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(BrokerError::Protocol(format!(
            "unexpected type byte 0x{other:02x}"
        ))),
    }
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let offset = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..offset], start + offset + 2))
}

fn text(line: &[u8]) -> Result<String, BrokerError> {
    String::from_utf8(line.to_vec()).map_err(|_| BrokerError::Protocol("non-utf8 line".into()))
}

fn number(line: &[u8]) -> Result<i64, BrokerError> {
    text(line)?
        .parse()
        .map_err(|_| BrokerError::Protocol("invalid integer".into()))
}

fn check_length(len: i64) -> Result<(), BrokerError> {
    if len > MAX_LENGTH {
        return Err(BrokerError::Protocol(format!("length {len} exceeds limit")));
    }
    Ok(())
}
