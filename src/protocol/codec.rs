//! Newline-delimited JSON framing for [`Packet`]s.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::ProtocolError;
use crate::protocol::Packet;

/// Largest frame accepted from a peer (16 MiB).
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Frames packets as one compact JSON object per line.
#[derive(Debug)]
pub struct PacketCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn lift(&self, err: LinesCodecError) -> ProtocolError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong {
                max: self.max_length,
            },
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }

    fn parse(line: &str) -> Result<Packet, ProtocolError> {
        let packet: Packet = serde_json::from_str(line)?;
        packet.validate()?;
        Ok(packet)
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        loop {
            match self.lines.decode(src) {
                // Blank lines are keep-alives.
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Self::parse(&line).map(Some),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.lift(e)),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Self::parse(&line).map(Some),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.lift(e)),
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let line = serde_json::to_string(&packet)?;
        if line.len() > self.max_length {
            return Err(ProtocolError::FrameTooLong {
                max: self.max_length,
            });
        }
        self.lines.encode(line, dst).map_err(|e| self.lift(e))
    }
}
