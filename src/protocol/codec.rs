//! Streaming JSON framing for packets
//!
//! There is no length prefix on the wire. The decoder scans incoming
//! bytes for the end of the top-level JSON object, keeping its position
//! between calls so every byte is examined once, then parses the complete
//! object into a [`Packet`]. Anything after the object stays in the
//! buffer for the next call.

use crate::error::{Error, Result};
use crate::protocol::packet::Packet;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest packet the decoder will buffer before giving up.
pub const MAX_PACKET_BYTES: usize = 16 * 1024 * 1024;

/// Packet framing codec. Holds the scan state of the packet currently
/// being received, so use one instance per stream.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    /// Bytes of the current packet already scanned.
    scanned: usize,
    /// Open objects and arrays at `scanned`.
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl PacketCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `src` from where the last call stopped. Returns the length of
    /// the top-level object once its closing brace has been seen.
    fn find_end(&mut self, src: &[u8]) -> Result<Option<usize>> {
        if self.scanned == 0 && src.first() != Some(&b'{') {
            return Err(Error::MalformedPacket(
                "packet must be a JSON object".into(),
            ));
        }

        for (i, &byte) in src.iter().enumerate().skip(self.scanned) {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    // The leading `{` keeps depth above zero until the
                    // packet ends; mismatched pairs are left to the parser.
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        *self = Self::default();
                        return Ok(Some(i + 1));
                    }
                }
                _ => {}
            }
        }

        self.scanned = src.len();
        Ok(None)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if self.scanned == 0 {
            let blank = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
            src.advance(blank);
            if src.is_empty() {
                return Ok(None);
            }
        }

        let Some(end) = self.find_end(src)? else {
            if src.len() > MAX_PACKET_BYTES {
                return Err(Error::MalformedPacket(format!(
                    "packet exceeds {MAX_PACKET_BYTES} bytes"
                )));
            }
            return Ok(None);
        };

        let packet = serde_json::from_slice::<Packet>(&src[..end])
            .map_err(|e| Error::MalformedPacket(e.to_string()))?;
        src.advance(end);
        Ok(Some(packet))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        if src.is_empty() {
            Ok(None)
        } else {
            let pending = src.len();
            src.clear();
            *self = Self::default();
            Err(Error::MalformedPacket(format!(
                "stream ended inside a packet ({pending} bytes pending)"
            )))
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&packet)
            .map_err(|e| Error::MalformedPacket(format!("cannot encode packet: {e}")))?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
