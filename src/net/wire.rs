use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{
    error::{DecodeError, Error},
    PeerId, CLOSE, DONE,
};

/// Longest payload a frame can carry; its length travels as a `u16`.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// source | target | payload length
const HEADER_LEN: usize = 4 + 4 + 2;

/// Largest well-formed frame. Receivers stop reading past this.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + 8;

/// One message as it travels between peers, stamped with the sender's
/// logical clock at the moment it was put on the wire.
///
/// A frame is, in network byte order:
///
/// ```text
/// source: i32 | target: i32 | len: u16 | payload: [u8; len] | timestamp: f64
/// ```
///
/// Exactly one frame is sent per connection, so there is no outer length
/// prefix: the frame ends where the connection does.
#[derive(Clone, Debug)]
pub struct WireMessage {
    pub source: PeerId,
    pub target: PeerId,
    pub payload: String,
    pub timestamp: f64,
}

impl WireMessage {
    pub fn new(
        source: PeerId,
        target: PeerId,
        payload: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            source,
            target,
            payload: payload.into(),
            timestamp,
        }
    }

    pub fn is_done(&self) -> bool {
        self.payload == DONE
    }

    pub fn is_close(&self) -> bool {
        self.payload == CLOSE
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let payload = self.payload.as_bytes();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLong(payload.len()));
        }
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + 8);
        buf.write_i32::<BigEndian>(self.source.0)?;
        buf.write_i32::<BigEndian>(self.target.0)?;
        buf.write_u16::<BigEndian>(payload.len() as u16)?;
        buf.extend_from_slice(payload);
        buf.write_f64::<BigEndian>(self.timestamp)?;
        Ok(buf)
    }

    /// Decodes exactly one frame. Anything left over after the timestamp is
    /// an error rather than the start of another message.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = Cursor::new(bytes);
        let source = cur
            .read_i32::<BigEndian>()
            .map_err(|_| DecodeError::Truncated { field: "source" })?;
        let target = cur
            .read_i32::<BigEndian>()
            .map_err(|_| DecodeError::Truncated { field: "target" })?;
        let len = cur
            .read_u16::<BigEndian>()
            .map_err(|_| DecodeError::Truncated { field: "payload length" })?;
        let mut payload = vec![0u8; len as usize];
        cur.read_exact(&mut payload)
            .map_err(|_| DecodeError::Truncated { field: "payload" })?;
        let payload =
            String::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
        let timestamp = cur
            .read_f64::<BigEndian>()
            .map_err(|_| DecodeError::Truncated { field: "timestamp" })?;

        let consumed = cur.position() as usize;
        if consumed != bytes.len() {
            return Err(DecodeError::TrailingBytes(bytes.len() - consumed));
        }

        Ok(Self {
            source: PeerId(source),
            target: PeerId(target),
            payload,
            timestamp,
        })
    }
}

// Timestamps compare by bit pattern so a decoded message equals the one that
// was encoded, NaN included.
impl PartialEq for WireMessage {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.payload == other.payload
            && self.timestamp.to_bits() == other.timestamp.to_bits()
    }
}

impl Eq for WireMessage {}

#[cfg(test)]
mod tests {
    use super::*;

    fn hi() -> WireMessage {
        WireMessage::new(PeerId(1), PeerId(2), "hi", 1.5)
    }

    #[test]
    fn frame_layout() {
        let bytes = hi().encode().unwrap();
        let mut expected = vec![0, 0, 0, 1, 0, 0, 0, 2, 0, 2, b'h', b'i'];
        expected.extend_from_slice(&1.5f64.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn round_trip() {
        let messages = [
            hi(),
            WireMessage::new(PeerId(-1), PeerId(i32::MAX), "", 0.0),
            WireMessage::new(PeerId(3), PeerId(0), "héllo wörld ✓", -2.25),
            WireMessage::new(PeerId(7), PeerId(8), "x".repeat(MAX_PAYLOAD_LEN), 1e300),
        ];
        for msg in messages {
            let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn nan_timestamp_survives_bit_for_bit() {
        let msg = WireMessage::new(PeerId(1), PeerId(2), "nan", f64::NAN);
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.timestamp.to_bits(), f64::NAN.to_bits());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let msg =
            WireMessage::new(PeerId(1), PeerId(2), "x".repeat(MAX_PAYLOAD_LEN + 1), 0.0);
        assert!(matches!(
            msg.encode(),
            Err(Error::PayloadTooLong(len)) if len == MAX_PAYLOAD_LEN + 1
        ));
    }

    #[test]
    fn truncation_names_the_field() {
        let bytes = hi().encode().unwrap();
        let cases = [
            (0, "source"),
            (3, "source"),
            (6, "target"),
            (9, "payload length"),
            (11, "payload"),
            (bytes.len() - 1, "timestamp"),
        ];
        for (len, field) in cases {
            assert_eq!(
                WireMessage::decode(&bytes[..len]),
                Err(DecodeError::Truncated { field }),
                "cut at {len}"
            );
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = hi().encode().unwrap();
        bytes.extend_from_slice(&[0xde, 0xad]);
        assert_eq!(
            WireMessage::decode(&bytes),
            Err(DecodeError::TrailingBytes(2))
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut bytes = vec![0, 0, 0, 1, 0, 0, 0, 2, 0, 2, 0xff, 0xfe];
        bytes.extend_from_slice(&0f64.to_be_bytes());
        assert_eq!(WireMessage::decode(&bytes), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn control_tokens() {
        let done = WireMessage::new(PeerId(1), PeerId(0), DONE, 0.0);
        let close = WireMessage::new(PeerId(0), PeerId(1), CLOSE, 0.0);
        assert!(done.is_done() && !done.is_close());
        assert!(close.is_close() && !close.is_done());
        assert!(!hi().is_done() && !hi().is_close());
    }
}
