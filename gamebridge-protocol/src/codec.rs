//! Codec for encoding and decoding protocol envelopes
//!
//! Length-delimited framing:
//! - 4-byte length prefix (u32 big-endian)
//! - 1-byte payload kind
//! - bincode-encoded envelope head
//! - bincode-encoded payload body
//!
//! Length covers kind + head + body (not the length field itself).
//!
//! Decode failures never surface as stream errors: a frame that is oversized
//! or undecodable is consumed in full (oversized frames are skipped as their
//! bytes arrive) and yielded as [`Inbound::Malformed`], keeping the byte
//! stream aligned so the session can answer with an error frame instead of
//! closing. The kind byte is the forward-compatibility hook: an unrecognized
//! kind still decodes the head and yields [`Inbound::Unsupported`].

use crate::constants::MAX_FRAME_SIZE;
use crate::envelope::{Envelope, EnvelopeHead, Payload};
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Frame header size: 4 bytes length + 1 byte kind
const HEADER_SIZE: usize = 5;

const KIND_HELLO: u8 = 0x01;
const KIND_HELLO_ACK: u8 = 0x02;
const KIND_TELEMETRY: u8 = 0x03;
const KIND_ACTION_REQUEST: u8 = 0x04;
const KIND_ACTION_ACK: u8 = 0x05;
const KIND_ACTION_RESULT: u8 = 0x06;
const KIND_TIMESYNC_REQUEST: u8 = 0x07;
const KIND_TIMESYNC_RESPONSE: u8 = 0x08;
const KIND_ERROR: u8 = 0x09;

/// Decoded inbound item.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),

    /// The payload kind is newer than this build understands. The head is
    /// still decoded so the session layer can reply in-envelope.
    Unsupported { head: EnvelopeHead, kind: u8 },

    /// The frame was consumed but could not be decoded. The byte stream
    /// remains aligned on the next frame boundary.
    Malformed { reason: String },
}

/// Envelope codec using length-delimited framing.
///
/// Wire format:
/// ```text
/// ┌─────────────┬───────────┬──────────────┬──────────────┐
/// │ Length (u32)│ Kind (u8) │ Head         │ Body         │
/// │ 4 bytes BE  │ 1 byte    │ bincode      │ bincode      │
/// └─────────────┴───────────┴──────────────┴──────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
    /// Bytes of an oversized frame still to be discarded
    skip: usize,
    skip_declared: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE as usize)
    }
}

impl EnvelopeCodec {
    /// Create a new codec instance with the default max frame size
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new codec instance with a custom max frame size
    #[inline]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            skip: 0,
            skip_declared: 0,
        }
    }

    /// Get the configured max frame size
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

fn payload_kind(payload: &Payload) -> u8 {
    match payload {
        Payload::Hello(_) => KIND_HELLO,
        Payload::HelloAck(_) => KIND_HELLO_ACK,
        Payload::Telemetry(_) => KIND_TELEMETRY,
        Payload::ActionRequest(_) => KIND_ACTION_REQUEST,
        Payload::ActionAck(_) => KIND_ACTION_ACK,
        Payload::ActionResult(_) => KIND_ACTION_RESULT,
        Payload::TimeSyncRequest(_) => KIND_TIMESYNC_REQUEST,
        Payload::TimeSyncResponse(_) => KIND_TIMESYNC_RESPONSE,
        Payload::Error(_) => KIND_ERROR,
    }
}

fn encode_err(e: bincode_next::error::EncodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
}

fn encode_body(payload: &Payload) -> io::Result<Vec<u8>> {
    let config = bincode_next::config::standard();
    let bytes = match payload {
        Payload::Hello(v) => bincode_next::serde::encode_to_vec(v.as_ref(), config),
        Payload::HelloAck(v) => bincode_next::serde::encode_to_vec(v.as_ref(), config),
        Payload::Telemetry(v) => bincode_next::serde::encode_to_vec(v.as_ref(), config),
        Payload::ActionRequest(v) => bincode_next::serde::encode_to_vec(v.as_ref(), config),
        Payload::ActionAck(v) => bincode_next::serde::encode_to_vec(v, config),
        Payload::ActionResult(v) => bincode_next::serde::encode_to_vec(v, config),
        Payload::TimeSyncRequest(v) => bincode_next::serde::encode_to_vec(v, config),
        Payload::TimeSyncResponse(v) => bincode_next::serde::encode_to_vec(v.as_ref(), config),
        Payload::Error(v) => bincode_next::serde::encode_to_vec(v, config),
    };
    bytes.map_err(encode_err)
}

/// Decode a payload body. `Ok(None)` means the kind is unknown;
/// `Err(reason)` means the body is malformed.
fn decode_body(kind: u8, bytes: &[u8]) -> Result<Option<Payload>, String> {
    let config = bincode_next::config::standard().with_limit::<{ MAX_FRAME_SIZE as usize }>();

    macro_rules! body {
        ($variant:ident, boxed) => {{
            let (v, used) = bincode_next::serde::decode_from_slice(bytes, config)
                .map_err(|e| format!("body decode: {e}"))?;
            (Payload::$variant(Box::new(v)), used)
        }};
        ($variant:ident) => {{
            let (v, used) = bincode_next::serde::decode_from_slice(bytes, config)
                .map_err(|e| format!("body decode: {e}"))?;
            (Payload::$variant(v), used)
        }};
    }

    let (payload, used) = match kind {
        KIND_HELLO => body!(Hello, boxed),
        KIND_HELLO_ACK => body!(HelloAck, boxed),
        KIND_TELEMETRY => body!(Telemetry, boxed),
        KIND_ACTION_REQUEST => body!(ActionRequest, boxed),
        KIND_ACTION_ACK => body!(ActionAck),
        KIND_ACTION_RESULT => body!(ActionResult),
        KIND_TIMESYNC_REQUEST => body!(TimeSyncRequest),
        KIND_TIMESYNC_RESPONSE => body!(TimeSyncResponse, boxed),
        KIND_ERROR => body!(Error),
        _ => return Ok(None),
    };

    if used != bytes.len() {
        return Err(format!(
            "trailing bytes after payload: {}",
            bytes.len() - used
        ));
    }
    Ok(Some(payload))
}

impl Decoder for EnvelopeCodec {
    type Item = Inbound;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Drain an oversized frame before looking at anything else.
        if self.skip > 0 {
            let n = self.skip.min(src.len());
            src.advance(n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(None);
            }
            let declared = self.skip_declared;
            self.skip_declared = 0;
            return Ok(Some(Inbound::Malformed {
                reason: format!(
                    "frame too large: {} bytes (max: {})",
                    declared, self.max_frame_size
                ),
            }));
        }

        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        // Peek at length (don't consume yet)
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length == 0 {
            src.advance(4);
            return Ok(Some(Inbound::Malformed {
                reason: "zero-length frame".to_string(),
            }));
        }
        if length > self.max_frame_size {
            // Discard the whole frame as its bytes arrive.
            self.skip = 4 + length;
            self.skip_declared = length;
            return self.decode(src);
        }

        // Total frame size = 4 (length field) + length (kind + head + body)
        let total_size = 4 + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        let mut frame_bytes = src.split_to(total_size).freeze();
        frame_bytes.advance(4);
        let kind = frame_bytes.get_u8();

        let config = bincode_next::config::standard().with_limit::<{ MAX_FRAME_SIZE as usize }>();
        let (head, head_len): (EnvelopeHead, usize) =
            match bincode_next::serde::decode_from_slice(frame_bytes.as_ref(), config) {
                Ok(v) => v,
                Err(e) => {
                    return Ok(Some(Inbound::Malformed {
                        reason: format!("head decode: {e}"),
                    }))
                }
            };

        match decode_body(kind, &frame_bytes.as_ref()[head_len..]) {
            Ok(Some(payload)) => Ok(Some(Inbound::Envelope(Envelope { head, payload }))),
            Ok(None) => Ok(Some(Inbound::Unsupported { head, kind })),
            Err(reason) => Ok(Some(Inbound::Malformed { reason })),
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = io::Error;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let config = bincode_next::config::standard();
        let head =
            bincode_next::serde::encode_to_vec(&envelope.head, config).map_err(encode_err)?;
        let body = encode_body(&envelope.payload)?;

        let payload_len = 1 + head.len() + body.len();
        if payload_len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame too large: {} bytes (max: {})",
                    payload_len, self.max_frame_size
                ),
            ));
        }

        dst.reserve(4 + payload_len);
        dst.put_u32(payload_len as u32);
        dst.put_u8(payload_kind(&envelope.payload));
        dst.extend_from_slice(&head);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
