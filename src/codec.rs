//! Length-prefixed framing for request bodies.
//!
//! A frame is a 4-byte big-endian payload length followed by the payload.
//! [`FrameDecoder`] accumulates bytes as they arrive and hands each complete
//! payload to a [`PayloadDecoder`]; a partial frame stays buffered, prefix
//! included, until the rest of it is read.
//!
//! ```
//! use directory_core::{encode_frame, FrameDecoder, RawPayload};
//!
//! let frame = encode_frame(b"hello").unwrap();
//! let mut decoder = FrameDecoder::new(RawPayload);
//!
//! decoder.extend(&frame[..6]);
//! assert!(decoder.decode().unwrap().is_none());
//!
//! decoder.extend(&frame[6..]);
//! assert_eq!(&decoder.decode().unwrap().unwrap()[..], b"hello");
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Largest payload accepted unless configured otherwise (1 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1 << 20;

/// Turns one complete payload into a message.
pub trait PayloadDecoder {
    /// The decoded message.
    type Message;

    /// Decodes exactly one payload.
    ///
    /// # Errors
    ///
    /// Any error describing why the payload is not a valid message.
    fn decode_payload(&mut self, payload: Bytes) -> Result<Self::Message>;
}

/// Hands the payload through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPayload;

impl PayloadDecoder for RawPayload {
    type Message = Bytes;

    fn decode_payload(&mut self, payload: Bytes) -> Result<Bytes> {
        Ok(payload)
    }
}

/// Cumulative decoder for length-prefixed frames.
#[derive(Debug)]
pub struct FrameDecoder<D> {
    buffer: BytesMut,
    payload: D,
    max_frame_length: usize,
}

impl<D: PayloadDecoder> FrameDecoder<D> {
    /// Decoder accepting payloads up to [`DEFAULT_MAX_FRAME_LENGTH`].
    pub fn new(payload: D) -> Self {
        Self::with_max_frame_length(payload, DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Decoder accepting payloads up to `max_frame_length` bytes.
    pub fn with_max_frame_length(payload: D, max_frame_length: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            payload,
            max_frame_length,
        }
    }

    /// Appends bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes at most one message. Returns `Ok(None)` while the next frame
    /// is incomplete, leaving the buffer as it was.
    ///
    /// # Errors
    ///
    /// `Error::Frame` if the announced length exceeds the maximum, or any
    /// error from the payload decoder. The offending frame is consumed in
    /// the latter case. An oversized length is left in place, so every later
    /// call fails the same way: the stream has lost its frame boundary and
    /// the connection must be dropped.
    pub fn decode(&mut self) -> Result<Option<D::Message>> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = &self.buffer[..LENGTH_PREFIX];
        let length = prefix.get_u32() as usize;
        if length > self.max_frame_length {
            tracing::warn!(length, max = self.max_frame_length, "frame too large");
            return Err(Error::frame(format!(
                "frame of {} bytes exceeds the {} byte limit",
                length, self.max_frame_length
            )));
        }
        if self.buffer.len() < LENGTH_PREFIX + length {
            tracing::trace!(buffered = self.buffer.len(), needed = LENGTH_PREFIX + length, "partial frame");
            return Ok(None);
        }
        self.buffer.advance(LENGTH_PREFIX);
        let payload = self.buffer.split_to(length).freeze();
        self.payload.decode_payload(payload).map(Some)
    }

    /// The payload decoder.
    pub fn payload_decoder(&self) -> &D {
        &self.payload
    }
}

/// Prefixes `payload` with its length.
///
/// # Errors
///
/// `Error::Frame` if the payload does not fit a 4-byte length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::frame(format!("payload of {} bytes is too large", payload.len())))?;
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    out.put_u32(length);
    out.put_slice(payload);
    Ok(out.freeze())
}
