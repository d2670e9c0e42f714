//! Terminator-delimited frames.
//!
//! A `Frame` is one complete logical message: the raw JSON body without its
//! trailing `\r\n`. [`FrameCodec`] reassembles frames from arbitrary chunks of
//! a byte stream and serializes them back.
//!
//! Decoding is pure byte scanning. It never blocks and never parses JSON; the
//! body is handed to [`crate::Request::decode`] afterwards.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    MAX_FRAME_SIZE, TERMINATOR,
    errors::{ProtocolError, Result},
};

/// One complete frame body (terminator stripped).
///
/// # Invariants
///
/// - The body never contains the terminator sequence. [`FrameCodec`] splits
///   on the first occurrence, and JSON serialization escapes `\r` and `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Wrap an already-serialized body.
    #[must_use]
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Raw JSON body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body length in bytes (terminator excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Write `body + \r\n` into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.body);
        dst.put_slice(TERMINATOR);
    }

    /// Wire bytes for this frame (`body + \r\n`).
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.body.len() + TERMINATOR.len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Incremental frame decoder/encoder.
///
/// Remembers how far the current accumulator has already been scanned so a
/// slow peer dribbling bytes does not cause quadratic rescanning. The scan
/// resumes one byte early so a terminator split across two reads (`...}\r`
/// then `\n`) is still found exactly once.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Bytes of the accumulator already searched without finding a terminator
    scanned: usize,
    /// Maximum body size before the stream is declared broken
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec with the protocol's default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Codec with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { scanned: 0, max_frame_size }
    }

    /// Largest frame body this codec accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Append `new_bytes` to `buffer` and try to cut one frame out of it.
    ///
    /// Returns `Ok(None)` if no terminator has arrived yet. Any bytes after the
    /// first terminator stay in `buffer` for the next call.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the buffer outgrows the limit
    ///   without a terminator
    pub fn feed(&mut self, buffer: &mut BytesMut, new_bytes: &[u8]) -> Result<Option<Frame>> {
        buffer.extend_from_slice(new_bytes);
        self.next_frame(buffer)
    }

    /// Cut the next frame out of `buffer` without appending anything.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the buffer outgrows the limit
    ///   without a terminator
    pub fn next_frame(&mut self, buffer: &mut BytesMut) -> Result<Option<Frame>> {
        let start = self.scanned.saturating_sub(TERMINATOR.len() - 1).min(buffer.len());

        let found = buffer[start..].windows(TERMINATOR.len()).position(|w| w == TERMINATOR);

        let Some(offset) = found else {
            self.scanned = buffer.len();
            if buffer.len() > self.max_frame_size + TERMINATOR.len() {
                return Err(ProtocolError::FrameTooLarge {
                    size: buffer.len(),
                    max: self.max_frame_size,
                });
            }
            return Ok(None);
        };

        let end = start + offset;
        self.scanned = 0;

        if end > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge { size: end, max: self.max_frame_size });
        }

        let body = buffer.split_to(end).freeze();
        buffer.advance(TERMINATOR.len());

        debug_assert!(!body.windows(TERMINATOR.len()).any(|w| w == TERMINATOR));

        Ok(Some(Frame { body }))
    }

    /// Forget scan progress. Call after the accumulator is discarded.
    pub fn reset(&mut self) {
        self.scanned = 0;
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        self.next_frame(src)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(item.len() + TERMINATOR.len());
        item.encode(dst);
        Ok(())
    }
}
