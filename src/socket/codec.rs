//! Delimiter-framed codec for bridge socket streams.
//!
//! Splits an inbound byte stream on a configurable delimiter (default `\n`)
//! and enforces a receive-buffer capacity (default 64 KiB). When the buffer
//! outgrows the capacity before a delimiter arrives, the buffered bytes are
//! discarded and [`AppError::Frame`] is returned; the peer is not told.
//!
//! Unlike [`tokio_util::codec::LinesCodec`], the codec stays usable after an
//! overflow so the connection keeps reading subsequent frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::models::envelope::Envelope;
use crate::{AppError, Result};

/// Default per-connection receive-buffer capacity: 64 KiB.
pub const DEFAULT_FRAME_CAPACITY: usize = 64 * 1024;

/// Default frame delimiter.
pub const DEFAULT_DELIMITER: &[u8] = b"\n";

/// Framing parameters shared by both directions of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOptions {
    /// Frame delimiter; never empty.
    pub delimiter: Bytes,
    /// Receive-buffer capacity in bytes.
    pub capacity: usize,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            delimiter: Bytes::from_static(DEFAULT_DELIMITER),
            capacity: DEFAULT_FRAME_CAPACITY,
        }
    }
}

impl FrameOptions {
    /// Build options from a delimiter string and capacity.
    #[must_use]
    pub fn new(delimiter: &str, capacity: usize) -> Self {
        let delimiter = if delimiter.is_empty() {
            Bytes::from_static(DEFAULT_DELIMITER)
        } else {
            Bytes::copy_from_slice(delimiter.as_bytes())
        };
        Self {
            delimiter,
            capacity,
        }
    }
}

/// Delimiter-framed codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    options: FrameOptions,
    /// Offset up to which the buffer is known to contain no delimiter.
    scanned: usize,
}

impl FrameCodec {
    /// Create a codec with the given options.
    #[must_use]
    pub fn new(mut options: FrameOptions) -> Self {
        if options.delimiter.is_empty() {
            options.delimiter = Bytes::from_static(DEFAULT_DELIMITER);
        }
        Self {
            options,
            scanned: 0,
        }
    }

    /// Framing options in use.
    #[must_use]
    pub fn options(&self) -> &FrameOptions {
        &self.options
    }

    /// Append the delimiter to `payload` unless it already ends with it.
    pub fn frame_into(&self, payload: &[u8], dst: &mut BytesMut) {
        dst.reserve(payload.len() + self.options.delimiter.len());
        dst.put_slice(payload);
        if !payload.ends_with(&self.options.delimiter) {
            dst.put_slice(&self.options.delimiter);
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(FrameOptions::default())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = AppError;

    /// Yield the next complete frame, without its delimiter.
    ///
    /// Returns `Ok(None)` while only a partial frame is buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let delimiter_len = self.options.delimiter.len();
        let start = self.scanned.min(src.len());

        if let Some(offset) = find_subslice(&src[start..], &self.options.delimiter) {
            let frame = src.split_to(start + offset);
            src.advance(delimiter_len);
            self.scanned = 0;
            return Ok(Some(frame.freeze()));
        }

        if src.len() > self.options.capacity {
            let dropped = src.len();
            src.clear();
            self.scanned = 0;
            return Err(AppError::Frame(format!(
                "receive buffer overflow: {dropped} bytes exceeded capacity of {} without a delimiter",
                self.options.capacity
            )));
        }

        // A delimiter may straddle the end of the buffer, so rescan its tail.
        self.scanned = src.len().saturating_sub(delimiter_len - 1);
        Ok(None)
    }

    /// At end of stream a trailing partial frame is dropped.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "discarding unterminated frame at end of stream");
            src.clear();
            self.scanned = 0;
        }
        Ok(None)
    }
}

impl Encoder<&Envelope> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<()> {
        self.frame_into(&item.to_bytes(), dst);
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.frame_into(&item, dst);
        Ok(())
    }
}
