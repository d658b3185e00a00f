//! Decompress the gateway's zlib-stream transport compression.
//!
//! This module contains [`Inflater`], which decompresses messages sent
//! over the gateway. It reuses buffers so only a few allocations happen
//! in the hot path.
//!
//! # Resizing buffers
//!
//! Buffers are resized after some heuristics:
//!
//! - if the data does not fit the buffer size is doubled; or
//! - at most once per minute the buffer will be resized down to the
//!   size of the most recent received message. This is especially
//!   useful since the largest messages tend to arrive right after
//!   connecting.

use flate2::{Decompress, DecompressError, FlushDecompress};
use std::{error::Error, fmt, mem, time::Instant};

/// The magic suffix marking the end of one concatenated deflate
/// payload.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Initial buffer size of 32 KiB, used for both the internal buffer and
/// the buffer containing messages to be read.
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;

/// Persistent inflate context for one connection's zlib-stream.
///
/// Binary frames are fed in via [`extend`][Self::extend] as they
/// arrive; once the accumulated bytes end with the 4-byte sentinel
/// [`ZLIB_SUFFIX`], [`msg`][Self::msg] inflates them into exactly one
/// payload and resets the accumulation buffer. The inflate state itself
/// is never reset by `msg`; it is only reset by [`reset`][Self::reset],
/// called on reconnect.
#[derive(Debug)]
pub struct Inflater {
    /// Zlib decompressor; carries a dictionary across calls, which is
    /// the reason transport compression saves bandwidth at all.
    decompress: Decompress,
    /// Buffer for storing compressed data, filled via
    /// [`extend`][Self::extend].
    compressed: Vec<u8>,
    /// Scratch buffer for intermediate decompressed output.
    ///
    /// Decompression sometimes needs to be invoked multiple times to
    /// drain one input chunk; this buffer holds the intermediate
    /// values which are then copied into `buffer`.
    internal_buffer: Vec<u8>,
    /// Buffer handed to the caller once it contains a complete message.
    buffer: Vec<u8>,
    /// When the last shrink happened.
    last_resize: Instant,
}

impl Inflater {
    /// Create a new inflater for one connection.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            compressed: Vec::new(),
            decompress: Decompress::new(true),
            internal_buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            last_resize: Instant::now(),
        }
    }

    /// Extend the compressed accumulation buffer with bytes from a
    /// binary frame.
    pub fn extend(&mut self, slice: &[u8]) {
        self.compressed.extend_from_slice(slice);
    }

    /// Decompress the next message if a complete payload has been
    /// accumulated.
    ///
    /// Returns `None` if the accumulated bytes don't yet end with the
    /// sentinel, i.e. the payload is still being received across
    /// multiple frames.
    ///
    /// # Errors
    ///
    /// Returns a [`CompressionError`] if the accumulated bytes are not
    /// valid deflate data.
    #[tracing::instrument(level = "trace")]
    pub fn msg(&mut self) -> Result<Option<&mut [u8]>, CompressionError> {
        let length = self.compressed.len();

        if length < 4 || self.compressed[(length - 4)..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        let before = self.decompress.total_in();
        let mut offset = 0;

        loop {
            self.internal_buffer.clear();

            // `Sync` ensures data is flushed to the internal buffer
            // even without a final block.
            self.decompress
                .decompress_vec(
                    &self.compressed[offset..],
                    &mut self.internal_buffer,
                    FlushDecompress::Sync,
                )
                .map_err(CompressionError::from_inflate)?;

            offset = (self.decompress.total_in() - before)
                .try_into()
                .unwrap_or_default();
            self.buffer.extend_from_slice(&self.internal_buffer[..]);

            let not_at_capacity = self.internal_buffer.len() < self.internal_buffer.capacity();
            if not_at_capacity || offset > self.compressed.len() {
                break;
            }
        }

        tracing::trace!(
            bytes_in = self.compressed.len(),
            bytes_out = self.buffer.len(),
            "payload lengths",
        );

        self.compressed.clear();

        Ok(Some(&mut self.buffer))
    }

    /// Clear the buffers, shrinking them if enough time has passed
    /// since the last shrink.
    pub fn clear(&mut self) {
        self.shrink();

        self.compressed.clear();
        self.internal_buffer.clear();
        self.buffer.clear();
    }

    /// Reset the inflater, discarding the inflate dictionary.
    ///
    /// Called on reconnect: the zlib-stream context is per-connection
    /// and does not survive across a new session.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take the decoded buffer, replacing it with an empty one.
    pub fn take(&mut self) -> Vec<u8> {
        mem::take(&mut self.buffer)
    }

    /// Shrink the compressed and payload buffers if at least 60 seconds
    /// have passed since the last shrink.
    fn shrink(&mut self) {
        if self.last_resize.elapsed().as_secs() < 60 {
            return;
        }

        self.compressed.shrink_to_fit();
        self.buffer.shrink_to_fit();
        self.last_resize = Instant::now();
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport compression state for one connection, toggled at
/// [`GatewayConfig`] construction time.
///
/// Wraps [`Inflater`] so the orchestrator can treat compression as an
/// on/off runtime setting without branching on it at every call site.
///
/// [`GatewayConfig`]: crate::config::GatewayConfig
#[derive(Debug)]
pub enum Compression {
    /// Transport compression is negotiated; frames are inflated before
    /// being handed to the JSON codec.
    Enabled(Inflater),
    /// Transport compression is off; frames are passed through as-is.
    Disabled,
}

impl Compression {
    /// Create a new compression state, enabled or disabled.
    pub fn new(enabled: bool) -> Self {
        if enabled {
            Self::Enabled(Inflater::new())
        } else {
            Self::Disabled
        }
    }

    /// Whether transport compression is enabled.
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Feed a binary frame into the inflater, if enabled.
    pub fn extend(&mut self, slice: &[u8]) {
        if let Self::Enabled(inflater) = self {
            inflater.extend(slice);
        }
    }

    /// Clear per-message state, if enabled.
    pub fn clear(&mut self) {
        if let Self::Enabled(inflater) = self {
            inflater.clear();
        }
    }

    /// Reset the inflate context, discarding its dictionary. Called on
    /// reconnect; a no-op when compression is disabled.
    pub fn reset(&mut self) {
        if let Self::Enabled(inflater) = self {
            inflater.reset();
        }
    }

    /// Decompress the next message if a complete payload has been
    /// accumulated, returning `None` if disabled or incomplete.
    ///
    /// # Errors
    ///
    /// Returns a [`CompressionError`] if the accumulated bytes are not
    /// valid deflate data.
    pub fn message_mut(&mut self) -> Result<Option<&mut [u8]>, CompressionError> {
        match self {
            Self::Enabled(inflater) => inflater.msg(),
            Self::Disabled => Ok(None),
        }
    }

    /// Take the decoded buffer, if enabled, replacing it with an empty
    /// one.
    pub fn take(&mut self) -> Vec<u8> {
        match self {
            Self::Enabled(inflater) => inflater.take(),
            Self::Disabled => Vec::new(),
        }
    }
}

/// Append the `compress=zlib-stream` query parameter to a gateway URL's
/// query string, if transport compression is enabled.
pub fn add_url_feature(url: &mut url::Url, enabled: bool) {
    if enabled {
        url.query_pairs_mut().append_pair("compress", "zlib-stream");
    }
}

/// Decompressing a frame failed.
#[derive(Debug)]
pub struct CompressionError {
    source: DecompressError,
}

impl CompressionError {
    fn from_inflate(source: DecompressError) -> Self {
        Self { source }
    }
}

impl fmt::Display for CompressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a frame could not be decompressed")
    }
}

impl Error for CompressionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::{Compression, Inflater};
    use std::error::Error;

    // A real HELLO payload, deflated with a sync flush.
    const MESSAGE: &[u8] = &[
        120, 156, 52, 201, 65, 10, 131, 48, 16, 5, 208, 187, 252, 117, 82, 98, 169, 32, 115, 21,
        35, 50, 53, 67, 27, 136, 81, 226, 216, 82, 66, 238, 222, 110, 186, 123, 240, 42, 20, 148,
        207, 148, 12, 142, 63, 182, 29, 212, 57, 131, 0, 170, 120, 10, 23, 189, 11, 235, 28, 179,
        74, 121, 113, 2, 221, 186, 107, 255, 251, 89, 11, 47, 2, 26, 49, 122, 60, 88, 229, 205, 31,
        187, 151, 96, 87, 142, 217, 14, 253, 16, 60, 76, 245, 88, 227, 82, 182, 195, 131, 220, 197,
        181, 9, 83, 107, 95, 0, 0, 0, 255, 255,
    ];
    const OUTPUT: &[u8] = &[
        123, 34, 116, 34, 58, 110, 117, 108, 108, 44, 34, 115, 34, 58, 110, 117, 108, 108, 44, 34,
        111, 112, 34, 58, 49, 48, 44, 34, 100, 34, 58, 123, 34, 104, 101, 97, 114, 116, 98, 101,
        97, 116, 95, 105, 110, 116, 101, 114, 118, 97, 108, 34, 58, 52, 49, 50, 53, 48, 44, 34, 95,
        116, 114, 97, 99, 101, 34, 58, 91, 34, 91, 92, 34, 103, 97, 116, 101, 119, 97, 121, 45,
        112, 114, 100, 45, 109, 97, 105, 110, 45, 56, 53, 56, 100, 92, 34, 44, 123, 92, 34, 109,
        105, 99, 114, 111, 115, 92, 34, 58, 48, 46, 48, 125, 93, 34, 93, 125, 125,
    ];

    #[test]
    fn inflater() -> Result<(), Box<dyn Error>> {
        let mut inflater = Inflater::new();
        inflater.extend(&MESSAGE[0..MESSAGE.len() - 2]);
        assert_eq!(None, inflater.msg()?);

        inflater.reset();
        inflater.extend(MESSAGE);

        assert!(!inflater.compressed.is_empty());
        assert!(inflater.internal_buffer.is_empty());
        assert!(inflater.buffer.is_empty());
        assert_eq!(Some(OUTPUT), inflater.msg()?.as_deref());

        // `msg` clears `compressed` and fills `buffer`/`internal_buffer`.
        assert!(inflater.compressed.is_empty());
        assert!(!inflater.buffer.is_empty());
        assert!(!inflater.internal_buffer.is_empty());

        inflater.clear();
        assert!(inflater.compressed.is_empty());
        assert!(inflater.internal_buffer.is_empty());
        assert!(inflater.buffer.is_empty());

        inflater.extend(b"test");
        assert!(!inflater.compressed.is_empty());
        inflater.reset();
        assert!(inflater.compressed.is_empty());

        Ok(())
    }

    #[test]
    fn incomplete_frame_does_not_emit_a_payload() {
        let mut inflater = Inflater::new();
        inflater.extend(&MESSAGE[..MESSAGE.len() - 4]);
        assert!(inflater.msg().unwrap().is_none());
    }

    #[test]
    fn disabled_compression_passes_through_nothing() {
        let mut compression = Compression::new(false);
        assert!(!compression.is_enabled());

        compression.extend(MESSAGE);
        assert_eq!(None, compression.message_mut().unwrap());
        assert!(compression.take().is_empty());
    }

    #[test]
    fn enabled_compression_inflates() -> Result<(), Box<dyn Error>> {
        let mut compression = Compression::new(true);
        assert!(compression.is_enabled());

        compression.extend(MESSAGE);
        assert_eq!(Some(OUTPUT), compression.message_mut()?.as_deref());

        Ok(())
    }
}
