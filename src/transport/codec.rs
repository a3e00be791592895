//! NDJSON line framing for agent process streams.
//!
//! A thin wrapper over [`tokio_util::codec::LinesCodec`] that caps the
//! accepted line length so a runaway or unterminated line from the child
//! process cannot exhaust memory. Used with
//! [`FramedRead`](tokio_util::codec::FramedRead) on the child's stdout.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{ConduitError, Result};

/// Maximum accepted line length: 1 MiB.
///
/// An over-long inbound line produces a [`ConduitError::Parse`] from the
/// decoder instead of an unbounded allocation; the stream continues at the
/// next newline.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 codec with the [`MAX_LINE_BYTES`] cap.
#[derive(Debug)]
pub struct NdjsonCodec(LinesCodec);

impl NdjsonCodec {
    /// Create a codec with the default length cap.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = ConduitError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = ConduitError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // The length cap is a decoder-side protection only.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(err: LinesCodecError) -> ConduitError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            ConduitError::Parse(format!("line exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => ConduitError::Io(io_err.to_string()),
    }
}
