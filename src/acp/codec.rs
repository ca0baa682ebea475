//! NDJSON codec for agent peer streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving peer cannot force unbounded allocation through a single
//! unterminated or oversized message. Used via
//! [`tokio_util::codec::FramedRead`] on the inbound side; outbound writes
//! serialize JSON values directly (see [`crate::acp::connection`]).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted on an agent stream: 4 MiB.
///
/// Tool-call payloads routinely embed file contents, so the bound is
/// generous; lines beyond it fail with [`AppError::Acp`] instead of
/// allocating.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Line codec for bidirectional agent streams.
///
/// Each newline-terminated UTF-8 string is one complete JSON-RPC message.
/// Inbound lines longer than [`MAX_LINE_BYTES`] return
/// [`AppError::Acp`]`("line too long: …")`; I/O errors map to
/// [`AppError::Io`]. The length limit is a decoder-side concern only.
#[derive(Debug)]
pub struct JsonLineCodec(LinesCodec);

impl JsonLineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for JsonLineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Acp(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
