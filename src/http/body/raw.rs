//! Bodies of any other content type, stored as-is.

use super::BodyDecoder;
use crate::{codec::SpillBuffer, config::DecoderConfig, error::ParseError, http::HttpRequest};

/// Stores the body in a [`SpillBuffer`] and attaches it to the request.
#[derive(Debug)]
pub struct RawDecoder {
    buf: SpillBuffer,
}

impl RawDecoder {
    /// Create a decoder spilling past the threshold from `config`.
    #[must_use]
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            buf: SpillBuffer::new(config.get_spill_threshold(), config.get_spill_dir().clone()),
        }
    }
}

impl BodyDecoder for RawDecoder {
    fn decode(
        &mut self,
        input: &[u8],
        _last: bool,
        _request: &mut HttpRequest,
    ) -> Result<usize, ParseError> {
        self.buf.write(input).map_err(ParseError::Spill)?;
        Ok(input.len())
    }

    fn finish(&mut self, request: &mut HttpRequest) -> Result<(), ParseError> {
        request.body = self.buf.take_body().map_err(ParseError::Spill)?;
        Ok(())
    }
}
