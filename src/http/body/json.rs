//! `application/json` bodies.

use super::BodyDecoder;
use crate::{error::ParseError, http::HttpRequest};

/// Buffers the body and parses it into a [`serde_json::Value`] once complete.
#[derive(Debug, Default)]
pub struct JsonDecoder {
    buf: Vec<u8>,
}

impl BodyDecoder for JsonDecoder {
    fn decode(
        &mut self,
        input: &[u8],
        _last: bool,
        _request: &mut HttpRequest,
    ) -> Result<usize, ParseError> {
        self.buf.extend_from_slice(input);
        Ok(input.len())
    }

    fn finish(&mut self, request: &mut HttpRequest) -> Result<(), ParseError> {
        let value = serde_json::from_slice(&self.buf)
            .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        self.buf.clear();
        request.json = Some(value);
        Ok(())
    }
}
