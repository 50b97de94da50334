//! Streaming decoders for `Content-Length` delimited request bodies.

mod json;
pub(crate) mod multipart;
mod raw;
pub(crate) mod urlencoded;

pub use json::JsonDecoder;
pub use multipart::MultipartDecoder;
pub use raw::RawDecoder;
pub use urlencoded::UrlEncodedDecoder;

use super::HttpRequest;
use crate::{config::DecoderConfig, error::ParseError};

/// Incremental body decoder driven by the HTTP decoder.
///
/// The HTTP decoder never passes bytes beyond the declared body length.
/// `last` is `true` when `input` holds every remaining body byte; bytes left
/// unconsumed otherwise are presented again, followed by new data, on the
/// next call.
pub trait BodyDecoder: Send {
    /// Consume a prefix of `input`, returning how many bytes were used.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when the body is malformed or cannot be
    /// stored.
    fn decode(
        &mut self,
        input: &[u8],
        last: bool,
        request: &mut HttpRequest,
    ) -> Result<usize, ParseError>;

    /// Called once after every body byte has been consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when the body is incomplete or invalid.
    fn finish(&mut self, request: &mut HttpRequest) -> Result<(), ParseError>;
}

/// Media type without parameters, lowercased.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Value of parameter `name` in a header such as `Content-Type`, unquoted.
pub(crate) fn header_param<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').skip(1).find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim().eq_ignore_ascii_case(name).then(|| {
            let value = value.trim();
            value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value)
        })
    })
}

/// Choose the body decoder for `request` from its `Content-Type`.
///
/// # Errors
///
/// Returns [`ParseError::MissingBoundary`] for multipart bodies without a
/// usable boundary parameter.
pub fn decoder_for(
    request: &HttpRequest,
    config: &DecoderConfig,
) -> Result<Box<dyn BodyDecoder>, ParseError> {
    let content_type = request.headers().get("content-type").unwrap_or_default();
    let media = media_type(content_type);
    Ok(match media.as_str() {
        "application/x-www-form-urlencoded" => Box::new(UrlEncodedDecoder::new(config)),
        "multipart/form-data" => {
            let boundary = header_param(content_type, "boundary")
                .filter(|b| (1..=70).contains(&b.len()))
                .ok_or(ParseError::MissingBoundary)?;
            Box::new(MultipartDecoder::new(boundary, config))
        }
        m if m == "application/json" || m.ends_with("+json") => Box::new(JsonDecoder::default()),
        _ => Box::new(RawDecoder::new(config)),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("multipart/form-data; boundary=abc", Some("abc"))]
    #[case("multipart/form-data; charset=utf-8; BOUNDARY=\"a b\"", Some("a b"))]
    #[case("multipart/form-data", None)]
    fn boundary_parameter_is_extracted(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(header_param(header, "boundary"), expected);
    }

    #[test]
    fn multipart_without_boundary_is_rejected() {
        let mut req = HttpRequest::new("POST", "/", crate::http::Version::Http11);
        req.headers_mut().append("Content-Type", "multipart/form-data");
        assert!(matches!(
            decoder_for(&req, &DecoderConfig::default()),
            Err(ParseError::MissingBoundary)
        ));
    }
}
