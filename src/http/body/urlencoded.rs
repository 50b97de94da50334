//! `application/x-www-form-urlencoded` bodies and query strings.

use std::borrow::Cow;

use memchr::memchr;

use super::BodyDecoder;
use crate::{
    config::{Charset, DecoderConfig},
    error::ParseError,
    http::{HttpRequest, Params},
};

/// Decode one `+`/percent-encoded component.
fn decode_component(raw: &[u8], charset: Charset) -> String {
    let spaced: Cow<'_, [u8]> = if raw.contains(&b'+') {
        Cow::Owned(raw.iter().map(|b| if *b == b'+' { b' ' } else { *b }).collect())
    } else {
        Cow::Borrowed(raw)
    };
    charset.decode(&urlencoding::decode_binary(&spaced))
}

/// Decode one `name=value` segment. A segment without `=` has an empty value.
fn decode_pair(segment: &[u8], charset: Charset) -> (String, String) {
    match memchr(b'=', segment) {
        Some(eq) => (
            decode_component(&segment[..eq], charset),
            decode_component(&segment[eq + 1..], charset),
        ),
        None => (decode_component(segment, charset), String::new()),
    }
}

/// Decode a complete `a=1&b=2` string into `params`, skipping empty segments.
pub(crate) fn parse_into(input: &[u8], charset: Charset, params: &mut Params) {
    for segment in input.split(|b| *b == b'&').filter(|s| !s.is_empty()) {
        let (name, value) = decode_pair(segment, charset);
        params.append(name, value);
    }
}

/// Streaming decoder for url-encoded form bodies.
///
/// Each `&`-terminated pair is decoded as soon as it is complete; a trailing
/// partial pair is left unconsumed until more input or the end of the body.
#[derive(Debug)]
pub struct UrlEncodedDecoder {
    charset: Charset,
    max_fields: usize,
    fields: usize,
}

impl UrlEncodedDecoder {
    /// Create a decoder using the charset and field ceiling from `config`.
    #[must_use]
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            charset: config.get_charset(),
            max_fields: config.get_max_form_fields(),
            fields: 0,
        }
    }

    fn add(&mut self, segment: &[u8], request: &mut HttpRequest) -> Result<(), ParseError> {
        if segment.is_empty() {
            return Ok(());
        }
        self.fields += 1;
        if self.fields > self.max_fields {
            return Err(ParseError::TooManyFields {
                limit: self.max_fields,
            });
        }
        let (name, value) = decode_pair(segment, self.charset);
        request.params.append(name, value);
        Ok(())
    }
}

impl BodyDecoder for UrlEncodedDecoder {
    fn decode(
        &mut self,
        input: &[u8],
        last: bool,
        request: &mut HttpRequest,
    ) -> Result<usize, ParseError> {
        let mut pos = 0;
        while let Some(amp) = memchr(b'&', &input[pos..]) {
            self.add(&input[pos..pos + amp], request)?;
            pos += amp + 1;
        }
        if last {
            self.add(&input[pos..], request)?;
            pos = input.len();
        }
        Ok(pos)
    }

    fn finish(&mut self, _request: &mut HttpRequest) -> Result<(), ParseError> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Version;

    fn request() -> HttpRequest { HttpRequest::new("POST", "/form", Version::Http11) }

    #[test]
    fn partial_pair_waits_for_more_input() {
        let mut decoder = UrlEncodedDecoder::new(&DecoderConfig::default());
        let mut req = request();
        let consumed = decoder.decode(b"a=1&b=tw", false, &mut req).expect("valid");
        assert_eq!(consumed, 4);
        assert_eq!(req.params().get("a"), Some("1"));
        assert!(req.params().get("b").is_none());

        let consumed = decoder.decode(b"b=two+words%21", true, &mut req).expect("valid");
        assert_eq!(consumed, 14);
        assert_eq!(req.params().get("b"), Some("two words!"));
    }

    #[test]
    fn latin1_charset_decodes_high_bytes() {
        let mut params = Params::default();
        parse_into(b"name=Jos%E9&flag", Charset::Latin1, &mut params);
        assert_eq!(params.get("name"), Some("José"));
        assert_eq!(params.get("flag"), Some(""));
    }

    #[test]
    fn field_count_is_bounded() {
        let config = DecoderConfig::default().max_form_fields(2);
        let mut decoder = UrlEncodedDecoder::new(&config);
        let err = decoder
            .decode(b"a=1&b=2&c=3", true, &mut request())
            .expect_err("too many fields");
        assert!(matches!(err, ParseError::TooManyFields { limit: 2 }));
    }
}
