//! Request line and header block parsing.
//!
//! Shared by the HTTP decoder and the WebSocket handshake.

use bytes::{Buf, BytesMut};

use super::{
    body::urlencoded,
    request::{HttpRequest, Version},
};
use crate::{
    codec::LineScanner,
    config::{Charset, DecoderConfig},
    error::ParseError,
};

/// Position within the request head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HeadPhase {
    RequestLine,
    Headers,
}

/// Resumable parser for `request-line CRLF *(header CRLF) CRLF`.
#[derive(Debug)]
pub(crate) struct HeadDecoder {
    phase: HeadPhase,
    scanner: LineScanner,
    request: Option<HttpRequest>,
}

impl HeadDecoder {
    pub(crate) fn new(max_line_length: usize) -> Self {
        Self {
            phase: HeadPhase::RequestLine,
            scanner: LineScanner::new(max_line_length),
            request: None,
        }
    }

    pub(crate) fn phase(&self) -> HeadPhase { self.phase }

    pub(crate) fn reset(&mut self) {
        self.phase = HeadPhase::RequestLine;
        self.scanner.reset();
        self.request = None;
    }

    /// Consume complete lines from `buf`.
    ///
    /// Returns the request once the blank line ending the header block has
    /// been consumed; bytes after it stay in `buf`.
    pub(crate) fn decode(
        &mut self,
        buf: &mut BytesMut,
        config: &DecoderConfig,
    ) -> Result<Option<HttpRequest>, ParseError> {
        loop {
            let line = match self.scanner.next_line(&buf[..]) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) => {
                    return Err(match self.phase {
                        HeadPhase::RequestLine => ParseError::RequestLineTooLong { limit: e.limit },
                        HeadPhase::Headers => ParseError::HeaderLineTooLong { limit: e.limit },
                    });
                }
            };
            let content = line.content(&buf[..]);
            match self.phase {
                // Robust servers ignore empty lines before the request line.
                HeadPhase::RequestLine if line.is_empty() => {}
                HeadPhase::RequestLine => {
                    let request = parse_request_line(content, config.get_charset())?;
                    self.request = Some(request);
                    self.phase = HeadPhase::Headers;
                }
                HeadPhase::Headers if line.is_empty() => {
                    buf.advance(line.consumed());
                    self.phase = HeadPhase::RequestLine;
                    return Ok(self.request.take());
                }
                HeadPhase::Headers => {
                    let Some(request) = self.request.as_mut() else {
                        return Err(ParseError::MalformedHeader);
                    };
                    parse_header_line(content, request, config)?;
                }
            }
            buf.advance(line.consumed());
        }
    }
}

fn is_token(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes.iter().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(b)
        })
}

fn parse_request_line(line: &[u8], charset: Charset) -> Result<HttpRequest, ParseError> {
    let mut parts = line.split(|b| *b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::MalformedRequestLine);
    };
    if !is_token(method) || target.is_empty() {
        return Err(ParseError::MalformedRequestLine);
    }
    let version = match version {
        b"HTTP/1.1" => Version::Http11,
        b"HTTP/1.0" => Version::Http10,
        other if other.starts_with(b"HTTP/") => {
            return Err(ParseError::UnsupportedVersion(
                String::from_utf8_lossy(other).into_owned(),
            ));
        }
        _ => return Err(ParseError::MalformedRequestLine),
    };
    let method = String::from_utf8_lossy(method).into_owned();
    let mut request = HttpRequest::new(method, charset.decode(target), version);
    if let Some(query) = request.query.clone() {
        urlencoded::parse_into(query.as_bytes(), charset, &mut request.params);
    }
    Ok(request)
}

fn parse_header_line(
    line: &[u8],
    request: &mut HttpRequest,
    config: &DecoderConfig,
) -> Result<(), ParseError> {
    let charset = config.get_charset();
    if matches!(line.first(), Some(b' ' | b'\t')) {
        let more = charset.decode(line.trim_ascii());
        return if request.headers.continue_last(&more) {
            Ok(())
        } else {
            Err(ParseError::MalformedHeader)
        };
    }
    let colon = memchr::memchr(b':', line).ok_or(ParseError::MalformedHeader)?;
    let (name, value) = (&line[..colon], &line[colon + 1..]);
    if !is_token(name) {
        return Err(ParseError::MalformedHeader);
    }
    let limit = config.get_max_headers();
    if request.headers.len() >= limit {
        return Err(ParseError::TooManyHeaders { limit });
    }
    request.headers.append(
        String::from_utf8_lossy(name).into_owned(),
        charset.decode(value.trim_ascii()),
    );
    Ok(())
}
