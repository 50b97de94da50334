//! `multipart/form-data` bodies with file uploads spilled to disk.
//!
//! The decoder scans for `CRLF--boundary` delimiters. When a chunk ends
//! without a complete delimiter, the last `delimiter.len()` bytes are left
//! unconsumed so a delimiter split across reads is still recognised once the
//! rest arrives.

use std::{borrow::Cow, path::PathBuf};

use bytes::BytesMut;
use memchr::memmem;

use super::{BodyDecoder, header_param};
use crate::{
    codec::{LineScanner, SpillBuffer},
    config::{Charset, DecoderConfig},
    error::ParseError,
    http::{HttpRequest, UploadedFile},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    Preamble,
    AfterDelimiter,
    PartHeaders,
    PartBody,
    Epilogue,
}

#[derive(Debug)]
enum PartData {
    Field(BytesMut),
    File(SpillBuffer),
}

#[derive(Debug, Default)]
struct PartHead {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

#[derive(Debug)]
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: PartData,
}

fn malformed(reason: &'static str) -> ParseError {
    ParseError::MalformedMultipart(Cow::Borrowed(reason))
}

/// Streaming decoder for `multipart/form-data` bodies.
///
/// Text fields are added to the request parameters; parts carrying a
/// `filename` become [`UploadedFile`]s whose payload spills to disk past the
/// configured threshold.
#[derive(Debug)]
pub struct MultipartDecoder {
    state: State,
    dash_boundary: Vec<u8>,
    delimiter: Vec<u8>,
    scanner: LineScanner,
    head: PartHead,
    part: Option<Part>,
    charset: Charset,
    spill_threshold: usize,
    spill_dir: PathBuf,
    max_fields: usize,
    fields: usize,
}

impl MultipartDecoder {
    /// Create a decoder for parts separated by `boundary`.
    #[must_use]
    pub fn new(boundary: &str, config: &DecoderConfig) -> Self {
        let dash_boundary = [b"--".as_slice(), boundary.as_bytes()].concat();
        let delimiter = [b"\r\n".as_slice(), &dash_boundary].concat();
        Self {
            state: State::Start,
            dash_boundary,
            delimiter,
            scanner: LineScanner::new(config.get_max_line_length()),
            head: PartHead::default(),
            part: None,
            charset: config.get_charset(),
            spill_threshold: config.get_spill_threshold(),
            spill_dir: config.get_spill_dir().clone(),
            max_fields: config.get_max_form_fields(),
            fields: 0,
        }
    }

    fn parse_part_header(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = self.charset.decode(line);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed("part header without colon"))?;
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            if !value.to_ascii_lowercase().starts_with("form-data") {
                return Err(malformed("part is not form-data"));
            }
            self.head.name = header_param(value, "name").map(str::to_owned);
            self.head.filename = header_param(value, "filename").map(str::to_owned);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            self.head.content_type = Some(value.to_owned());
        }
        Ok(())
    }

    fn start_part(&mut self) -> Result<(), ParseError> {
        let head = std::mem::take(&mut self.head);
        let name = head.name.ok_or_else(|| malformed("part without a name"))?;
        self.fields += 1;
        if self.fields > self.max_fields {
            return Err(ParseError::TooManyFields {
                limit: self.max_fields,
            });
        }
        let data = if head.filename.is_some() {
            PartData::File(SpillBuffer::new(self.spill_threshold, self.spill_dir.clone()))
        } else {
            PartData::Field(BytesMut::new())
        };
        self.part = Some(Part {
            name,
            filename: head.filename,
            content_type: head.content_type,
            data,
        });
        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> Result<(), ParseError> {
        match self.part.as_mut().map(|p| &mut p.data) {
            Some(PartData::Field(buf)) => buf.extend_from_slice(data),
            Some(PartData::File(spill)) => spill.write(data).map_err(ParseError::Spill)?,
            None => return Err(malformed("part data outside a part")),
        }
        Ok(())
    }

    fn finish_part(&mut self, request: &mut HttpRequest) -> Result<(), ParseError> {
        let Some(part) = self.part.take() else {
            return Ok(());
        };
        match part.data {
            PartData::Field(buf) => request.params.append(part.name, self.charset.decode(&buf)),
            PartData::File(mut spill) => request.files.push(UploadedFile {
                field: part.name,
                filename: part.filename.unwrap_or_default(),
                content_type: part.content_type,
                body: spill.take_body().map_err(ParseError::Spill)?,
            }),
        }
        Ok(())
    }
}

impl BodyDecoder for MultipartDecoder {
    fn decode(
        &mut self,
        input: &[u8],
        last: bool,
        request: &mut HttpRequest,
    ) -> Result<usize, ParseError> {
        let mut pos = 0;
        loop {
            let rest = &input[pos..];
            match self.state {
                State::Start => {
                    // The opening boundary may start the body without a CRLF.
                    if rest.starts_with(&self.dash_boundary) {
                        pos += self.dash_boundary.len();
                        self.state = State::AfterDelimiter;
                    } else if !last && self.dash_boundary.starts_with(rest) {
                        return Ok(pos);
                    } else {
                        self.state = State::Preamble;
                    }
                }
                State::Preamble => {
                    if let Some(i) = memmem::find(rest, &self.delimiter) {
                        pos += i + self.delimiter.len();
                        self.state = State::AfterDelimiter;
                    } else if last {
                        return Err(malformed("missing opening boundary"));
                    } else {
                        return Ok(pos + rest.len().saturating_sub(self.delimiter.len()));
                    }
                }
                State::AfterDelimiter => {
                    // Linear whitespace may pad the delimiter line.
                    let pad = rest.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
                    let Some(tail) = rest.get(pad..pad + 2) else {
                        return if last { Err(malformed("truncated boundary")) } else { Ok(pos) };
                    };
                    match tail {
                        b"\r\n" => self.state = State::PartHeaders,
                        b"--" => self.state = State::Epilogue,
                        _ => return Err(malformed("invalid boundary terminator")),
                    }
                    pos += pad + 2;
                }
                State::PartHeaders => {
                    let line = match self.scanner.next_line(rest) {
                        Ok(Some(line)) => line,
                        Ok(None) if last => return Err(malformed("truncated part headers")),
                        Ok(None) => return Ok(pos),
                        Err(e) => return Err(ParseError::HeaderLineTooLong { limit: e.limit }),
                    };
                    if line.is_empty() {
                        self.start_part()?;
                        self.state = State::PartBody;
                    } else {
                        self.parse_part_header(line.content(rest))?;
                    }
                    pos += line.consumed();
                }
                State::PartBody => {
                    if let Some(i) = memmem::find(rest, &self.delimiter) {
                        self.append(&rest[..i])?;
                        self.finish_part(request)?;
                        pos += i + self.delimiter.len();
                        self.state = State::AfterDelimiter;
                    } else if last {
                        return Err(malformed("unterminated part"));
                    } else {
                        let safe = rest.len().saturating_sub(self.delimiter.len());
                        self.append(&rest[..safe])?;
                        return Ok(pos + safe);
                    }
                }
                State::Epilogue => return Ok(input.len()),
            }
        }
    }

    fn finish(&mut self, _request: &mut HttpRequest) -> Result<(), ParseError> {
        if self.state == State::Epilogue {
            Ok(())
        } else {
            Err(malformed("missing closing boundary"))
        }
    }
}
