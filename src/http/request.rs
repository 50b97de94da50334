//! Decoded HTTP request and its parts.

use std::fmt;

use crate::{codec::Body, connection::AttributeStore};

/// HTTP protocol version of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    /// `HTTP/1.0`
    Http10,
    /// `HTTP/1.1`
    Http11,
}

impl Version {
    /// Wire representation, e.g. `HTTP/1.1`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header list.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a header, keeping any existing values for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove every value of `name`. Returns `true` if any was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name` in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Whether the comma-separated values of `name` include `token`,
    /// ignoring case.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Extend the most recent value; used for obsolete line folding.
    pub(crate) fn continue_last(&mut self, more: &str) -> bool {
        let Some((_, value)) = self.entries.last_mut() else {
            return false;
        };
        if !value.is_empty() {
            value.push(' ');
        }
        value.push_str(more);
        true
    }
}

/// Multi-valued request parameters from the query string and form bodies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    /// Append a value for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name` in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Iterate over `(name, value)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A file part of a `multipart/form-data` body.
#[derive(Debug)]
pub struct UploadedFile {
    /// Form field name.
    pub field: String,
    /// Client-supplied file name.
    pub filename: String,
    /// Declared content type of the part.
    pub content_type: Option<String>,
    /// Part payload; spilled to disk past the configured threshold.
    pub body: Body,
}

/// A fully decoded HTTP/1.x request.
///
/// Spilled bodies and uploads are deleted when the request is dropped.
#[derive(Debug)]
pub struct HttpRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) params: Params,
    pub(crate) files: Vec<UploadedFile>,
    pub(crate) body: Body,
    pub(crate) json: Option<serde_json::Value>,
    attributes: AttributeStore,
}

impl HttpRequest {
    /// Create a request with no headers or body.
    #[must_use]
    pub fn new(method: impl Into<String>, target: impl Into<String>, version: Version) -> Self {
        let target = target.into();
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
            None => (target.clone(), None),
        };
        Self {
            method: method.into(),
            target,
            path,
            query,
            version,
            headers: Headers::new(),
            params: Params::default(),
            files: Vec::new(),
            body: Body::default(),
            json: None,
            attributes: AttributeStore::default(),
        }
    }

    /// Request method, e.g. `GET`.
    #[must_use]
    pub fn method(&self) -> &str { &self.method }

    /// Raw request target as sent by the client.
    #[must_use]
    pub fn target(&self) -> &str { &self.target }

    /// Target path without the query string.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// Raw query string, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }

    /// Protocol version.
    #[must_use]
    pub fn version(&self) -> Version { self.version }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut Headers { &mut self.headers }

    /// Query-string and form parameters.
    #[must_use]
    pub fn params(&self) -> &Params { &self.params }

    /// Uploaded files from a multipart body.
    #[must_use]
    pub fn files(&self) -> &[UploadedFile] { &self.files }

    /// Raw body for content types without a dedicated decoder.
    #[must_use]
    pub fn body(&self) -> &Body { &self.body }

    /// Parsed JSON body, if the request carried one.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> { self.json.as_ref() }

    /// Application attributes attached to this request.
    #[must_use]
    pub fn attributes(&self) -> &AttributeStore { &self.attributes }

    /// Mutable application attributes.
    pub fn attributes_mut(&mut self) -> &mut AttributeStore { &mut self.attributes }

    /// Declared body length, if any.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Whether the connection stays open after this request.
    ///
    /// HTTP/1.1 defaults to persistent connections unless the client sent
    /// `Connection: close`; HTTP/1.0 requires `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        match self.version {
            Version::Http11 => true,
            Version::Http10 => self.headers.has_token("connection", "keep-alive"),
        }
    }
}
