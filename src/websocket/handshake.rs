//! Opening handshake validation and the `101 Switching Protocols` reply.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::{
    error::ParseError,
    http::{HttpRequest, HttpResponse},
};

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
///
/// ```
/// use wirechain::websocket::accept_key;
///
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.trim().as_bytes());
    sha.update(GUID);
    STANDARD.encode(sha.finalize())
}

/// Check that `request` is a valid upgrade and return the client key.
pub(crate) fn validate(request: &HttpRequest) -> Result<&str, ParseError> {
    let headers = request.headers();
    if request.method() != "GET" {
        return Err(ParseError::InvalidHandshake("method must be GET"));
    }
    if !headers.has_token("upgrade", "websocket") {
        return Err(ParseError::InvalidHandshake("missing Upgrade: websocket"));
    }
    if !headers.has_token("connection", "upgrade") {
        return Err(ParseError::InvalidHandshake("missing Connection: upgrade"));
    }
    if headers.get("sec-websocket-version").map(str::trim) != Some("13") {
        return Err(ParseError::InvalidHandshake("unsupported Sec-WebSocket-Version"));
    }
    headers
        .get("sec-websocket-key")
        .filter(|k| !k.trim().is_empty())
        .ok_or(ParseError::InvalidHandshake("missing Sec-WebSocket-Key"))
}

/// Encoded `101 Switching Protocols` response for `key`.
pub(crate) fn switching_protocols(key: &str) -> Bytes {
    let response = HttpResponse::new(101)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", accept_key(key));
    let mut dst = BytesMut::new();
    response.encode(&mut dst);
    dst.freeze()
}
