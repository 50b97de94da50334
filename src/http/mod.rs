//! HTTP/1.x request decoding and response encoding.
//!
//! A typical server chain registers [`HttpResponseEncoder`] before
//! [`HttpDecoder`] and installs [`HttpErrorRenderer`] so decoder failures
//! are answered with a status-coded response before the connection closes.
//!
//! Bodies are delimited by `Content-Length` only; chunked transfer coding is
//! rejected with `501 Not Implemented`.

pub mod body;
mod decoder;
mod head;
mod request;
mod response;

pub use decoder::{HttpContext, HttpDecoder, HttpState};
pub use request::{Headers, HttpRequest, Params, UploadedFile, Version};
pub use response::{HttpErrorRenderer, HttpResponse, HttpResponseEncoder, reason_phrase};
pub(crate) use head::HeadDecoder;
