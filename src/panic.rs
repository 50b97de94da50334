//! Panic payload formatting for filters and pool workers.
//!
//! Both the filter chain and the task pool contain panics at their
//! boundaries and need a printable message for logs and listeners.

use std::any::Any;

/// Extract a printable message from a panic payload.
///
/// `&'static str` and `String` payloads are returned verbatim; anything
/// else is reported as an opaque payload.
///
/// ```
/// use wirechain::panic::panic_message;
///
/// assert_eq!(panic_message(&"boom"), "boom");
/// assert_eq!(panic_message(&String::from("bang")), "bang");
/// assert_eq!(panic_message(&7_u8), "<non-string panic payload>");
/// ```
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_owned())
}
