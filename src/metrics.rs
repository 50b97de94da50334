//! Metric helpers for `wirechain`.
//!
//! Names and thin wrappers around the [`metrics`](https://docs.rs/metrics)
//! crate. With the `metrics` feature disabled every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "wirechain_connections_active";
/// Name of the counter tracking fully decoded messages.
pub const MESSAGES_DECODED: &str = "wirechain_messages_decoded_total";
/// Name of the counter tracking rejected input.
pub const PARSE_ERRORS: &str = "wirechain_parse_errors_total";
/// Name of the gauge tracking tasks waiting for a group slot.
pub const TASK_GROUP_QUEUED: &str = "wirechain_task_group_queued";

/// Protocol a decoded message belongs to.
#[derive(Clone, Copy, Debug)]
pub enum Protocol {
    /// HTTP/1.x requests.
    Http,
    /// WebSocket frames.
    WebSocket,
}

impl Protocol {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::WebSocket => "websocket",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a decoded message for `protocol`.
pub fn inc_decoded(protocol: Protocol) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DECODED, "protocol" => protocol.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = protocol;
}

/// Record a parse error.
pub fn inc_parse_errors() {
    #[cfg(feature = "metrics")]
    counter!(PARSE_ERRORS).increment(1);
}

/// Publish the number of tasks waiting in `group`.
pub fn set_group_queued(group: &str, queued: usize) {
    #[cfg(feature = "metrics")]
    {
        #[expect(clippy::cast_precision_loss, reason = "queue depth fits in f64 mantissa")]
        let depth = queued as f64;
        gauge!(TASK_GROUP_QUEUED, "group" => group.to_owned()).set(depth);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (group, queued);
}
