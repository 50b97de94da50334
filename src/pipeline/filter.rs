//! The [`Filter`] trait implemented by every pipeline stage.

use crate::{error::PipelineError, message::Message, pipeline::FilterContext};

/// Result returned by filter callbacks.
///
/// An `Err` is converted into an error event that starts at the filter
/// which returned it.
pub type FilterResult = Result<(), PipelineError>;

/// One stage of the protocol-processing chain.
///
/// Filters are singletons shared by every connection: they hold wiring and
/// policy only. Connection-scoped state belongs in the connection's
/// [`crate::connection::AttributeStore`], reached through
/// [`FilterContext::connection`].
///
/// Every callback defaults to forwarding the event unchanged, so a filter
/// overrides only the events it cares about. Inbound events travel from
/// head to tail; [`Filter::on_write`] travels from tail to head.
///
/// # Examples
///
/// ```
/// use wirechain::{
///     message::Message,
///     pipeline::{Filter, FilterContext, FilterResult},
/// };
///
/// struct CountReads;
///
/// impl Filter for CountReads {
///     fn on_read(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
///         ctx.connection().with_attributes(|attrs| {
///             let seen = attrs.get::<u64>("reads").copied().unwrap_or(0);
///             attrs.insert("reads", seen + 1);
///         });
///         ctx.fire_read(message);
///         Ok(())
///     }
/// }
/// ```
pub trait Filter: Send + Sync + 'static {
    /// A server accepted the connection.
    fn on_accept(&self, ctx: &FilterContext<'_>) -> FilterResult {
        ctx.fire_accept();
        Ok(())
    }

    /// A client-side connection was established.
    fn on_connect(&self, ctx: &FilterContext<'_>) -> FilterResult {
        ctx.fire_connect();
        Ok(())
    }

    /// Inbound data or a decoded message arrived.
    fn on_read(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        ctx.fire_read(message);
        Ok(())
    }

    /// The peer closed its sending side.
    fn on_read_eof(&self, ctx: &FilterContext<'_>) -> FilterResult {
        ctx.fire_read_eof();
        Ok(())
    }

    /// Every queued outbound byte has been written to the socket.
    fn on_send_complete(&self, ctx: &FilterContext<'_>) -> FilterResult {
        ctx.fire_send_complete();
        Ok(())
    }

    /// An outbound message is travelling toward the head and may be encoded.
    fn on_write(&self, ctx: &FilterContext<'_>, message: Message) -> FilterResult {
        ctx.write(message);
        Ok(())
    }

    /// The connection is being torn down.
    fn on_close(&self, ctx: &FilterContext<'_>) -> FilterResult {
        ctx.fire_close();
        Ok(())
    }

    /// An earlier stage failed. Failures raised here are logged and swallowed.
    fn on_error(&self, ctx: &FilterContext<'_>, error: &PipelineError) -> FilterResult {
        ctx.fire_error(error);
        Ok(())
    }
}
