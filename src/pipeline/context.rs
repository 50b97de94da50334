//! Per-invocation view handed to filter callbacks.

use crate::{
    connection::ConnectionHandle,
    error::PipelineError,
    message::Message,
    pipeline::Pipeline,
};

/// Position of the current filter within a [`Pipeline`].
///
/// The `fire_*` methods forward an event to the next filter toward the tail;
/// [`FilterContext::write`] forwards an outbound message to the previous
/// filter toward the head. Failures further along the chain are handled
/// there and never propagate back to the caller.
pub struct FilterContext<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

impl<'a> FilterContext<'a> {
    pub(super) fn new(pipeline: &'a Pipeline, index: usize) -> Self { Self { pipeline, index } }

    /// The connection this pipeline belongs to.
    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle { self.pipeline.connection() }

    /// Name under which the current filter is registered.
    #[must_use]
    pub fn name(&self) -> &str { self.pipeline.name_at(self.index) }

    /// Forward the accept event.
    pub fn fire_accept(&self) { self.pipeline.accept_from(self.index + 1); }

    /// Forward the connect event.
    pub fn fire_connect(&self) { self.pipeline.connect_from(self.index + 1); }

    /// Forward a message toward the tail.
    pub fn fire_read(&self, message: Message) { self.pipeline.read_from(self.index + 1, message); }

    /// Forward the read-EOF event.
    pub fn fire_read_eof(&self) { self.pipeline.read_eof_from(self.index + 1); }

    /// Forward the send-complete event.
    pub fn fire_send_complete(&self) { self.pipeline.send_complete_from(self.index + 1); }

    /// Forward the close event.
    pub fn fire_close(&self) { self.pipeline.close_from(self.index + 1); }

    /// Forward an error toward the tail.
    pub fn fire_error(&self, error: &PipelineError) {
        self.pipeline.error_from(self.index + 1, error);
    }

    /// Send an outbound message toward the head.
    pub fn write(&self, message: Message) { self.pipeline.write_before(self.index, message); }
}
