//! Bidirectional filter chain bound to one connection.
//!
//! A [`Pipeline`] is an ordered list of named [`Filter`]s between two fixed
//! sentinels. Inbound events enter at the head and travel toward the tail in
//! registration order; outbound messages enter at the tail and travel toward
//! the head. The head's outbound hook queues encoded bytes on the
//! connection; the tail's inbound hook hands decoded messages to the
//! connection for handler dispatch.
//!
//! Each filter explicitly forwards events through its [`FilterContext`].
//! A callback that returns an error or panics is converted into an error
//! event starting at that filter. Failures while dispatching an error event
//! are logged and swallowed; the original error continues to the next
//! filter.

mod builder;
mod context;
mod filter;
#[cfg(test)]
mod tests;

use std::{
    any::{Any, TypeId},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

pub use builder::{ErrorRenderer, PipelineBuilder};
pub use context::FilterContext;
pub use filter::{Filter, FilterResult};
use tracing::{debug, warn};

use crate::{
    connection::{ConnectionHandle, MailboxItem},
    error::PipelineError,
    message::Message,
    metrics,
    panic::panic_message,
};

/// One link of the chain: a shared filter plus its registration metadata.
#[derive(Clone)]
pub(crate) struct Node {
    name: String,
    type_id: TypeId,
    filter: Arc<dyn Filter>,
    any: Arc<dyn Any + Send + Sync>,
}

impl Node {
    pub(crate) fn new<F: Filter>(name: String, filter: Arc<F>) -> Self {
        Self {
            name,
            type_id: TypeId::of::<F>(),
            filter: Arc::clone(&filter) as Arc<dyn Filter>,
            any: filter as Arc<dyn Any + Send + Sync>,
        }
    }

    fn is_instance<F: Filter>(&self, filter: &Arc<F>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.any).cast::<()>(), Arc::as_ptr(filter).cast::<()>())
    }
}

/// Ordered chain of filters owned by one connection.
pub struct Pipeline {
    connection: ConnectionHandle,
    nodes: Vec<Node>,
    renderer: Option<Arc<dyn ErrorRenderer>>,
}

impl Pipeline {
    /// Create an empty pipeline for `connection`.
    #[must_use]
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            nodes: Vec::new(),
            renderer: None,
        }
    }

    pub(crate) fn from_parts(
        connection: ConnectionHandle,
        nodes: Vec<Node>,
        renderer: Option<Arc<dyn ErrorRenderer>>,
    ) -> Self {
        Self {
            connection,
            nodes,
            renderer,
        }
    }

    /// The owning connection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle { &self.connection }

    /// Install the renderer used by the tail to answer errors.
    pub fn set_error_renderer(&mut self, renderer: Arc<dyn ErrorRenderer>) {
        self.renderer = Some(renderer);
    }

    // ---------------------------------------------------------------------
    // Editing
    // ---------------------------------------------------------------------

    fn check_unique(&self, name: &str) -> Result<(), PipelineError> {
        if self.contains(name) {
            return Err(PipelineError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize, PipelineError> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .ok_or_else(|| PipelineError::UnknownName(name.to_owned()))
    }

    fn insert_at<F: Filter>(
        &mut self,
        index: usize,
        name: impl Into<String>,
        filter: Arc<F>,
    ) -> Result<&mut Self, PipelineError> {
        let name = name.into();
        self.check_unique(&name)?;
        self.nodes.insert(index, Node::new(name, filter));
        Ok(self)
    }

    /// Insert `filter` right after the head.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateName`] if `name` is taken.
    pub fn add_first<F: Filter>(
        &mut self,
        name: impl Into<String>,
        filter: Arc<F>,
    ) -> Result<&mut Self, PipelineError> {
        self.insert_at(0, name, filter)
    }

    /// Insert `filter` right before the tail.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateName`] if `name` is taken.
    pub fn add_last<F: Filter>(
        &mut self,
        name: impl Into<String>,
        filter: Arc<F>,
    ) -> Result<&mut Self, PipelineError> {
        let index = self.nodes.len();
        self.insert_at(index, name, filter)
    }

    /// Insert `filter` immediately before the filter named `base`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownName`] if `base` is not registered, or
    /// [`PipelineError::DuplicateName`] if `name` is taken.
    pub fn add_before<F: Filter>(
        &mut self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<F>,
    ) -> Result<&mut Self, PipelineError> {
        let index = self.position(base)?;
        self.insert_at(index, name, filter)
    }

    /// Insert `filter` immediately after the filter named `base`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownName`] if `base` is not registered, or
    /// [`PipelineError::DuplicateName`] if `name` is taken.
    pub fn add_after<F: Filter>(
        &mut self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<F>,
    ) -> Result<&mut Self, PipelineError> {
        let index = self.position(base)?;
        self.insert_at(index + 1, name, filter)
    }

    /// Remove the filter registered as `name`.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Filter>> {
        let index = self.position(name).ok()?;
        Some(self.nodes.remove(index).filter)
    }

    /// Remove `filter` by identity, returning the name it was registered under.
    pub fn remove_filter<F: Filter>(&mut self, filter: &Arc<F>) -> Option<String> {
        let index = self.nodes.iter().position(|n| n.is_instance(filter))?;
        Some(self.nodes.remove(index).name)
    }

    /// Remove the first filter of type `F`.
    pub fn remove_type<F: Filter>(&mut self) -> Option<Arc<F>> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.type_id == TypeId::of::<F>())?;
        self.nodes.remove(index).any.downcast::<F>().ok()
    }

    /// Look up a filter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| Arc::clone(&n.filter))
    }

    /// Look up the first filter of type `F`.
    #[must_use]
    pub fn get_type<F: Filter>(&self) -> Option<Arc<F>> {
        self.nodes
            .iter()
            .find(|n| n.type_id == TypeId::of::<F>())
            .and_then(|n| Arc::clone(&n.any).downcast::<F>().ok())
    }

    /// Whether a filter named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.nodes.iter().any(|n| n.name == name) }

    /// Whether this exact filter instance is registered.
    #[must_use]
    pub fn contains_filter<F: Filter>(&self, filter: &Arc<F>) -> bool {
        self.nodes.iter().any(|n| n.is_instance(filter))
    }

    /// Whether a filter of type `F` is registered.
    #[must_use]
    pub fn contains_type<F: Filter>(&self) -> bool {
        self.nodes.iter().any(|n| n.type_id == TypeId::of::<F>())
    }

    /// Registered names in head-to-tail order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> { self.nodes.iter().map(|n| n.name.as_str()).collect() }

    /// Number of registered filters (sentinels excluded).
    #[must_use]
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Whether no filters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub(crate) fn name_at(&self, index: usize) -> &str {
        self.nodes.get(index).map_or("tail", |n| n.name.as_str())
    }

    // ---------------------------------------------------------------------
    // Dispatch entry points
    // ---------------------------------------------------------------------

    /// Dispatch the accept event from the head.
    pub fn fire_accept(&self) { self.accept_from(0); }

    /// Dispatch the connect event from the head.
    pub fn fire_connect(&self) { self.connect_from(0); }

    /// Dispatch inbound data from the head.
    pub fn fire_read(&self, message: Message) { self.read_from(0, message); }

    /// Dispatch the read-EOF event from the head.
    pub fn fire_read_eof(&self) { self.read_eof_from(0); }

    /// Dispatch the send-complete event from the head.
    pub fn fire_send_complete(&self) { self.send_complete_from(0); }

    /// Dispatch the close event from the head.
    pub fn fire_close(&self) { self.close_from(0); }

    /// Dispatch an error event from the head.
    pub fn fire_error(&self, error: &PipelineError) { self.error_from(0, error); }

    /// Send an outbound message from the tail toward the head.
    pub fn write(&self, message: Message) { self.write_before(self.nodes.len(), message); }

    /// Apply work posted to the connection's mailbox by other threads.
    ///
    /// Writes are encoded through the chain; reported handler errors are
    /// dispatched as error events. Returns the number of items processed.
    pub fn process_mailbox(&self) -> usize {
        let items = self.connection.drain_mailbox();
        let count = items.len();
        for item in items {
            match item {
                MailboxItem::Write(message) => self.write(message),
                MailboxItem::Error(error) => self.fire_error(&PipelineError::Handler(error)),
            }
        }
        count
    }

    // ---------------------------------------------------------------------
    // Internal forwarding
    // ---------------------------------------------------------------------

    /// Run one callback, converting failures into an error event starting at
    /// `index`.
    fn invoke(&self, index: usize, call: impl FnOnce(&dyn Filter, &FilterContext<'_>) -> FilterResult) {
        let node = &self.nodes[index];
        let ctx = FilterContext::new(self, index);
        let error = match catch_unwind(AssertUnwindSafe(|| call(node.filter.as_ref(), &ctx))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => PipelineError::Panicked {
                filter: node.name.clone(),
                message: panic_message(panic.as_ref()),
            },
        };
        debug!(
            connection = %self.connection.id(),
            filter = %node.name,
            error = %error,
            "filter failed; dispatching error event"
        );
        self.error_from(index, &error);
    }

    pub(crate) fn accept_from(&self, index: usize) {
        if index < self.nodes.len() {
            self.invoke(index, |f, ctx| f.on_accept(ctx));
        }
    }

    pub(crate) fn connect_from(&self, index: usize) {
        if index < self.nodes.len() {
            self.invoke(index, |f, ctx| f.on_connect(ctx));
        }
    }

    pub(crate) fn read_from(&self, index: usize, message: Message) {
        if index < self.nodes.len() {
            self.invoke(index, move |f, ctx| f.on_read(ctx, message));
        } else {
            self.tail_read(message);
        }
    }

    pub(crate) fn read_eof_from(&self, index: usize) {
        if index < self.nodes.len() {
            self.invoke(index, |f, ctx| f.on_read_eof(ctx));
        }
    }

    pub(crate) fn send_complete_from(&self, index: usize) {
        if index < self.nodes.len() {
            self.invoke(index, |f, ctx| f.on_send_complete(ctx));
        }
    }

    pub(crate) fn close_from(&self, index: usize) {
        if index < self.nodes.len() {
            self.invoke(index, |f, ctx| f.on_close(ctx));
        }
    }

    /// Forward `message` to the filter before `index`, or to the head.
    pub(crate) fn write_before(&self, index: usize, message: Message) {
        match index.checked_sub(1) {
            Some(prev) => self.invoke(prev, move |f, ctx| f.on_write(ctx, message)),
            None => self.head_write(message),
        }
    }

    pub(crate) fn error_from(&self, index: usize, error: &PipelineError) {
        let Some(node) = self.nodes.get(index) else {
            self.tail_error(error);
            return;
        };
        let ctx = FilterContext::new(self, index);
        let failure = match catch_unwind(AssertUnwindSafe(|| node.filter.on_error(&ctx, error))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        warn!(
            connection = %self.connection.id(),
            filter = %node.name,
            original = %error,
            failure = %failure,
            "filter failed while handling an error event"
        );
        self.error_from(index + 1, error);
    }

    // ---------------------------------------------------------------------
    // Sentinels
    // ---------------------------------------------------------------------

    fn head_write(&self, message: Message) {
        match message {
            Message::Bytes(bytes) => self.connection.enqueue_outbound(bytes),
            other => {
                let error = PipelineError::UnencodedOutbound { kind: other.kind() };
                self.error_from(0, &error);
            }
        }
    }

    fn tail_read(&self, message: Message) { self.connection.deliver(message); }

    fn tail_error(&self, error: &PipelineError) {
        if error.as_parse().is_some() {
            metrics::inc_parse_errors();
        }
        if self.connection.should_close() {
            debug!(connection = %self.connection.id(), %error, "error on closing connection");
            return;
        }
        warn!(
            connection = %self.connection.id(),
            error_type = error.error_type(),
            %error,
            "unhandled pipeline error; closing connection"
        );
        self.connection.close_after_flush();
        if matches!(error, PipelineError::UnencodedOutbound { .. }) {
            return;
        }
        if let Some(response) = self.renderer.as_ref().and_then(|r| r.render(error)) {
            self.write(response);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("connection", &self.connection.id())
            .field("filters", &self.names())
            .finish_non_exhaustive()
    }
}
