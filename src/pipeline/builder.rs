//! Reusable pipeline templates.

use std::sync::Arc;

use super::{Filter, Node, Pipeline};
use crate::{connection::ConnectionHandle, error::PipelineError, message::Message};

/// Turns an error that reached the tail into a protocol-appropriate reply.
///
/// The rendered message is written from the tail, so it passes through the
/// chain's encoders before reaching the socket.
pub trait ErrorRenderer: Send + Sync + 'static {
    /// Build the reply for `error`, or `None` to close without replying.
    fn render(&self, error: &PipelineError) -> Option<Message>;
}

impl<F> ErrorRenderer for F
where
    F: Fn(&PipelineError) -> Option<Message> + Send + Sync + 'static,
{
    fn render(&self, error: &PipelineError) -> Option<Message> { self(error) }
}

/// Template of named singleton filters used to build one [`Pipeline`] per
/// connection.
///
/// Cloning is cheap: filters are shared behind `Arc`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use wirechain::{
///     config::DecoderConfig,
///     connection::Connection,
///     http::{HttpDecoder, HttpErrorRenderer, HttpResponseEncoder},
///     pipeline::PipelineBuilder,
/// };
///
/// let builder = PipelineBuilder::new()
///     .filter("http-encoder", Arc::new(HttpResponseEncoder::default()))
///     .expect("unique name")
///     .filter("http-decoder", Arc::new(HttpDecoder::new(DecoderConfig::default())))
///     .expect("unique name")
///     .error_renderer(HttpErrorRenderer);
/// let pipeline = builder.build(Connection::detached());
/// assert_eq!(pipeline.names(), ["http-encoder", "http-decoder"]);
/// ```
#[derive(Clone, Default)]
pub struct PipelineBuilder {
    nodes: Vec<Node>,
    renderer: Option<Arc<dyn ErrorRenderer>>,
}

impl PipelineBuilder {
    /// Create an empty template.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a filter toward the tail.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateName`] if `name` is already used.
    pub fn filter<F: Filter>(
        mut self,
        name: impl Into<String>,
        filter: Arc<F>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(PipelineError::DuplicateName(name));
        }
        self.nodes.push(Node::new(name, filter));
        Ok(self)
    }

    /// Set the renderer used for errors reaching the tail.
    #[must_use]
    pub fn error_renderer(mut self, renderer: impl ErrorRenderer) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Number of filters in the template.
    #[must_use]
    pub fn len(&self) -> usize { self.nodes.len() }

    /// Whether the template has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Instantiate the chain for `connection`.
    #[must_use]
    pub fn build(&self, connection: ConnectionHandle) -> Pipeline {
        Pipeline::from_parts(connection, self.nodes.clone(), self.renderer.clone())
    }
}
