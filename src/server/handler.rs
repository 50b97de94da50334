use std::future::Future;

use async_trait::async_trait;

use crate::{connection::ConnectionHandle, error::HandlerError, message::Message};

/// Application code receiving fully decoded messages.
///
/// Replies are sent with [`crate::connection::Connection::write`], either
/// before returning or later from any task. A returned error is dispatched
/// through the chain's error event.
///
/// Closures of the right shape implement the trait:
///
/// ```
/// use wirechain::{
///     connection::ConnectionHandle,
///     error::HandlerError,
///     http::HttpResponse,
///     message::Message,
///     server::Handler,
/// };
///
/// async fn echo(message: Message, conn: ConnectionHandle) -> Result<(), HandlerError> {
///     if let Some(req) = message.into_http_request() {
///         conn.write(HttpResponse::text(200, req.path().to_owned()))?;
///     }
///     Ok(())
/// }
///
/// fn assert_handler<H: Handler>(_: H) {}
/// assert_handler(echo);
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle one decoded message from `connection`.
    async fn handle(&self, message: Message, connection: ConnectionHandle)
    -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Message, ConnectionHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        message: Message,
        connection: ConnectionHandle,
    ) -> Result<(), HandlerError> {
        (self)(message, connection).await
    }
}
