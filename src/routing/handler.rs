//! Typed event handlers and their type-erased form
//!
//! Callers implement [`EventHandler<E>`] for a concrete [`Event`]. The
//! registry stores handlers as [`ErasedHandler`] trait objects, which decode
//! the raw payload into `E` before the handler future is created, so a
//! handler only ever sees a fully validated event.

use crate::protocol::{DecodeError, Event, JsonCodec};
use crate::storage::StorageError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HandlerError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed(message.into())
    }
}

/// Business logic for one event type
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: E) -> Result<(), HandlerError>;
}

#[async_trait]
impl<E: Event, H: EventHandler<E>> EventHandler<E> for Arc<H> {
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        self.as_ref().handle(event).await
    }
}

/// Adapter for async closures
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler { f }
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for FnHandler<F>
where
    E: Event,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// A handler invocation ready to run
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Handler with the event type erased
pub trait ErasedHandler: Send + Sync {
    /// Event type this handler decodes
    fn event_kind(&self) -> &'static str;

    /// Decode `payload` and bind it to an invocation
    fn bind(&self, payload: &[u8]) -> Result<HandlerFuture, DecodeError>;
}

struct TypedHandler<E, H> {
    handler: Arc<H>,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event, H: EventHandler<E>> ErasedHandler for TypedHandler<E, H> {
    fn event_kind(&self) -> &'static str {
        E::KIND
    }

    fn bind(&self, payload: &[u8]) -> Result<HandlerFuture, DecodeError> {
        let event = JsonCodec::decode::<E>(payload)?;
        let handler = Arc::clone(&self.handler);
        Ok(Box::pin(async move { handler.handle(event).await }))
    }
}

/// Erase the event type of `handler`
pub fn erase<E: Event, H: EventHandler<E>>(handler: H) -> Arc<dyn ErasedHandler> {
    Arc::new(TypedHandler {
        handler: Arc::new(handler),
        _event: PhantomData,
    })
}
