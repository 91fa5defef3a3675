//! Frame handler trait and typed adapters.
//!
//! A handler receives the `data` of one inbound frame and produces a lazy
//! sequence of replies: zero, one or many, possibly asynchronously. Typed
//! adapters decode `data` into the handler's own input type first.

use std::future::Future;
use std::marker::PhantomData;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use marquee_core::HandlerError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::websocket::connection::SessionInfo;

/// One outbound payload produced by a handler.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub(crate) event: Option<String>,
    pub(crate) data: Value,
}

impl Reply {
    /// Reply under the inbound frame's event name.
    pub fn data(data: Value) -> Self {
        Self { event: None, data }
    }

    /// Reply under an explicit event name.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: Some(event.into()),
            data,
        }
    }

    /// Serialize `value` and reply under the inbound frame's event name.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::data(serde_json::to_value(value)?))
    }

    /// Explicit event name, if any.
    pub fn event_name(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Reply payload.
    pub fn payload(&self) -> &Value {
        &self.data
    }
}

/// Lazy sequence of replies for one inbound frame.
pub type ReplyStream = BoxStream<'static, Result<Reply, HandlerError>>;

/// Handles frames for one event name.
pub trait FrameHandler: Send + Sync + 'static {
    /// Start handling one frame's `data`.
    fn call(&self, data: Value, info: SessionInfo) -> ReplyStream;
}

/// Empty reply sequence.
pub fn no_reply() -> ReplyStream {
    stream::empty().boxed()
}

fn failure(err: HandlerError) -> ReplyStream {
    stream::once(async move { Err(err) }).boxed()
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, HandlerError> {
    serde_json::from_value(data).map_err(|e| HandlerError::invalid_data(e.to_string()))
}

/// Adapter for `async fn(T, SessionInfo) -> Result<R, HandlerError>`.
pub(crate) struct UnaryHandler<F, T, R, Fut> {
    f: F,
    _marker: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> UnaryHandler<F, T, R, Fut>
where
    F: Fn(T, SessionInfo) -> Fut,
    Fut: Future<Output = Result<R, HandlerError>>,
{
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, T, R, Fut> FrameHandler for UnaryHandler<F, T, R, Fut>
where
    F: Fn(T, SessionInfo) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
{
    fn call(&self, data: Value, info: SessionInfo) -> ReplyStream {
        let input = match decode::<T>(data) {
            Ok(input) => input,
            Err(err) => return failure(err),
        };
        let fut = (self.f)(input, info);
        stream::once(async move {
            let value = fut.await?;
            Reply::json(&value)
        })
        .boxed()
    }
}

/// Adapter for `fn(T, SessionInfo) -> impl Stream<Item = Result<Reply, HandlerError>>`.
pub(crate) struct StreamHandler<F, T, S> {
    f: F,
    _marker: PhantomData<fn(T) -> S>,
}

impl<F, T, S> StreamHandler<F, T, S>
where
    F: Fn(T, SessionInfo) -> S,
    S: Stream<Item = Result<Reply, HandlerError>>,
{
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, T, S> FrameHandler for StreamHandler<F, T, S>
where
    F: Fn(T, SessionInfo) -> S + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    S: Stream<Item = Result<Reply, HandlerError>> + Send + 'static,
{
    fn call(&self, data: Value, info: SessionInfo) -> ReplyStream {
        match decode::<T>(data) {
            Ok(input) => (self.f)(input, info).boxed(),
            Err(err) => failure(err),
        }
    }
}
