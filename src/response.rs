//! Response resolution and combinators.
//!
//! A route's [`Handler`] may be a literal JSON value, a (partial) response
//! descriptor, or a function of the [`HandlerArgument`]. [`resolve`] turns
//! any of those into a concrete [`ResponseDescriptor`].

use crate::error::{BoxError, MockError};
use crate::extract::HandlerArgument;
use crate::fetch::Response;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A fully resolved response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    pub body: Value,
    pub status: u16,
    pub status_text: String,
}

impl Default for ResponseDescriptor {
    fn default() -> Self {
        Self {
            body: Value::Null,
            status: 200,
            status_text: "OK".to_string(),
        }
    }
}

impl ResponseDescriptor {
    /// A 200 OK response carrying `body`.
    pub fn new(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Materialize the descriptor into the response object handed to callers.
    pub fn into_response(self) -> Response {
        Response::new(self.status, self.status_text, self.body.to_string())
    }
}

/// A response descriptor with every field optional.
///
/// Produced by the combinators; missing fields fall back to the defaults
/// of [`ResponseDescriptor`] once resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl PartialResponse {
    /// Overlay `other` on top of `self`; set fields of `other` win.
    pub fn merge(self, other: PartialResponse) -> Self {
        Self {
            body: other.body.or(self.body),
            status: other.status.or(self.status),
            status_text: other.status_text.or(self.status_text),
        }
    }

    /// Fill missing fields with defaults.
    pub fn into_descriptor(self) -> ResponseDescriptor {
        let defaults = ResponseDescriptor::default();
        ResponseDescriptor {
            body: self.body.unwrap_or(defaults.body),
            status: self.status.unwrap_or(defaults.status),
            status_text: self.status_text.unwrap_or(defaults.status_text),
        }
    }
}

impl From<Value> for PartialResponse {
    fn from(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }
}

impl From<ResponseDescriptor> for PartialResponse {
    fn from(desc: ResponseDescriptor) -> Self {
        Self {
            body: Some(desc.body),
            status: Some(desc.status),
            status_text: Some(desc.status_text),
        }
    }
}

/// Something that produces a response for a matched call.
#[async_trait]
pub trait Respond: Send + Sync {
    /// Produce the next handler to resolve. Returning a literal or a
    /// descriptor ends resolution; returning a function continues it.
    async fn respond(&self, args: &HandlerArgument) -> Result<Handler, MockError>;
}

#[async_trait]
impl<F, R> Respond for F
where
    F: Fn(&HandlerArgument) -> R + Send + Sync,
    R: Into<Handler> + 'static,
{
    async fn respond(&self, args: &HandlerArgument) -> Result<Handler, MockError> {
        Ok(self(args).into())
    }
}

/// The declared response of a route.
#[derive(Clone)]
pub enum Handler {
    /// A literal JSON body, served as 200 OK
    Json(Value),
    /// A descriptor, possibly partial
    Response(PartialResponse),
    /// A function of the handler argument
    Func(Arc<dyn Respond>),
}

impl Handler {
    /// Wrap a synchronous closure or any [`Respond`] implementation.
    pub fn func(respond: impl Respond + 'static) -> Self {
        Handler::Func(Arc::new(respond))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Handler::Response(partial) => f.debug_tuple("Response").field(partial).finish(),
            Handler::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl From<Value> for Handler {
    fn from(value: Value) -> Self {
        Handler::Json(value)
    }
}

impl From<PartialResponse> for Handler {
    fn from(partial: PartialResponse) -> Self {
        Handler::Response(partial)
    }
}

impl From<ResponseDescriptor> for Handler {
    fn from(desc: ResponseDescriptor) -> Self {
        Handler::Response(desc.into())
    }
}

/// Resolve a handler against the call's argument.
///
/// Functions are invoked and their result resolved again until a literal
/// or descriptor is reached. Errors from functions propagate unchanged.
pub async fn resolve(
    handler: &Handler,
    args: &HandlerArgument,
) -> Result<ResponseDescriptor, MockError> {
    let mut current = handler.clone();
    loop {
        current = match current {
            Handler::Json(body) => return Ok(ResponseDescriptor::new(body)),
            Handler::Response(partial) => return Ok(partial.into_descriptor()),
            Handler::Func(respond) => respond.respond(args).await?,
        };
    }
}

/// Adapter for async handler functions.
pub struct FromAsync<F>(F);

#[async_trait]
impl<F, Fut, R, E> Respond for FromAsync<F>
where
    F: Fn(HandlerArgument) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Into<Handler> + 'static,
    E: Into<BoxError> + 'static,
{
    async fn respond(&self, args: &HandlerArgument) -> Result<Handler, MockError> {
        match (self.0)(args.clone()).await {
            Ok(next) => Ok(next.into()),
            Err(err) => Err(MockError::handler(err)),
        }
    }
}

/// Build a handler from an async function. A returned error fails the call.
pub fn from_async<F, Fut, R, E>(f: F) -> Handler
where
    F: Fn(HandlerArgument) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Into<Handler> + 'static,
    E: Into<BoxError> + 'static,
{
    Handler::func(FromAsync(f))
}

/// A descriptor carrying `body`.
pub fn json(body: Value) -> PartialResponse {
    PartialResponse::from(body)
}

/// A descriptor overriding only the status code.
pub fn status_code(status: u16) -> PartialResponse {
    PartialResponse {
        status: Some(status),
        ..PartialResponse::default()
    }
}

/// A descriptor overriding only the status text.
pub fn status_text(text: impl Into<String>) -> PartialResponse {
    PartialResponse {
        status_text: Some(text.into()),
        ..PartialResponse::default()
    }
}

/// Merge descriptors left to right; later set fields override earlier ones.
pub fn combine<I>(parts: I) -> PartialResponse
where
    I: IntoIterator<Item = PartialResponse>,
{
    parts
        .into_iter()
        .fold(PartialResponse::default(), PartialResponse::merge)
}

struct Delayed {
    delay: Duration,
    inner: Handler,
}

#[async_trait]
impl Respond for Delayed {
    async fn respond(&self, args: &HandlerArgument) -> Result<Handler, MockError> {
        let resolved = resolve(&self.inner, args).await?;
        debug!(delay_ms = self.delay.as_millis() as u64, "Delaying response");
        tokio::time::sleep(self.delay).await;
        Ok(resolved.into())
    }
}

/// Resolve `inner`, then wait `ms` milliseconds before answering.
pub fn delayed(ms: u64, inner: impl Into<Handler>) -> Handler {
    Handler::func(Delayed {
        delay: Duration::from_millis(ms),
        inner: inner.into(),
    })
}
