//! The interception boundary.
//!
//! Code under test sends requests through a [`FetchClient`]. The client
//! forwards each call to whichever [`Fetch`] implementation is currently
//! installed: the real transport by default, or a mock dispatcher while a
//! [`FetchMock`](crate::FetchMock) is configured.

use crate::error::MockError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimal description of an outgoing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request URL, possibly with a query string
    pub url: String,
    /// HTTP method as sent by the caller (not normalized)
    #[serde(default = "default_method")]
    pub method: String,
    /// Raw request body
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new("HEAD", url)
    }

    /// Attach a raw body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Path portion of the URL (query string and fragment stripped).
    pub fn path(&self) -> &str {
        split_url(&self.url).0
    }

    /// Query component of the URL, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        split_url(&self.url).1
    }
}

impl From<&str> for Request {
    fn from(url: &str) -> Self {
        Request::get(url)
    }
}

impl From<String> for Request {
    fn from(url: String) -> Self {
        Request::get(url)
    }
}

/// Split a URL into its path and query components.
pub(crate) fn split_url(url: &str) -> (&str, Option<&str>) {
    let url = url.split_once('#').map(|(u, _)| u).unwrap_or(url);
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}

/// A materialized response handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Anything that can carry out a call: the real network or a mock.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, MockError>;
}

/// The single dispatch point intercepted by mocks.
pub struct FetchClient {
    real: Arc<dyn Fetch>,
    installed: RwLock<Option<Arc<dyn Fetch>>>,
}

impl FetchClient {
    /// Create a client that talks to `real` until a mock is installed.
    pub fn new(real: Arc<dyn Fetch>) -> Self {
        Self {
            real,
            installed: RwLock::new(None),
        }
    }

    /// Send a request through whatever is currently installed.
    pub async fn fetch(&self, request: impl Into<Request>) -> Result<Response, MockError> {
        let target = self
            .installed
            .read()
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.real));
        target.fetch(request.into()).await
    }

    /// The real transport used for fallback.
    pub fn real(&self) -> Arc<dyn Fetch> {
        Arc::clone(&self.real)
    }

    /// Route all calls to `interceptor`, replacing any previous one.
    pub fn install(&self, interceptor: Arc<dyn Fetch>) {
        *self.installed.write() = Some(interceptor);
    }

    /// Detach interception; calls go to the real transport again.
    pub fn restore(&self) {
        *self.installed.write() = None;
    }

    /// Detach `interceptor` if it is the one currently installed.
    ///
    /// Returns whether anything was detached.
    pub fn restore_if(&self, interceptor: &Arc<dyn Fetch>) -> bool {
        let mut installed = self.installed.write();
        match installed.as_ref() {
            Some(current) if Arc::ptr_eq(current, interceptor) => {
                *installed = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_intercepted(&self) -> bool {
        self.installed.read().is_some()
    }
}

/// Transport that refuses every call. Used where no network is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

#[async_trait]
impl Fetch for Offline {
    async fn fetch(&self, request: Request) -> Result<Response, MockError> {
        Err(MockError::Transport(
            format!("network access disabled: {} {}", request.method, request.url).into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl Fetch for Fixed {
        async fn fetch(&self, _request: Request) -> Result<Response, MockError> {
            Ok(Response::new(200, "OK", self.0))
        }
    }

    #[test]
    fn test_split_url() {
        let req = Request::get("/test/123?name=abba&age=99");
        assert_eq!(req.path(), "/test/123");
        assert_eq!(req.query(), Some("name=abba&age=99"));

        let req = Request::get("/plain#frag");
        assert_eq!(req.path(), "/plain");
        assert_eq!(req.query(), None);
    }

    #[test]
    fn test_response_ok_and_json() {
        let resp = Response::new(404, "Not Found", r#"{"key":"value"}"#);
        assert!(!resp.ok());
        let json: serde_json::Value = resp.json().unwrap();
        assert_eq!(json["key"], "value");
        assert!(Response::new(204, "No Content", "").ok());
    }

    #[tokio::test]
    async fn test_install_and_restore() {
        let client = FetchClient::new(Arc::new(Fixed("real")));
        assert_eq!(client.fetch("/x").await.unwrap().body, "real");

        client.install(Arc::new(Fixed("mocked")));
        assert!(client.is_intercepted());
        assert_eq!(client.fetch("/x").await.unwrap().body, "mocked");

        client.restore();
        assert!(!client.is_intercepted());
        assert_eq!(client.fetch("/x").await.unwrap().body, "real");
    }

    #[tokio::test]
    async fn test_restore_if_only_detaches_owner() {
        let client = FetchClient::new(Arc::new(Fixed("real")));
        let first: Arc<dyn Fetch> = Arc::new(Fixed("first"));
        let second: Arc<dyn Fetch> = Arc::new(Fixed("second"));

        client.install(Arc::clone(&first));
        client.install(Arc::clone(&second));
        assert!(!client.restore_if(&first));
        assert_eq!(client.fetch("/x").await.unwrap().body, "second");

        assert!(client.restore_if(&second));
        assert!(!client.is_intercepted());
        assert_eq!(client.fetch("/x").await.unwrap().body, "real");
    }

    #[test]
    fn test_offline_refuses() {
        let result = tokio_test::block_on(Offline.fetch(Request::get("/x")));
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, MockError::Transport(_)));
    }
}
