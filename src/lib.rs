//! Fetch Intercept Mock
//!
//! Intercepts calls made through a [`FetchClient`] and answers them from a
//! registry of routes instead of the network. Built for tests that need
//! deterministic responses, injected latency, and injected failures.
//!
//! # Features
//!
//! - **Route Matching**: URL patterns with `:name` parameters and `*`, HTTP methods, custom predicates
//! - **Handler Arguments**: Path params, query params, and parsed JSON or raw bodies
//! - **Programmatic Responses**: Literal JSON, descriptors, sync and async functions
//! - **Response Combinators**: `json`, `status_code`, `status_text`, `combine`, `delayed`
//! - **Middleware**: Delay and failure-rate injection, composable into chains
//! - **Fallback**: Forward unmatched calls to the real transport, or fail them
//! - **Declarative Routes**: YAML route files with Handlebars-templated bodies
//!
//! # Example
//!
//! ```no_run
//! use fetch_intercept_mock::{FetchClient, FetchMock, MockOptions, Offline};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), fetch_intercept_mock::MockError> {
//! let client = Arc::new(FetchClient::new(Arc::new(Offline)));
//! let mock = FetchMock::configure(&client, MockOptions::default().enable_fallback(false));
//! mock.get("/users/:id", json!({ "name": "Ada" }))?;
//!
//! let resp = client.fetch("/users/1").await?;
//! assert_eq!(resp.status, 200);
//! mock.restore();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod matcher;
pub mod middleware;
pub mod mock;
pub mod response;
pub mod template;

pub use config::MockConfig;
pub use error::{BoxError, MockError};
pub use extract::{HandlerArgument, RequestBody};
pub use fetch::{Fetch, FetchClient, Offline, Request, Response};
pub use matcher::Match;
pub use middleware::Middleware;
pub use mock::{FetchMock, MockOptions, MockStats};
pub use response::{Handler, PartialResponse, Respond, ResponseDescriptor};
