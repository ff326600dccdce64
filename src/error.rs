//! Error types surfaced by route registration and dispatch.

use thiserror::Error;

/// Boxed error produced by user handlers, middleware and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the interception engine.
///
/// Registration errors (`InvalidMatcherInput`, `InvalidRouteInput`) are
/// returned synchronously before any call is made. The remaining variants
/// fail the intercepted call they belong to and are never retried.
#[derive(Debug, Error)]
pub enum MockError {
    /// A URL pattern could not be turned into a matcher.
    #[error("invalid matcher input: {0}")]
    InvalidMatcherInput(String),

    /// A route was registered with an unusable URL argument.
    #[error("invalid route input: {0}")]
    InvalidRouteInput(String),

    /// No route matched and fallback is disabled.
    #[error("Did not find any matching route for url: {url}")]
    NoMatchingRoute { url: String },

    /// A handler function or middleware stage failed.
    #[error(transparent)]
    Handler(BoxError),

    /// The real network collaborator failed during fallback.
    #[error("fallback transport failed: {0}")]
    Transport(BoxError),

    /// A declarative route definition is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MockError {
    /// Wrap an arbitrary handler failure.
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        MockError::Handler(err.into())
    }

    /// Whether this error was raised at registration time.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            MockError::InvalidMatcherInput(_) | MockError::InvalidRouteInput(_)
        )
    }
}
