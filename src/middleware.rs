//! Response middleware.
//!
//! Middleware stages run after a handler has been resolved and may replace
//! or delay the response before it reaches the caller.

use crate::error::MockError;
use crate::extract::HandlerArgument;
use crate::response::{PartialResponse, ResponseDescriptor};
use async_trait::async_trait;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Uniform random source yielding values in `[0, 1)`.
pub type RandomSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Random source backed by the thread-local RNG.
pub fn thread_random() -> RandomSource {
    Arc::new(|| rand::thread_rng().gen::<f64>())
}

/// An asynchronous transform over a resolved response.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn apply(
        &self,
        args: &HandlerArgument,
        response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, MockError>;
}

#[async_trait]
impl<F> Middleware for F
where
    F: Fn(&HandlerArgument, ResponseDescriptor) -> ResponseDescriptor + Send + Sync,
{
    async fn apply(
        &self,
        args: &HandlerArgument,
        response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, MockError> {
        Ok(self(args, response))
    }
}

/// Waits a fixed time, then passes the response through.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    delay: Duration,
}

impl Delay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Middleware for Delay {
    async fn apply(
        &self,
        _args: &HandlerArgument,
        response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, MockError> {
        debug!(delay_ms = self.delay.as_millis() as u64, "Applying delay");
        tokio::time::sleep(self.delay).await;
        Ok(response)
    }
}

/// Replaces the response with an error descriptor at a given rate.
#[derive(Clone)]
pub struct FailureRate {
    rate: f64,
    error: ResponseDescriptor,
    random: RandomSource,
}

impl FailureRate {
    /// Fail with probability `rate`, answering with `error` merged over defaults.
    pub fn new(rate: f64, error: PartialResponse) -> Self {
        Self {
            rate,
            error: error.into_descriptor(),
            random: thread_random(),
        }
    }

    /// Replace the random source.
    pub fn with_random(mut self, random: RandomSource) -> Self {
        self.random = random;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl fmt::Debug for FailureRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureRate")
            .field("rate", &self.rate)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for FailureRate {
    async fn apply(
        &self,
        _args: &HandlerArgument,
        response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, MockError> {
        let draw = (self.random)();
        if draw < self.rate {
            debug!(draw, rate = self.rate, status = self.error.status, "Injecting failure");
            Ok(self.error.clone())
        } else {
            Ok(response)
        }
    }
}

/// Runs stages in order, feeding each output into the next stage.
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    /// Append a stage.
    pub fn then(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

#[async_trait]
impl Middleware for Chain {
    async fn apply(
        &self,
        args: &HandlerArgument,
        mut response: ResponseDescriptor,
    ) -> Result<ResponseDescriptor, MockError> {
        for stage in &self.stages {
            response = stage.apply(args, response).await?;
        }
        Ok(response)
    }
}

/// Delay every response by `ms` milliseconds.
pub fn delay(ms: u64) -> Delay {
    Delay::new(Duration::from_millis(ms))
}

/// Fail with probability `rate`. Defaults to a bare 500 response.
pub fn failure_rate(rate: f64, error: Option<PartialResponse>) -> FailureRate {
    let error = error.unwrap_or_else(|| crate::response::status_code(500));
    FailureRate::new(rate, error)
}

/// Compose middleware into a single sequential stage.
pub fn combine<I>(stages: I) -> Chain
where
    I: IntoIterator<Item = Arc<dyn Middleware>>,
{
    Chain::new(stages.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{json, status_code};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn fixed(value: f64) -> RandomSource {
        Arc::new(move || value)
    }

    fn normal() -> ResponseDescriptor {
        ResponseDescriptor::new(json!("normal-response"))
    }

    #[tokio::test]
    async fn test_delay_passes_response_through() {
        let start = Instant::now();
        let out = delay(100)
            .apply(&HandlerArgument::default(), normal())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(out, normal());
    }

    #[tokio::test]
    async fn test_failure_rate_default_error() {
        let mw = failure_rate(0.3, None).with_random(fixed(0.2));
        let out = mw.apply(&HandlerArgument::default(), normal()).await.unwrap();
        assert_eq!(out.status, 500);
        assert_eq!(out.status_text, "OK");
    }

    #[tokio::test]
    async fn test_failure_rate_passes_through_above_rate() {
        let mw = failure_rate(0.3, None).with_random(fixed(0.4));
        let out = mw.apply(&HandlerArgument::default(), normal()).await.unwrap();
        assert_eq!(out, normal());
    }

    #[tokio::test]
    async fn test_failure_rate_threshold_is_strict() {
        let args = HandlerArgument::default();
        let draws = [0.0, 0.1, 0.25, 0.5, 0.75, 0.99];
        for rate in draws {
            for r in draws {
                let mw = failure_rate(rate, Some(status_code(1337))).with_random(fixed(r));
                let out = mw.apply(&args, normal()).await.unwrap();
                if r < rate {
                    assert_eq!(out.status, 1337, "r={} rate={}", r, rate);
                } else {
                    assert_eq!(out, normal(), "r={} rate={}", r, rate);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_custom_error_descriptor() {
        let error = crate::response::combine([status_code(503), json(json!({"error": "down"}))]);
        let mw = failure_rate(1.0, Some(error)).with_random(fixed(0.0));
        let out = mw.apply(&HandlerArgument::default(), normal()).await.unwrap();
        assert_eq!(out.status, 503);
        assert_eq!(out.body["error"], "down");
    }

    #[tokio::test]
    async fn test_combine_delay_and_failure() {
        let delay_calls = Arc::new(AtomicUsize::new(0));
        let failure_calls = Arc::new(AtomicUsize::new(0));

        let counting_delay = {
            let calls = Arc::clone(&delay_calls);
            let inner = delay(100);
            Chain::default()
                .then(move |_: &HandlerArgument, resp: ResponseDescriptor| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    resp
                })
                .then(inner)
        };
        let counting_failure = {
            let calls = Arc::clone(&failure_calls);
            Chain::default()
                .then(move |_: &HandlerArgument, resp: ResponseDescriptor| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    resp
                })
                .then(failure_rate(0.3, Some(status_code(1337))).with_random(fixed(0.2)))
        };

        let combined = combine([
            Arc::new(counting_delay) as Arc<dyn Middleware>,
            Arc::new(counting_failure),
        ]);

        let start = Instant::now();
        let out = combined
            .apply(&HandlerArgument::default(), normal())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(out.status, 1337);
        assert_eq!(delay_calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let out = Chain::default()
            .apply(&HandlerArgument::default(), normal())
            .await
            .unwrap();
        assert_eq!(out, normal());
    }
}
