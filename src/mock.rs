//! Route registry, dispatcher and the installation handle.

use crate::config::{MockConfig, RouteConfig, Settings};
use crate::error::MockError;
use crate::extract::HandlerArgument;
use crate::fetch::{Fetch, FetchClient, Request, Response};
use crate::matcher::{self, AllOf, Match, MethodMatcher, UrlMatcher};
use crate::middleware::Middleware;
use crate::response::{resolve, Handler, ResponseDescriptor};
use crate::template::TemplateEngine;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A registered (matcher, handler) pair. Never mutated once registered.
pub struct RouteDefinition {
    matcher: Arc<dyn Match>,
    handler: Handler,
}

impl RouteDefinition {
    pub fn new(matcher: Arc<dyn Match>, handler: Handler) -> Self {
        Self { matcher, handler }
    }

    pub fn matcher(&self) -> &dyn Match {
        self.matcher.as_ref()
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for RouteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDefinition")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Ordered, append-only list of routes. Insertion order is priority order.
#[derive(Default)]
struct Registry {
    routes: RwLock<Vec<Arc<RouteDefinition>>>,
}

impl Registry {
    fn push(&self, route: RouteDefinition) {
        self.routes.write().push(Arc::new(route));
    }

    /// First route whose matcher accepts `request`.
    fn find(&self, request: &Request) -> Option<Arc<RouteDefinition>> {
        self.routes
            .read()
            .iter()
            .find(|route| route.matcher.matches(request))
            .cloned()
    }

    fn len(&self) -> usize {
        self.routes.read().len()
    }

    fn clear(&self) {
        self.routes.write().clear();
    }
}

/// What a route's URL argument can be.
#[derive(Clone)]
pub enum RouteTarget {
    /// A URL pattern, compiled at registration time
    Pattern(String),
    /// A ready-made matcher
    Matcher(Arc<dyn Match>),
}

impl From<&str> for RouteTarget {
    fn from(pattern: &str) -> Self {
        RouteTarget::Pattern(pattern.to_string())
    }
}

impl From<String> for RouteTarget {
    fn from(pattern: String) -> Self {
        RouteTarget::Pattern(pattern)
    }
}

impl From<UrlMatcher> for RouteTarget {
    fn from(matcher: UrlMatcher) -> Self {
        RouteTarget::Matcher(Arc::new(matcher))
    }
}

impl From<MethodMatcher> for RouteTarget {
    fn from(matcher: MethodMatcher) -> Self {
        RouteTarget::Matcher(Arc::new(matcher))
    }
}

impl From<AllOf> for RouteTarget {
    fn from(matcher: AllOf) -> Self {
        RouteTarget::Matcher(Arc::new(matcher))
    }
}

impl From<Arc<dyn Match>> for RouteTarget {
    fn from(matcher: Arc<dyn Match>) -> Self {
        RouteTarget::Matcher(matcher)
    }
}

impl RouteTarget {
    fn into_matcher(self) -> Result<Arc<dyn Match>, MockError> {
        match self {
            RouteTarget::Pattern(pattern) => matcher::url(pattern)
                .map(|m| Arc::new(m) as Arc<dyn Match>)
                .map_err(|e| MockError::InvalidRouteInput(e.to_string())),
            RouteTarget::Matcher(matcher) => Ok(matcher),
        }
    }
}

/// Options for a mock installation.
#[derive(Clone)]
pub struct MockOptions {
    /// Forward unmatched calls to the real transport
    pub enable_fallback: bool,
    /// Applied to every resolved response
    pub middleware: Option<Arc<dyn Middleware>>,
    pub log_matches: bool,
    pub log_unmatched: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl MockOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            enable_fallback: settings.enable_fallback,
            middleware: None,
            log_matches: settings.log_matches,
            log_unmatched: settings.log_unmatched,
        }
    }

    pub fn enable_fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware = Some(Arc::new(middleware));
        self
    }
}

impl fmt::Debug for MockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockOptions")
            .field("enable_fallback", &self.enable_fallback)
            .field("middleware", &self.middleware.is_some())
            .field("log_matches", &self.log_matches)
            .field("log_unmatched", &self.log_unmatched)
            .finish()
    }
}

/// Dispatch counters.
#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    matched: AtomicU64,
    fallbacks: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub calls: u64,
    pub matched: u64,
    pub fallbacks: u64,
    pub failed: u64,
}

/// The installed interceptor: matches, resolves and delivers.
struct Dispatcher {
    registry: Arc<Registry>,
    options: MockOptions,
    real: Arc<dyn Fetch>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    async fn deliver(
        &self,
        route: &RouteDefinition,
        args: &HandlerArgument,
    ) -> Result<ResponseDescriptor, MockError> {
        let resolved = resolve(&route.handler, args).await?;
        match &self.options.middleware {
            Some(middleware) => middleware.apply(args, resolved).await,
            None => Ok(resolved),
        }
    }
}

#[async_trait]
impl Fetch for Dispatcher {
    async fn fetch(&self, request: Request) -> Result<Response, MockError> {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        let Some(route) = self.registry.find(&request) else {
            if self.options.enable_fallback {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                if self.options.log_unmatched {
                    info!(
                        method = %request.method,
                        url = %request.url,
                        "No matching route, forwarding to real transport"
                    );
                }
                let forwarded = self.real.fetch(request).await;
                if forwarded.is_err() {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                return forwarded;
            }

            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            if self.options.log_unmatched {
                warn!(method = %request.method, url = %request.url, "No matching route found");
            }
            return Err(MockError::NoMatchingRoute { url: request.url });
        };

        self.counters.matched.fetch_add(1, Ordering::Relaxed);
        if self.options.log_matches {
            info!(method = %request.method, url = %request.url, "Request matched route");
        }

        let args = HandlerArgument::extract(&request, route.matcher());
        match self.deliver(&route, &args).await {
            Ok(descriptor) => {
                debug!(status = descriptor.status, url = %request.url, "Delivering mocked response");
                Ok(descriptor.into_response())
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }
}

/// Handle to an installed mock.
///
/// Created by [`FetchMock::configure`], which installs interception on the
/// client. [`FetchMock::restore`] detaches it and clears all routes.
pub struct FetchMock {
    client: Arc<FetchClient>,
    dispatcher: Arc<dyn Fetch>,
    registry: Arc<Registry>,
    counters: Arc<Counters>,
    engine: Arc<TemplateEngine>,
}

impl FetchMock {
    /// Install interception on `client` with an empty route list.
    pub fn configure(client: &Arc<FetchClient>, options: MockOptions) -> Self {
        let registry = Arc::new(Registry::default());
        let counters = Arc::new(Counters::default());

        info!(
            enable_fallback = options.enable_fallback,
            middleware = options.middleware.is_some(),
            "Installing request interception"
        );

        let dispatcher: Arc<dyn Fetch> = Arc::new(Dispatcher {
            registry: Arc::clone(&registry),
            options,
            real: client.real(),
            counters: Arc::clone(&counters),
        });
        client.install(Arc::clone(&dispatcher));

        Self {
            client: Arc::clone(client),
            dispatcher,
            registry,
            counters,
            engine: Arc::new(TemplateEngine::new()),
        }
    }

    /// Install interception from a configuration document and load its routes.
    pub fn from_config(client: &Arc<FetchClient>, config: &MockConfig) -> Result<Self, MockError> {
        config.validate()?;

        let mut options = MockOptions::from_settings(&config.settings);
        if let Some(mw) = &config.middleware {
            options = options.middleware(mw.build());
        }

        let mock = Self::configure(client, options);
        mock.load(&config.routes)?;
        Ok(mock)
    }

    /// Register declarative routes in order.
    ///
    /// All routes are built before any is registered: a malformed route
    /// leaves the registry untouched.
    pub fn load(&self, routes: &[RouteConfig]) -> Result<(), MockError> {
        let mut built = Vec::with_capacity(routes.len());
        for (i, route) in routes.iter().enumerate() {
            let matcher = route
                .matcher()
                .map_err(|e| MockError::InvalidRouteInput(format!("route {}: {}", i, e)))?;
            built.push(RouteDefinition::new(Arc::new(matcher), route.handler(&self.engine)));
        }

        for (route, definition) in routes.iter().zip(built) {
            debug!(
                name = route.name.as_deref().unwrap_or("-"),
                method = route.method.as_deref().unwrap_or("*"),
                url = %route.url,
                "Registering route"
            );
            self.registry.push(definition);
        }
        info!(routes = routes.len(), "Loaded declarative routes");
        Ok(())
    }

    /// Register a route for an arbitrary matcher.
    pub fn mock(&self, matcher: impl Match + 'static, handler: impl Into<Handler>) -> &Self {
        self.registry
            .push(RouteDefinition::new(Arc::new(matcher), handler.into()));
        self
    }

    /// Register a route for `method` and a URL pattern or matcher.
    pub fn route(
        &self,
        method: &str,
        target: impl Into<RouteTarget>,
        handler: impl Into<Handler>,
    ) -> Result<&Self, MockError> {
        let target = target.into().into_matcher()?;
        let matcher = matcher::combine([
            Arc::new(matcher::method(method)) as Arc<dyn Match>,
            target,
        ]);
        Ok(self.mock(matcher, handler))
    }

    pub fn get(
        &self,
        target: impl Into<RouteTarget>,
        handler: impl Into<Handler>,
    ) -> Result<&Self, MockError> {
        self.route("GET", target, handler)
    }

    pub fn post(
        &self,
        target: impl Into<RouteTarget>,
        handler: impl Into<Handler>,
    ) -> Result<&Self, MockError> {
        self.route("POST", target, handler)
    }

    pub fn put(
        &self,
        target: impl Into<RouteTarget>,
        handler: impl Into<Handler>,
    ) -> Result<&Self, MockError> {
        self.route("PUT", target, handler)
    }

    pub fn delete(
        &self,
        target: impl Into<RouteTarget>,
        handler: impl Into<Handler>,
    ) -> Result<&Self, MockError> {
        self.route("DELETE", target, handler)
    }

    pub fn head(
        &self,
        target: impl Into<RouteTarget>,
        handler: impl Into<Handler>,
    ) -> Result<&Self, MockError> {
        self.route("HEAD", target, handler)
    }

    /// Number of registered routes.
    pub fn routes(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> MockStats {
        MockStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Drop every registered route and detach interception.
    ///
    /// Only this handle's dispatcher is detached; if another mock has been
    /// configured on the client since, it stays installed.
    pub fn restore(&self) {
        self.registry.clear();
        if self.client.restore_if(&self.dispatcher) {
            info!("Request interception restored");
        } else {
            debug!("Interception owned by a newer mock, leaving it installed");
        }
    }
}

impl fmt::Debug for FetchMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchMock")
            .field("routes", &self.registry.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
