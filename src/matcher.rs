//! Request matching logic.
//!
//! A route is eligible for a call when its [`Match`] implementation accepts
//! the [`Request`]. Built-in matchers cover URL patterns and HTTP methods;
//! any `Fn(&Request) -> bool` closure works as a custom matcher.

use crate::error::MockError;
use crate::fetch::{split_url, Request};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a request is eligible for a route.
pub trait Match: Send + Sync {
    fn matches(&self, request: &Request) -> bool;

    /// Path parameters this matcher binds for `url`.
    ///
    /// Matchers that do not look at the path contribute nothing.
    fn path_params(&self, _url: &str) -> HashMap<String, String> {
        HashMap::new()
    }
}

impl<F> Match for F
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    fn matches(&self, request: &Request) -> bool {
        self(request)
    }
}

/// Matches the path portion of the URL against a pattern.
///
/// `*` on its own accepts every URL. Any other pattern is compared segment
/// by segment; `:name` segments bind the corresponding URL segment.
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    pattern: String,
    template: Option<PathTemplate>,
}

#[derive(Debug, Clone)]
struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    fn parse(pattern: &str) -> Result<Self, MockError> {
        let mut segments = Vec::new();
        let mut seen = Vec::new();

        for segment in pattern.split('/') {
            match segment.strip_prefix(':') {
                Some("") => {
                    return Err(MockError::InvalidMatcherInput(format!(
                        "unnamed parameter in pattern '{}'",
                        pattern
                    )));
                }
                Some(name) => {
                    if seen.contains(&name) {
                        return Err(MockError::InvalidMatcherInput(format!(
                            "parameter '{}' appears twice in pattern '{}'",
                            name, pattern
                        )));
                    }
                    seen.push(name);
                    segments.push(TemplateSegment::Param(name.to_string()));
                }
                None => segments.push(TemplateSegment::Literal(segment.to_string())),
            }
        }

        Ok(Self { segments })
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                TemplateSegment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        Some(params)
    }
}

impl UrlMatcher {
    /// Compile a URL pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self, MockError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(MockError::InvalidMatcherInput(
                "url pattern cannot be empty".to_string(),
            ));
        }

        let template = if pattern == "*" {
            None
        } else {
            Some(PathTemplate::parse(split_url(&pattern).0)?)
        };

        Ok(Self { pattern, template })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn capture(&self, url: &str) -> Option<HashMap<String, String>> {
        match &self.template {
            None => Some(HashMap::new()),
            Some(template) => template.matches(split_url(url).0),
        }
    }
}

impl Match for UrlMatcher {
    fn matches(&self, request: &Request) -> bool {
        self.capture(&request.url).is_some()
    }

    fn path_params(&self, url: &str) -> HashMap<String, String> {
        self.capture(url).unwrap_or_default()
    }
}

/// Case-insensitive HTTP method comparison.
#[derive(Debug, Clone)]
pub struct MethodMatcher(String);

impl MethodMatcher {
    pub fn new(method: impl AsRef<str>) -> Self {
        Self(method.as_ref().to_uppercase())
    }
}

impl Match for MethodMatcher {
    fn matches(&self, request: &Request) -> bool {
        request.method.to_uppercase() == self.0
    }
}

/// Logical AND over an ordered list of matchers.
#[derive(Clone, Default)]
pub struct AllOf {
    matchers: Vec<Arc<dyn Match>>,
}

impl AllOf {
    pub fn new(matchers: Vec<Arc<dyn Match>>) -> Self {
        Self { matchers }
    }

    /// Append another matcher to the conjunction.
    pub fn and(mut self, matcher: impl Match + 'static) -> Self {
        self.matchers.push(Arc::new(matcher));
        self
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl fmt::Debug for AllOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllOf")
            .field("matchers", &self.matchers.len())
            .finish()
    }
}

impl Match for AllOf {
    fn matches(&self, request: &Request) -> bool {
        self.matchers.iter().all(|m| m.matches(request))
    }

    fn path_params(&self, url: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        for matcher in &self.matchers {
            params.extend(matcher.path_params(url));
        }
        params
    }
}

/// Build a URL-pattern matcher.
pub fn url(pattern: impl Into<String>) -> Result<UrlMatcher, MockError> {
    UrlMatcher::new(pattern)
}

/// Build a method matcher.
pub fn method(method: impl AsRef<str>) -> MethodMatcher {
    MethodMatcher::new(method)
}

/// Combine matchers with logical AND, evaluated left to right.
pub fn combine<I>(matchers: I) -> AllOf
where
    I: IntoIterator<Item = Arc<dyn Match>>,
{
    AllOf::new(matchers.into_iter().collect())
}
