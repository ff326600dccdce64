//! Configuration for the interception engine.
//!
//! Covers dispatch settings, the global middleware chain, and declarative
//! routes that can be loaded from YAML.

use crate::error::MockError;
use crate::matcher::{self, AllOf};
use crate::middleware::{self, Chain};
use crate::response::{self, Handler, ResponseDescriptor};
use crate::template::{TemplateEngine, TemplateResponse};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockConfig {
    /// Dispatch settings
    #[serde(default)]
    pub settings: Settings,

    /// Middleware applied to every matched response
    #[serde(default)]
    pub middleware: Option<MiddlewareConfig>,

    /// Declarative routes, in priority order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl MockConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), MockError> {
        if let Some(mw) = &self.middleware {
            mw.validate()?;
        }
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| MockError::Config(format!("route {}: {}", i, e)))?;
        }
        Ok(())
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Forward unmatched calls to the real transport
    #[serde(default = "default_true")]
    pub enable_fallback: bool,

    /// Log every matched route
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched calls
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Global middleware: an optional delay followed by optional failure injection.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub delay_ms: Option<u64>,

    /// Random failure injection
    #[serde(default)]
    pub failure: Option<FailureConfig>,
}

impl MiddlewareConfig {
    pub fn validate(&self) -> Result<(), MockError> {
        if let Some(failure) = &self.failure {
            if !(0.0..=1.0).contains(&failure.rate) {
                return Err(MockError::Config(format!(
                    "failure rate must be within [0, 1], got {}",
                    failure.rate
                )));
            }
        }
        Ok(())
    }

    /// Build the middleware chain described by this section.
    pub fn build(&self) -> Chain {
        let mut chain = Chain::default();
        if let Some(ms) = self.delay_ms {
            chain = chain.then(middleware::delay(ms));
        }
        if let Some(failure) = &self.failure {
            chain = chain.then(middleware::failure_rate(
                failure.rate,
                Some(failure.error()),
            ));
        }
        chain
    }
}

/// Failure injection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureConfig {
    /// Probability of failing a response (0.0 - 1.0)
    pub rate: f64,

    /// Status of the injected error. Any value is accepted, so injected
    /// failures may use codes outside the HTTP range.
    #[serde(default = "default_error_status")]
    pub status: u16,

    #[serde(default)]
    pub status_text: Option<String>,

    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

fn default_error_status() -> u16 {
    500
}

impl FailureConfig {
    fn error(&self) -> response::PartialResponse {
        response::PartialResponse {
            body: self.body.clone(),
            status: Some(self.status),
            status_text: self.status_text.clone(),
        }
    }
}

/// A declarative route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    /// Optional name, used in logs
    #[serde(default)]
    pub name: Option<String>,

    /// HTTP method to match (any when absent)
    #[serde(default)]
    pub method: Option<String>,

    /// URL pattern (`*`, literal segments, `:name` parameters)
    pub url: String,

    /// Response to return
    #[serde(default)]
    pub response: ResponseConfig,

    /// Response-level delay in milliseconds
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl RouteConfig {
    pub fn validate(&self) -> Result<(), MockError> {
        if let Some(method) = &self.method {
            if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(MockError::Config(format!("invalid method '{}'", method)));
            }
        }
        matcher::url(self.url.as_str())?;
        validate_status(self.response.status)
    }

    /// Matcher for this route: method (if any) and URL pattern.
    pub fn matcher(&self) -> Result<AllOf, MockError> {
        let mut all = AllOf::default();
        if let Some(method) = &self.method {
            all = all.and(matcher::method(method));
        }
        Ok(all.and(matcher::url(self.url.as_str())?))
    }

    /// Handler for this route, rendering templates through `engine`.
    pub fn handler(&self, engine: &Arc<TemplateEngine>) -> Handler {
        let descriptor = ResponseDescriptor {
            body: self.response.body.clone(),
            status: self.response.status,
            status_text: self.response.status_text.clone(),
        };

        let handler = if self.response.template {
            Handler::func(TemplateResponse::new(Arc::clone(engine), descriptor))
        } else {
            Handler::from(descriptor)
        };

        match self.delay_ms {
            Some(ms) if ms > 0 => response::delayed(ms, handler),
            _ => handler,
        }
    }
}

/// Declarative response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseConfig {
    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default = "default_status_text")]
    pub status_text: String,

    #[serde(default)]
    pub body: serde_json::Value,

    /// Render string leaves of the body as Handlebars templates
    #[serde(default)]
    pub template: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            status: default_status(),
            status_text: default_status_text(),
            body: serde_json::Value::Null,
            template: false,
        }
    }
}

fn default_status() -> u16 {
    200
}

fn default_status_text() -> String {
    "OK".to_string()
}

fn validate_status(status: u16) -> Result<(), MockError> {
    if !(100..=599).contains(&status) {
        return Err(MockError::Config(format!("invalid status code: {}", status)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HandlerArgument;
    use crate::fetch::Request;
    use crate::matcher::Match;
    use std::io::Write;

    #[test]
    fn test_parse_simple_route() {
        let yaml = r#"
routes:
  - name: hello-world
    method: GET
    url: /hello
    response:
      body:
        message: "Hello, World!"
"#;
        let config = MockConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].response.status, 200);
        assert_eq!(config.routes[0].response.status_text, "OK");
        assert_eq!(config.routes[0].response.body["message"], "Hello, World!");
        assert!(config.settings.enable_fallback);
    }

    #[test]
    fn test_parse_settings_and_middleware() {
        let yaml = r#"
settings:
  enable_fallback: false
middleware:
  delay_ms: 25
  failure:
    rate: 0.1
    status: 503
routes: []
"#;
        let config = MockConfig::from_yaml(yaml).unwrap();
        assert!(!config.settings.enable_fallback);
        let mw = config.middleware.unwrap();
        assert_eq!(mw.delay_ms, Some(25));
        assert_eq!(mw.failure.as_ref().unwrap().status, 503);
        assert_eq!(mw.build().len(), 2);
    }

    #[test]
    fn test_failure_status_outside_http_range() {
        let yaml = "middleware:\n  failure:\n    rate: 1.0\n    status: 1337\n";
        let config = MockConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.middleware.unwrap().failure.unwrap().status, 1337);

        let bad_route = "routes:\n  - url: /x\n    response:\n      status: 1337\n";
        assert!(MockConfig::from_yaml(bad_route).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let yaml = r#"
settings:
  passthrough: true
"#;
        assert!(MockConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let bad_url = "routes:\n  - url: /users/:\n";
        assert!(MockConfig::from_yaml(bad_url).is_err());

        let bad_status = "routes:\n  - url: /x\n    response:\n      status: 42\n";
        assert!(MockConfig::from_yaml(bad_status).is_err());

        let bad_rate = "middleware:\n  failure:\n    rate: 1.5\n";
        assert!(MockConfig::from_yaml(bad_rate).is_err());

        let bad_method = "routes:\n  - url: /x\n    method: 'G T'\n";
        assert!(MockConfig::from_yaml(bad_method).is_err());
    }

    #[test]
    fn test_route_matcher() {
        let route = RouteConfig {
            name: None,
            method: Some("get".to_string()),
            url: "/users/:id".to_string(),
            response: ResponseConfig::default(),
            delay_ms: None,
        };
        let matcher = route.matcher().unwrap();
        assert!(matcher.matches(&Request::get("/users/1")));
        assert!(!matcher.matches(&Request::post("/users/1")));
    }

    #[tokio::test]
    async fn test_templated_route_handler() {
        let yaml = r#"
routes:
  - method: GET
    url: /users/:id
    response:
      status: 201
      template: true
      body:
        id: "{{path.id}}"
"#;
        let config = MockConfig::from_yaml(yaml).unwrap();
        let route = &config.routes[0];
        let engine = Arc::new(TemplateEngine::new());

        let request = Request::get("/users/42");
        let args = HandlerArgument::extract(&request, &route.matcher().unwrap());
        let desc = response::resolve(&route.handler(&engine), &args).await.unwrap();
        assert_eq!(desc.status, 201);
        assert_eq!(desc.body["id"], "42");
    }

    #[test]
    fn test_default_route_file_is_valid() {
        let config = MockConfig::from_yaml(include_str!("../config/default-routes.yaml")).unwrap();
        assert!(!config.settings.enable_fallback);
        assert_eq!(config.routes.len(), 4);
        assert_eq!(config.routes[3].url, "*");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "routes:\n  - url: '*'\n    response:\n      body: {{ key: value }}").unwrap();

        let config = MockConfig::from_file(file.path()).unwrap();
        assert_eq!(config.routes[0].url, "*");
        assert_eq!(config.routes[0].response.body["key"], "value");
    }
}
