//! Template engine for dynamic responses.
//!
//! Uses Handlebars to render string leaves of a JSON body against the
//! handler argument of the intercepted call.

use crate::error::MockError;
use crate::extract::{HandlerArgument, RequestBody};
use crate::response::{Handler, Respond, ResponseDescriptor};
use async_trait::async_trait;
use handlebars::{
    handlebars_helper, Context, Handlebars, Helper, HelperResult, Output, RenderContext,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    /// Path parameters bound by the route pattern
    pub path: &'a HashMap<String, String>,
    /// Query parameters
    pub query: &'a HashMap<String, String>,
    /// Request method
    pub method: &'a str,
    /// Full request URL
    pub url: &'a str,
    /// Request body when it was not JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    /// Request body when it parsed as JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<&'a serde_json::Value>,
}

impl<'a> TemplateContext<'a> {
    pub fn new(args: &'a HandlerArgument) -> Self {
        Self {
            path: &args.path_params,
            query: &args.query_params,
            method: &args.method,
            url: &args.url,
            body: args.body.as_ref().and_then(RequestBody::as_text),
            json: args.body.as_ref().and_then(RequestBody::as_json),
        }
    }
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Output is JSON, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against the call's argument.
    pub fn render(
        &self,
        template: &str,
        args: &HandlerArgument,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars
            .render_template(template, &TemplateContext::new(args))
    }

    /// Render every templated string inside a JSON value.
    pub fn render_json(
        &self,
        json: &serde_json::Value,
        args: &HandlerArgument,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        self.render_json_value(json, &TemplateContext::new(args))
    }

    fn render_json_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext<'_>,
    ) -> Result<serde_json::Value, handlebars::RenderError> {
        match value {
            serde_json::Value::String(s) if s.contains("{{") => {
                let rendered = self.handlebars.render_template(s, ctx)?;
                Ok(serde_json::Value::String(rendered))
            }
            serde_json::Value::Array(arr) => {
                let rendered: Result<Vec<_>, _> = arr
                    .iter()
                    .map(|v| self.render_json_value(v, ctx))
                    .collect();
                Ok(serde_json::Value::Array(rendered?))
            }
            serde_json::Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler that renders its body template for each call.
pub struct TemplateResponse {
    engine: Arc<TemplateEngine>,
    response: ResponseDescriptor,
}

impl TemplateResponse {
    pub fn new(engine: Arc<TemplateEngine>, response: ResponseDescriptor) -> Self {
        Self { engine, response }
    }
}

#[async_trait]
impl Respond for TemplateResponse {
    async fn respond(&self, args: &HandlerArgument) -> Result<Handler, MockError> {
        let body = self
            .engine
            .render_json(&self.response.body, args)
            .map_err(MockError::handler)?;
        Ok(ResponseDescriptor {
            body,
            ..self.response.clone()
        }
        .into())
    }
}

// Custom Handlebars helpers

handlebars_helper!(upper_helper: |value: str| value.to_uppercase());
handlebars_helper!(lower_helper: |value: str| value.to_lowercase());

handlebars_helper!(json_helper: |raw: str| {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    }
});

fn uuid_helper(
    _: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    // Version 4 layout with the variant bits set
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffff_ffff_ffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn now_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
    out.write(&chrono::Utc::now().format(format).to_string())?;
    Ok(())
}

fn random_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    use rand::Rng;
    let bound = |idx: usize, fallback: i64| {
        h.param(idx)
            .and_then(|v| v.value().as_i64())
            .unwrap_or(fallback)
    };
    let (min, max) = (bound(0, 0), bound(1, 100));
    let value = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    let rendered = match h.param(0).map(|v| v.value()) {
        Some(serde_json::Value::Null) | None => None,
        Some(serde_json::Value::String(s)) if s.is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    out.write(rendered.as_deref().unwrap_or(fallback))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::resolve;
    use serde_json::json;

    fn args_with_path(name: &str, value: &str) -> HandlerArgument {
        let mut args = HandlerArgument::default();
        args.path_params.insert(name.to_string(), value.to_string());
        args
    }

    #[test]
    fn test_simple_template() {
        let engine = TemplateEngine::new();
        let args = args_with_path("id", "123");
        let result = engine.render("User ID: {{path.id}}", &args).unwrap();
        assert_eq!(result, "User ID: 123");
    }

    #[test]
    fn test_query_params() {
        let engine = TemplateEngine::new();
        let mut args = HandlerArgument::default();
        args.query_params.insert("page".to_string(), "1".to_string());

        let result = engine.render("Page: {{query.page}}", &args).unwrap();
        assert_eq!(result, "Page: 1");
    }

    #[test]
    fn test_request_body() {
        let engine = TemplateEngine::new();
        let mut args = HandlerArgument::default();
        args.body = Some(RequestBody::Json(json!({"name": "John"})));
        assert_eq!(engine.render("Name: {{json.name}}", &args).unwrap(), "Name: John");

        args.body = Some(RequestBody::Text("raw".to_string()));
        assert_eq!(engine.render("Body: {{body}}", &args).unwrap(), "Body: raw");
    }

    #[test]
    fn test_uuid_helper() {
        let engine = TemplateEngine::new();
        let result = engine.render("ID: {{uuid}}", &HandlerArgument::default()).unwrap();

        // xxxxxxxx-xxxx-4xxx-xxxx-xxxxxxxxxxxx
        let uuid = &result[4..];
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.chars().nth(8), Some('-'));
    }

    #[test]
    fn test_default_helper() {
        let engine = TemplateEngine::new();
        let result = engine
            .render(
                "Value: {{default query.missing \"default_value\"}}",
                &HandlerArgument::default(),
            )
            .unwrap();
        assert_eq!(result, "Value: default_value");
    }

    #[test]
    fn test_upper_lower_helpers() {
        let engine = TemplateEngine::new();
        let args = args_with_path("name", "John");
        let result = engine
            .render("Upper: {{upper path.name}}, Lower: {{lower path.name}}", &args)
            .unwrap();
        assert_eq!(result, "Upper: JOHN, Lower: john");
    }

    #[test]
    fn test_render_json() {
        let engine = TemplateEngine::new();
        let mut args = args_with_path("id", "123");
        args.method = "GET".to_string();

        let body = json!({
            "id": "{{path.id}}",
            "tags": ["{{method}}", 7],
            "static": "no template"
        });

        let result = engine.render_json(&body, &args).unwrap();
        assert_eq!(result["id"], "123");
        assert_eq!(result["tags"], json!(["GET", 7]));
        assert_eq!(result["static"], "no template");
    }

    #[tokio::test]
    async fn test_template_response_keeps_status() {
        let handler = Handler::func(TemplateResponse::new(
            Arc::new(TemplateEngine::new()),
            ResponseDescriptor {
                body: json!({"name": "User {{path.id}}"}),
                status: 201,
                status_text: "Created".to_string(),
            },
        ));

        let desc = resolve(&handler, &args_with_path("id", "9")).await.unwrap();
        assert_eq!(desc.status, 201);
        assert_eq!(desc.status_text, "Created");
        assert_eq!(desc.body["name"], "User 9");
    }
}
