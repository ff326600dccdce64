//! Request argument extraction.
//!
//! Turns a raw [`Request`] plus the matcher that accepted it into the
//! structured [`HandlerArgument`] handed to handlers and middleware.

use crate::fetch::{split_url, Request};
use crate::matcher::Match;
use serde::Serialize;
use std::collections::HashMap;

/// Parsed request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// The raw body was valid JSON
    Json(serde_json::Value),
    /// The raw body, unchanged
    Text(String),
}

impl RequestBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            RequestBody::Json(value) => Some(value),
            RequestBody::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Json(_) => None,
            RequestBody::Text(text) => Some(text),
        }
    }
}

/// Everything a handler gets to see about the intercepted call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HandlerArgument {
    pub url: String,
    pub method: String,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: Option<RequestBody>,
}

impl HandlerArgument {
    /// Build the argument for `request` as accepted by `matcher`.
    pub fn extract(request: &Request, matcher: &dyn Match) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            path_params: find_path_params(&request.url, Some(matcher)),
            query_params: find_query_params(&request.url),
            body: find_body(request.body.as_deref()),
        }
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }
}

/// Path parameters bound by `matcher` for `url`.
pub fn find_path_params(url: &str, matcher: Option<&dyn Match>) -> HashMap<String, String> {
    match matcher {
        Some(matcher) if !url.is_empty() => matcher.path_params(url),
        _ => HashMap::new(),
    }
}

/// Query parameters of `url`. Repeated keys keep the last value.
pub fn find_query_params(url: &str) -> HashMap<String, String> {
    split_url(url)
        .1
        .map(parse_query_string)
        .unwrap_or_default()
}

/// Parse a raw body: JSON when it parses, the raw text otherwise.
pub fn find_body(raw: Option<&str>) -> Option<RequestBody> {
    let raw = raw?;
    Some(match serde_json::from_str(raw) {
        Ok(value) => RequestBody::Json(value),
        Err(_) => RequestBody::Text(raw.to_string()),
    })
}

/// Parse a query string into key-value pairs.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params.insert(urlencoding_decode(key), urlencoding_decode(value));
    }

    params
}

/// Percent-decoding with `+` as space. Invalid escapes are kept verbatim.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{method, url};

    #[test]
    fn test_empty_url_has_no_path_params() {
        assert!(find_path_params("", None).is_empty());
        let matcher = url("/users/:id").unwrap();
        assert!(find_path_params("", Some(&matcher)).is_empty());
    }

    #[test]
    fn test_missing_body_is_none() {
        assert_eq!(find_body(None), None);
    }

    #[test]
    fn test_non_json_body_is_kept_verbatim() {
        assert_eq!(
            find_body(Some("randompayload")),
            Some(RequestBody::Text("randompayload".to_string()))
        );
    }

    #[test]
    fn test_json_body_is_parsed() {
        let body = find_body(Some(r#"{"payload":"my custom payload"}"#)).unwrap();
        assert_eq!(body.as_json().unwrap()["payload"], "my custom payload");
        assert_eq!(body.as_text(), None);
    }

    #[test]
    fn test_parse_query_string() {
        let params = find_query_params("/test?name=abba&age=99");
        assert_eq!(params.get("name"), Some(&"abba".to_string()));
        assert_eq!(params.get("age"), Some(&"99".to_string()));

        let params = find_query_params("/search?name=John%20Doe&q=a+b&flag");
        assert_eq!(params.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(params.get("q"), Some(&"a b".to_string()));
        assert_eq!(params.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_repeated_query_key_last_wins() {
        let params = find_query_params("/x?tag=a&tag=b");
        assert_eq!(params.get("tag"), Some(&"b".to_string()));
    }

    #[test]
    fn test_decode_keeps_invalid_escapes_and_utf8() {
        assert_eq!(urlencoding_decode("100%"), "100%");
        assert_eq!(urlencoding_decode("%zz"), "%zz");
        assert_eq!(urlencoding_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn test_extract_argument() {
        let matcher = url("/test/:id/:app").unwrap();
        let request = Request::post("/test/123/testapp?name=abba&age=99")
            .with_body(r#"{"payload":"x"}"#);
        let args = HandlerArgument::extract(&request, &matcher);

        assert_eq!(args.url, "/test/123/testapp?name=abba&age=99");
        assert_eq!(args.method, "POST");
        assert_eq!(args.path_param("id"), Some("123"));
        assert_eq!(args.path_param("app"), Some("testapp"));
        assert_eq!(args.query_param("age"), Some("99"));
        assert_eq!(args.body.unwrap().as_json().unwrap()["payload"], "x");
    }

    #[test]
    fn test_method_matcher_contributes_no_params() {
        let args = HandlerArgument::extract(&Request::get("/a/b"), &method("GET"));
        assert!(args.path_params.is_empty());
    }
}
