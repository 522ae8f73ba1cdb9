//! Declarative mock routes.
//!
//! Each rule is declared as `"[METHOD] PATH" -> responder`. Rules are parsed
//! once at startup, kept in declaration order, and the first rule whose verb
//! and path pattern match a request answers it, ahead of static serving.

use crate::error::{Result, ServerError};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Largest request body a callable responder receives.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Boxed callable responder.
pub type MockHandler = Arc<dyn Fn(MockContext) -> BoxFuture<'static, Response> + Send + Sync>;

/// What a mock rule answers with.
#[derive(Clone)]
pub enum Responder {
    /// Fixed body; JSON for arrays/objects/numbers/bools, text for strings,
    /// `204 No Content` for null
    Static(Value),
    /// Handler that builds the whole response
    Callable(MockHandler),
}

impl Responder {
    /// Wrap an async function as a responder.
    pub fn callable<F, Fut>(handler: F) -> Self
    where
        F: Fn(MockContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Responder::Callable(Arc::new(move |ctx| Box::pin(handler(ctx))))
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Responder::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Responder::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

// Config files can only carry values; callables come from the builder API.
impl<'de> Deserialize<'de> for Responder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Responder::Static)
    }
}

/// Request data handed to a callable responder.
#[derive(Debug, Clone)]
pub struct MockContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Values captured by `:name` and `*` segments
    pub params: IndexMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MockContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Parse the request body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// HTTP verbs a rule may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// Any method
    All,
}

impl Verb {
    /// Parse a verb token, case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "get" => Some(Verb::Get),
            "post" => Some(Verb::Post),
            "put" => Some(Verb::Put),
            "patch" => Some(Verb::Patch),
            "delete" | "del" => Some(Verb::Delete),
            "head" => Some(Verb::Head),
            "options" => Some(Verb::Options),
            "all" => Some(Verb::All),
            _ => None,
        }
    }

    /// GET rules also answer HEAD.
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Verb::Get => method == Method::GET || method == Method::HEAD,
            Verb::Post => method == Method::POST,
            Verb::Put => method == Method::PUT,
            Verb::Patch => method == Method::PATCH,
            Verb::Delete => method == Method::DELETE,
            Verb::Head => method == Method::HEAD,
            Verb::Options => method == Method::OPTIONS,
            Verb::All => true,
        }
    }
}

/// Split a rule declaration into verb and path.
///
/// `"POST /a"` is a POST rule, `"/a"` is a GET rule, and an unknown verb
/// falls back to GET. Returns `None` for a blank declaration.
pub fn parse_spec(spec: &str) -> Option<(Verb, String)> {
    let mut tokens = spec.split_whitespace();
    let first = tokens.next()?;

    match tokens.next() {
        None => Some((Verb::Get, first.to_string())),
        Some(path) => {
            let verb = Verb::parse(first).unwrap_or_else(|| {
                tracing::warn!(spec, verb = first, "unsupported mock verb, using GET");
                Verb::Get
            });
            Some((verb, path.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// Captures the remainder of the path
    Rest(String),
}

/// Path pattern with `:name` / `{name}` parameters and a trailing `*` /
/// `{*name}` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.len().saturating_sub(1);

        let segments = parts
            .iter()
            .enumerate()
            .map(|(i, part)| {
                if i == last {
                    if *part == "*" {
                        return Segment::Rest("*".to_string());
                    }
                    if let Some(name) = part.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                        return Segment::Rest(name.to_string());
                    }
                }
                if let Some(name) = part.strip_prefix(':') {
                    return Segment::Param(name.to_string());
                }
                if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    return Segment::Param(name.to_string());
                }
                Segment::Literal((*part).to_string())
            })
            .collect();

        Self { segments }
    }

    /// Match `path`, returning captured parameters.
    ///
    /// A single trailing slash on the request is ignored. Literals match the
    /// raw segment, captured values are percent-decoded.
    pub fn matches(&self, path: &str) -> Option<IndexMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = IndexMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest(name) => {
                    let rest: Vec<String> = parts
                        .get(i..)
                        .unwrap_or_default()
                        .iter()
                        .map(|part| decode_segment(part))
                        .collect();
                    params.insert(name.clone(), rest.join("/"));
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), decode_segment(value));
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

/// One installed rule.
#[derive(Debug, Clone)]
pub struct MockRule {
    /// The declaration as written
    pub spec: String,
    pub verb: Verb,
    pub pattern: PathPattern,
    pub responder: Responder,
}

/// Ordered mock rules; first match wins.
#[derive(Debug, Clone, Default)]
pub struct MockRouter {
    rules: Vec<MockRule>,
}

impl MockRouter {
    /// Parse every declaration in order.
    pub fn install(rules: &IndexMap<String, Responder>) -> Self {
        let rules = rules
            .iter()
            .filter_map(|(spec, responder)| {
                let (verb, path) = parse_spec(spec)?;
                tracing::debug!(spec = %spec, ?verb, path = %path, "installed mock route");
                Some(MockRule {
                    spec: spec.clone(),
                    verb,
                    pattern: PathPattern::parse(&path),
                    responder: responder.clone(),
                })
            })
            .collect();

        Self { rules }
    }

    pub fn rules(&self) -> &[MockRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching `method` and `path`.
    pub fn find(&self, method: &Method, path: &str) -> Option<(&MockRule, IndexMap<String, String>)> {
        self.rules.iter().find_map(|rule| {
            if !rule.verb.matches(method) {
                return None;
            }
            rule.pattern.matches(path).map(|params| (rule, params))
        })
    }

    /// Answer `request` if a rule claims it, otherwise hand it back.
    pub async fn dispatch(&self, request: Request<Body>) -> std::result::Result<Result<Response>, Request<Body>> {
        let path = request.uri().path().to_string();
        let Some((rule, params)) = self.find(request.method(), &path) else {
            return Err(request);
        };

        tracing::debug!(spec = %rule.spec, path = %path, "mock route matched");

        Ok(match &rule.responder {
            Responder::Static(value) => Ok(static_response(value)),
            Responder::Callable(handler) => {
                let handler = Arc::clone(handler);
                match into_context(request, params).await {
                    Ok(ctx) => Ok(handler(ctx).await),
                    Err(e) => Err(e),
                }
            }
        })
    }
}

async fn into_context(request: Request<Body>, params: IndexMap<String, String>) -> Result<MockContext> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ServerError::HandlerFault(format!("failed to read request body: {}", e)))?;

    Ok(MockContext {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        params,
        headers: parts.headers,
        body,
    })
}

/// Response for a fixed mock value.
pub fn static_response(value: &Value) -> Response {
    match value {
        Value::Null => StatusCode::NO_CONTENT.into_response(),
        Value::String(text) => {
            let content_type = if text.trim_start().starts_with('<') {
                "text/html; charset=utf-8"
            } else {
                "text/plain; charset=utf-8"
            };
            with_content_type(Body::from(text.clone()), content_type)
        }
        other => match serde_json::to_vec(other) {
            Ok(json) => with_content_type(Body::from(json), "application/json; charset=utf-8"),
            Err(e) => ServerError::HandlerFault(e.to_string()).into_response(),
        },
    }
}

fn with_content_type(body: Body, content_type: &'static str) -> Response {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
