//! Reverse proxy for configured path prefixes.
//!
//! A request whose path starts with a configured prefix is forwarded to the
//! rule's upstream and the upstream response is streamed back unchanged.
//! Such requests never reach the mock or static layers.

use crate::config::ProxyConfig;
use crate::error::{ConfigError, Result};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use indexmap::IndexMap;
use regex::Regex;
use reqwest::Url;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response extension marking an answer that came from an upstream.
///
/// Layers that rewrite responses leave marked responses alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Proxied;

/// One compiled forwarding rule.
#[derive(Debug, Clone)]
pub struct ProxyRule {
    pub prefix: String,
    target: Url,
    change_origin: bool,
    strip_prefix: bool,
    rewrites: Vec<(Regex, String)>,
    headers: HeaderMap,
}

impl ProxyRule {
    /// Compile a configured rule.
    pub fn new(prefix: &str, config: &ProxyConfig) -> Result<Self> {
        let invalid = |message: String| ConfigError::InvalidProxy {
            prefix: prefix.to_string(),
            message,
        };

        let target = Url::parse(&config.target)
            .map_err(|e| invalid(format!("target '{}': {}", config.target, e)))?;

        let rewrites = config
            .path_rewrite
            .iter()
            .map(|(pattern, replacement)| {
                Regex::new(pattern)
                    .map(|re| (re, replacement.clone()))
                    .map_err(|e| invalid(format!("pathRewrite '{}': {}", pattern, e)))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("header '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        Ok(Self {
            prefix: prefix.to_string(),
            target,
            change_origin: config.change_origin,
            strip_prefix: config.strip_prefix,
            rewrites,
            headers,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Path sent upstream for a request path.
    ///
    /// The prefix is stripped first (if configured), then each rewrite
    /// replaces its first match, in declaration order.
    pub fn rewrite_path(&self, path: &str) -> String {
        let mut rewritten = if self.strip_prefix {
            path.strip_prefix(&self.prefix).unwrap_or(path).to_string()
        } else {
            path.to_string()
        };

        for (pattern, replacement) in &self.rewrites {
            rewritten = pattern.replace(&rewritten, replacement.as_str()).into_owned();
        }

        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{}", rewritten)
        }
    }

    /// Upstream URL for a request path and query.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let base = self.target.as_str().trim_end_matches('/');
        match query {
            Some(query) => format!("{}{}?{}", base, self.rewrite_path(path), query),
            None => format!("{}{}", base, self.rewrite_path(path)),
        }
    }

    /// `host[:port]` of the upstream.
    fn authority(&self) -> Option<String> {
        let host = self.target.host_str()?;
        Some(match self.target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

/// Ordered proxy rules sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct ProxyDispatcher {
    rules: Vec<ProxyRule>,
    client: reqwest::Client,
}

impl ProxyDispatcher {
    /// Compile every rule in declaration order.
    pub fn install(rules: &IndexMap<String, ProxyConfig>) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(prefix, config)| {
                let rule = ProxyRule::new(prefix, config)?;
                tracing::debug!(prefix = %prefix, target = %config.target, "installed proxy rule");
                Ok(rule)
            })
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::invalid("proxy", format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { rules, client })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule whose prefix matches `path`.
    pub fn find(&self, path: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Forward `request` if a rule claims it, otherwise hand it back.
    pub async fn dispatch(&self, request: Request<Body>) -> std::result::Result<Response, Request<Body>> {
        match self.find(request.uri().path()) {
            Some(rule) => {
                let mut response = self.forward(rule, request).await;
                response.extensions_mut().insert(Proxied);
                Ok(response)
            }
            None => Err(request),
        }
    }

    async fn forward(&self, rule: &ProxyRule, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let url = rule.upstream_url(parts.uri.path(), parts.uri.query());

        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "failed to read proxied request body");
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
        };

        let mut headers = strip_hop_by_hop(&parts.headers);
        if rule.change_origin {
            headers.remove(header::HOST);
            if let Some(authority) = rule.authority().and_then(|a| HeaderValue::from_str(&a).ok()) {
                headers.insert(header::HOST, authority);
            }
        }
        for (name, value) in &rule.headers {
            headers.insert(name.clone(), value.clone());
        }

        tracing::debug!(method = %parts.method, url = %url, "proxying request");

        let mut upstream = self.client.request(parts.method, &url).headers(headers);
        if !body.is_empty() {
            upstream = upstream.body(body);
        }

        match upstream.send().await {
            Ok(response) => {
                let status = response.status();
                let headers = strip_hop_by_hop(response.headers());
                let mut out = Response::new(Body::from_stream(response.bytes_stream()));
                *out.status_mut() = status;
                *out.headers_mut() = headers;
                out
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "proxy upstream failed");
                (StatusCode::BAD_GATEWAY, format!("proxy error: {}", e)).into_response()
            }
        }
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
