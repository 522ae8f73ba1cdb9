//! Error types for the in-memory dev server.
//!
//! `ServerError` is what every public operation returns. Request-time
//! failures (`NotFound`, `HandlerFault`) also know how to render themselves
//! as HTTP responses; startup failures (`BindFailure`, `TlsMaterialMissing`)
//! abort [`DevServer::listen`](crate::DevServer::listen).

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Write target is empty or escapes the virtual root
    #[error("invalid virtual path: {0:?}")]
    InvalidPath(String),

    /// Nothing stored at the requested virtual path
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected failure while composing a response
    #[error("{0}")]
    HandlerFault(String),

    #[error("failed to bind {addr}: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read TLS material {}: {source}", .path.display())]
    TlsMaterialMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS material: {0}")]
    TlsConfig(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("{kind} rule '{rule}' collides with the reserved namespace {namespace}")]
    ReservedPath {
        kind: &'static str,
        rule: String,
        namespace: &'static str,
    },

    #[error("invalid proxy rule '{prefix}': {message}")]
    InvalidProxy { prefix: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl ServerError {
    /// HTTP status this error maps to when it escapes a request handler.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::NOT_FOUND {
            return status.into_response();
        }

        tracing::error!(error = %self, "request handler failed");
        fault_response(&self.to_string())
    }
}

/// Render an error description as the 500 page.
pub(crate) fn fault_response(description: &str) -> Response {
    let body = format!(
        "<pre style=\"font-size: 14px; white-space: pre-wrap;\">{}</pre>",
        escape_html(description)
    );

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
