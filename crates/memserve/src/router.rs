//! Request resolution.
//!
//! Every request that is not a reload socket upgrade lands in [`dispatch`],
//! which tries the reserved namespace, proxy rules, mock rules and finally
//! the in-memory store, in that order.

use crate::error::{Result, ServerError, fault_response};
use crate::proxy::Proxied;
use crate::reload::{NAMESPACE, client_script, injection_snippet};
use crate::server::AppState;
use crate::store::SharedStore;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Built-in extension table; user `mimeTypes` entries override it.
const DEFAULT_MIME_TYPES: &[(&str, &str)] = &[("avifs", "image/avif-sequence")];

/// Extension to content type lookup.
#[derive(Debug, Clone)]
pub struct MimeTable {
    overrides: HashMap<String, String>,
}

impl MimeTable {
    /// Merge `overrides` over the built-in defaults.
    pub fn new(overrides: &HashMap<String, String>) -> Self {
        let mut table: HashMap<String, String> = DEFAULT_MIME_TYPES
            .iter()
            .map(|(ext, mime)| ((*ext).to_string(), (*mime).to_string()))
            .collect();

        for (ext, mime) in overrides {
            table.insert(ext.trim_start_matches('.').to_ascii_lowercase(), mime.clone());
        }

        Self { overrides: table }
    }

    /// Content type for `path`, or `None` when the extension is unknown.
    pub fn classify(&self, path: &str) -> Option<String> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();

        if let Some(mime) = self.overrides.get(&ext) {
            return Some(mime.clone());
        }

        mime_guess::from_ext(&ext).first_raw().map(str::to_string)
    }
}

/// Full `Content-Type` header value for a classified type.
fn content_type_header(mime: &str) -> Option<HeaderValue> {
    let needs_charset = (mime.starts_with("text/") || mime == "application/javascript")
        && !mime.contains("charset");
    if needs_charset {
        HeaderValue::from_str(&format!("{}; charset=utf-8", mime)).ok()
    } else {
        HeaderValue::from_str(mime).ok()
    }
}

fn is_html(mime: &str) -> bool {
    mime.split(';').next().map(str::trim) == Some("text/html")
}

/// Does `path` name the injected reload client?
pub fn is_client_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.starts_with(NAMESPACE) && Path::new(&lower).file_name().and_then(|n| n.to_str()) == Some("client.js")
}

/// Static file resolution against the store.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    store: SharedStore,
    mime: Arc<MimeTable>,
    reload: bool,
    reload_time: u64,
}

impl RequestRouter {
    pub fn new(store: SharedStore, mime: Arc<MimeTable>, reload: bool, reload_time: u64) -> Self {
        Self {
            store,
            mime,
            reload,
            reload_time,
        }
    }

    /// Resolve `path` to a response; never fails.
    ///
    /// `NotFound` becomes an empty 404, any other error a 500 page carrying
    /// its description.
    pub fn serve(&self, path: &str) -> Response {
        match self.resolve(path) {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    /// Resolve `path` against the store.
    ///
    /// # Errors
    ///
    /// `NotFound` if nothing is stored at the path, `HandlerFault` if the
    /// response cannot be composed.
    pub fn resolve(&self, path: &str) -> Result<Response> {
        let path = decode_path(path)?;
        let path = if path == "/" { "/index.html".to_string() } else { path };

        if self.reload && is_client_path(&path) {
            return Ok(self.client());
        }

        let bytes = self.store.read(&path)?;
        let mime = self.mime.classify(&path);

        let body = match mime.as_deref() {
            Some(mime) if self.reload && is_html(mime) => {
                let mut html = String::from_utf8_lossy(&bytes).into_owned();
                html.push_str(&injection_snippet());
                Body::from(html)
            }
            _ => Body::from(bytes),
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        if let Some(value) = mime.as_deref().and_then(content_type_header) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok(response)
    }

    /// The embedded reload client.
    pub fn client(&self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            client_script(self.reload_time),
        )
            .into_response()
    }
}

/// Percent-decode a request path, refusing parent segments.
fn decode_path(raw: &str) -> Result<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| ServerError::NotFound(raw.to_string()))?;

    if decoded.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ServerError::NotFound(raw.to_string()));
    }

    Ok(decoded.into_owned())
}

/// Fallback handler for every request the socket route does not take.
pub(crate) async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    if state.reload.is_some() && is_client_path(&path) {
        return state.files.client();
    }

    let request = match state.proxy.dispatch(request).await {
        Ok(response) => return response,
        Err(request) => request,
    };

    let request = match state.mocks.dispatch(request).await {
        Ok(Ok(response)) => return response,
        Ok(Err(e)) => return e.into_response(),
        Err(request) => request,
    };

    if !matches!(*request.method(), Method::GET | Method::HEAD) {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response();
    }

    state.files.serve(&path)
}

/// Fill in a missing `Content-Type` from the request path's extension.
///
/// Proxied responses pass through untouched.
pub(crate) async fn rewrite_mime(
    State(mime): State<Arc<MimeTable>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    let status = response.status();
    if !status.is_success() || status == StatusCode::NO_CONTENT {
        return response;
    }
    if response.extensions().get::<Proxied>().is_some() {
        return response;
    }

    if !response.headers().contains_key(header::CONTENT_TYPE) {
        if let Some(value) = mime.classify(&path).as_deref().and_then(content_type_header) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }

    response
}

/// Turn a caught handler panic into the 500 page.
pub(crate) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let description = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "request handler panicked".to_string()
    };

    tracing::error!(error = %description, "request handler panicked");
    fault_response(&description)
}
