//! Dev server configuration types.
//!
//! Passed once to [`DevServer::new`](crate::DevServer::new) and fixed for the
//! server's lifetime. Deserializes from the camelCase shape used by config
//! files (`reloadTime`, `mimeTypes`, ...).

use crate::error::{ConfigError, Result};
use crate::mock::{MockContext, Responder};
use crate::reload::NAMESPACE;
use crate::store::virtual_root;
use axum::response::Response;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to listen on
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Preferred port; the next free one within +10 is used if taken
    #[serde(default = "default_port")]
    pub port: u16,

    /// Virtual serving root
    #[serde(default = "default_dir")]
    pub dir: String,

    #[serde(default)]
    pub https: Option<HttpsConfig>,

    /// Inject the reload client and run the reload channel
    #[serde(default)]
    pub reload: bool,

    /// Client debounce window in milliseconds
    #[serde(default = "default_reload_time")]
    pub reload_time: u64,

    /// Reload heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    /// Mock routes in declaration order: `"[METHOD] PATH" -> responder`
    #[serde(default)]
    pub mock: IndexMap<String, Responder>,

    /// Proxy rules in declaration order: `path prefix -> rule`
    #[serde(default)]
    pub proxy: IndexMap<String, ProxyConfig>,

    /// Extension -> content type overrides
    #[serde(default)]
    pub mime_types: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dir: default_dir(),
            https: None,
            reload: false,
            reload_time: default_reload_time(),
            heartbeat_interval: default_heartbeat_interval(),
            mock: IndexMap::new(),
            proxy: IndexMap::new(),
            mime_types: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpsConfig {
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// Forwarding rule for one path prefix.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProxyConfig {
    /// Upstream origin, e.g. `https://api.example.com`
    pub target: String,

    /// Rewrite `Host` to the upstream authority
    #[serde(default = "default_change_origin")]
    pub change_origin: bool,

    /// Regex -> replacement, applied to the path in order
    #[serde(default)]
    pub path_rewrite: IndexMap<String, String>,

    /// Drop the matched prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,

    /// Extra request headers sent upstream
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

impl ProxyConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            change_origin: default_change_origin(),
            path_rewrite: IndexMap::new(),
            strip_prefix: false,
            headers: IndexMap::new(),
        }
    }

    pub fn strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    pub fn rewrite(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.path_rewrite.insert(pattern.into(), replacement.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn change_origin(mut self, change: bool) -> Self {
        self.change_origin = change;
        self
    }
}

impl ServerConfig {
    /// Configuration serving `dir` with every other option at its default.
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn reload(mut self, enabled: bool) -> Self {
        self.reload = enabled;
        self
    }

    pub fn reload_time(mut self, millis: u64) -> Self {
        self.reload_time = millis;
        self
    }

    pub fn heartbeat_interval(mut self, millis: u64) -> Self {
        self.heartbeat_interval = millis;
        self
    }

    pub fn https(mut self, key: impl Into<PathBuf>, cert: impl Into<PathBuf>) -> Self {
        self.https = Some(HttpsConfig {
            key: key.into(),
            cert: cert.into(),
        });
        self
    }

    /// Add a mock route answering with a fixed value.
    pub fn mock(mut self, spec: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.mock.insert(spec.into(), Responder::Static(value.into()));
        self
    }

    /// Add a mock route answered by `handler`.
    pub fn mock_fn<F, Fut>(mut self, spec: impl Into<String>, handler: F) -> Self
    where
        F: Fn(MockContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.mock.insert(spec.into(), Responder::callable(handler));
        self
    }

    pub fn proxy(mut self, prefix: impl Into<String>, rule: ProxyConfig) -> Self {
        self.proxy.insert(prefix.into(), rule);
        self
    }

    pub fn mime_type(mut self, extension: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.mime_types.insert(extension.into(), content_type.into());
        self
    }

    /// The serving root as a `/`-rooted virtual path.
    pub fn virtual_dir(&self) -> String {
        virtual_root(&self.dir)
    }

    pub fn reload_window(&self) -> Duration {
        Duration::from_millis(self.reload_time)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// Check the configuration before anything is bound.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `dir` is empty
    /// - `reloadTime` or `heartbeatInterval` is zero
    /// - a proxy target is not an absolute http(s) URL or a rewrite pattern
    ///   does not compile
    /// - a mock path or proxy prefix lies inside the reserved namespace
    pub fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            return Err(ConfigError::invalid("dir", "must not be empty").into());
        }

        if self.reload_time == 0 {
            return Err(ConfigError::invalid("reloadTime", "must be greater than 0").into());
        }

        if self.heartbeat_interval == 0 {
            return Err(
                ConfigError::invalid("heartbeatInterval", "must be greater than 0").into(),
            );
        }

        for spec in self.mock.keys() {
            let Some(rule) = crate::mock::parse_spec(spec) else {
                continue;
            };
            if in_namespace(&rule.1) {
                return Err(ConfigError::ReservedPath {
                    kind: "mock",
                    rule: spec.clone(),
                    namespace: NAMESPACE,
                }
                .into());
            }
        }

        for (prefix, rule) in &self.proxy {
            if !prefix.starts_with('/') {
                return Err(ConfigError::InvalidProxy {
                    prefix: prefix.clone(),
                    message: "prefix must start with '/'".to_string(),
                }
                .into());
            }

            if in_namespace(prefix) {
                return Err(ConfigError::ReservedPath {
                    kind: "proxy",
                    rule: prefix.clone(),
                    namespace: NAMESPACE,
                }
                .into());
            }

            let target = reqwest::Url::parse(&rule.target).map_err(|e| ConfigError::InvalidProxy {
                prefix: prefix.clone(),
                message: format!("target '{}': {}", rule.target, e),
            })?;
            if !matches!(target.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidProxy {
                    prefix: prefix.clone(),
                    message: format!("unsupported target scheme '{}'", target.scheme()),
                }
                .into());
            }

            for pattern in rule.path_rewrite.keys() {
                regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidProxy {
                    prefix: prefix.clone(),
                    message: format!("pathRewrite '{}': {}", pattern, e),
                })?;
            }
        }

        Ok(())
    }
}

/// Is `path` at or below the reserved namespace (case-insensitive)?
fn in_namespace(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower == NAMESPACE || lower.starts_with(&format!("{}/", NAMESPACE))
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    7777
}

fn default_dir() -> String {
    "dist".into()
}

fn default_reload_time() -> u64 {
    250
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_change_origin() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.reload_time, 250);
        assert_eq!(config.heartbeat(), Duration::from_secs(30));
        assert!(!config.reload);
        assert_eq!(config.virtual_dir(), "/dist");
    }

    #[test]
    fn test_deserialize_camel_case() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "port": 8080,
                "dir": "build",
                "reload": true,
                "reloadTime": 100,
                "mock": {
                    "GET /mock/0": [0, 1, 2, 3],
                    "/mock/1": { "name": "test", "value": 12 }
                },
                "proxy": {
                    "/api": { "target": "http://127.0.0.1:9000", "pathRewrite": { "^/api": "" } }
                },
                "mimeTypes": { "wasm": "application/wasm" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.virtual_dir(), "/build");
        assert_eq!(config.reload_time, 100);
        let keys: Vec<&String> = config.mock.keys().collect();
        assert_eq!(keys, vec!["GET /mock/0", "/mock/1"]);
        assert!(config.proxy["/api"].change_origin);
        assert_eq!(config.mime_types["wasm"], "application/wasm");
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: std::result::Result<ServerConfig, _> =
            serde_json::from_str(r#"{ "prot": 8080 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_dir() {
        let err = ServerConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_reload_time() {
        let err = ServerConfig::new("dist").reload_time(0).validate().unwrap_err();
        assert!(err.to_string().contains("reloadTime"));
    }

    #[test]
    fn test_validate_rejects_mock_in_namespace() {
        let err = ServerConfig::new("dist")
            .mock("GET /@@/memserve/client.js", "x")
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::ReservedPath { kind: "mock", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_proxy_in_namespace() {
        let err = ServerConfig::new("dist")
            .proxy("/@@/MemServe/ws", ProxyConfig::new("http://localhost:9000"))
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Config(ConfigError::ReservedPath { kind: "proxy", .. })
        ));
    }

    #[test]
    fn test_validate_allows_proxy_containing_namespace() {
        ServerConfig::new("dist")
            .proxy("/", ProxyConfig::new("http://localhost:9000"))
            .validate()
            .unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_proxy_target() {
        let err = ServerConfig::new("dist")
            .proxy("/api", ProxyConfig::new("localhost:9000/x"))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ServerError::Config(ConfigError::InvalidProxy { .. })));

        let err = ServerConfig::new("dist")
            .proxy("/api", ProxyConfig::new("http://localhost").rewrite("([", ""))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("pathRewrite"));
    }
}
