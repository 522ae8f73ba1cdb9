//! Configuration for the memserve CLI.
//!
//! Scalar settings are layered with figment. Priority: CLI > Environment >
//! File > Defaults. Mock and proxy tables are read straight from the config
//! file so their declaration order survives.

mod loading;
mod tests;

use crate::error::Result;
use indexmap::IndexMap;
use memserve::{HttpsConfig, ProxyConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

pub use loading::{CONFIG_FILES, ConfigFormat, find_config_file, snake_to_camel};

/// Settings that can come from any layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Directory on disk mirrored into the store
    pub source: PathBuf,

    /// Virtual serving root
    pub dir: String,

    pub host: IpAddr,

    pub port: u16,

    pub reload: bool,

    /// Client debounce window in milliseconds
    pub reload_time: u64,

    /// Reload heartbeat interval in milliseconds
    pub heartbeat_interval: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<HttpsConfig>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mime_types: HashMap<String, String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            source: PathBuf::from("dist"),
            dir: server.dir,
            host: server.host,
            port: server.port,
            reload: server.reload,
            reload_time: server.reload_time,
            heartbeat_interval: server.heartbeat_interval,
            https: None,
            mime_types: HashMap::new(),
        }
    }
}

/// Ordered route tables from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteTables {
    #[serde(default)]
    pub mock: IndexMap<String, serde_json::Value>,

    #[serde(default)]
    pub proxy: IndexMap<String, ProxyConfig>,
}

/// Everything the serve command needs, fully layered.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub settings: CliConfig,
    pub routes: RouteTables,

    /// Config file that was read, if any
    pub file: Option<PathBuf>,
}

impl ProjectConfig {
    /// Build the server configuration and check it.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let settings = &self.settings;
        let mut config = ServerConfig::new(settings.dir.clone())
            .host(settings.host)
            .port(settings.port)
            .reload(settings.reload)
            .reload_time(settings.reload_time)
            .heartbeat_interval(settings.heartbeat_interval);

        config.https = settings.https.clone();
        for (extension, content_type) in &settings.mime_types {
            config = config.mime_type(extension.clone(), content_type.clone());
        }
        for (spec, value) in &self.routes.mock {
            config = config.mock(spec.clone(), value.clone());
        }
        for (prefix, rule) in &self.routes.proxy {
            config = config.proxy(prefix.clone(), rule.clone());
        }

        config.validate()?;
        Ok(config)
    }
}
