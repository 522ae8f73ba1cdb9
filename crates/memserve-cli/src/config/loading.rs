use crate::cli::Cli;
use crate::config::{CliConfig, ProjectConfig, RouteTables};
use crate::error::{ConfigError, Result};
use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use memserve::HttpsConfig;
use serde::Serialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Config files looked up in the working directory, in order.
pub const CONFIG_FILES: [&str; 2] = ["memserve.config.json", "memserve.config.toml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf()).into()),
        }
    }
}

/// Flags the user actually passed. Unset fields leave lower layers alone.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reload_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    https: Option<HttpsConfig>,
}

impl CliOverrides {
    fn from_cli(cli: &Cli) -> Self {
        let https = match (&cli.https_key, &cli.https_cert) {
            (Some(key), Some(cert)) => Some(HttpsConfig {
                key: key.clone(),
                cert: cert.clone(),
            }),
            _ => None,
        };

        Self {
            source: cli.source.clone(),
            dir: cli.dir.clone(),
            host: cli.host,
            port: cli.port,
            reload: cli.reload_flag(),
            reload_time: cli.reload_time,
            https,
        }
    }
}

/// The config file to read: `explicit` if given, else the first of
/// [`CONFIG_FILES`] present in `cwd`.
pub fn find_config_file(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        if !path.is_file() {
            return Err(ConfigError::NotFound(path).into());
        }
        return Ok(Some(path));
    }

    Ok(CONFIG_FILES
        .iter()
        .map(|name| cwd.join(name))
        .find(|path| path.is_file()))
}

/// `reload_time` -> `reloadTime`. `__` separates nesting levels and is kept.
pub fn snake_to_camel(key: &str) -> String {
    key.split("__")
        .map(|segment| {
            let mut out = String::with_capacity(segment.len());
            let mut upper = false;
            for c in segment.chars() {
                if c == '_' {
                    upper = !out.is_empty();
                } else if upper {
                    out.push(c.to_ascii_uppercase());
                    upper = false;
                } else {
                    out.push(c.to_ascii_lowercase());
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join("__")
}

impl ProjectConfig {
    /// Load configuration for `cli`, resolving files against `cwd`.
    pub fn load(cli: &Cli, cwd: &Path) -> Result<Self> {
        let file = find_config_file(cli.config.as_deref(), cwd)?;

        let mut figment = Figment::new().merge(Serialized::defaults(CliConfig::default()));

        let routes = match &file {
            Some(path) => {
                let format = ConfigFormat::from_path(path)?;
                figment = match format {
                    ConfigFormat::Json => figment.merge(Json::file(path)),
                    ConfigFormat::Toml => figment.merge(Toml::file(path)),
                };
                read_routes(path, format)?
            }
            None => RouteTables::default(),
        };

        // MEMSERVE_PORT, MEMSERVE_RELOAD_TIME, MEMSERVE_HTTPS__KEY, ...
        figment = figment.merge(
            Env::prefixed("MEMSERVE_")
                .lowercase(false)
                .map(|key| snake_to_camel(key.as_str()).into())
                .split("__"),
        );

        figment = figment.merge(Serialized::defaults(CliOverrides::from_cli(cli)));

        let mut settings: CliConfig = figment.extract().map_err(|e| {
            let field = if e.path.is_empty() {
                "configuration".to_string()
            } else {
                e.path.join(".")
            };
            ConfigError::InvalidValue {
                field,
                value: e.to_string(),
                hint: "Check memserve.config.json, MEMSERVE_* variables and flag values"
                    .to_string(),
            }
        })?;

        if settings.source.is_relative() {
            settings.source = cwd.join(&settings.source);
        }

        Ok(Self {
            settings,
            routes,
            file,
        })
    }
}

fn read_routes(path: &Path, format: ConfigFormat) -> Result<RouteTables> {
    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let routes = match format {
        ConfigFormat::Json => {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        }
        ConfigFormat::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
    };
    Ok(routes)
}
