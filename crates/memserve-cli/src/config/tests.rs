#[cfg(test)]
mod tests {
    use crate::cli::Cli;
    use crate::config::*;
    use crate::error::{CliError, ConfigError};
    use clap::Parser;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["memserve"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(snake_to_camel("reload_time"), "reloadTime");
        assert_eq!(snake_to_camel("RELOAD_TIME"), "reloadTime");
        assert_eq!(snake_to_camel("port"), "port");
        assert_eq!(snake_to_camel("https__key"), "https__key");
        assert_eq!(snake_to_camel("heartbeat_interval"), "heartbeatInterval");
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(std::path::Path::new("a.json")).unwrap(),
            ConfigFormat::Json
        );
        assert_eq!(
            ConfigFormat::from_path(std::path::Path::new("a.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(matches!(
            ConfigFormat::from_path(std::path::Path::new("a.yaml")),
            Err(CliError::Config(ConfigError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = ProjectConfig::load(&parse(&[]), temp.path()).unwrap();

        assert!(config.file.is_none());
        assert_eq!(config.settings.port, 7777);
        assert_eq!(config.settings.dir, "dist");
        assert_eq!(config.settings.source, temp.path().join("dist"));
        assert!(!config.settings.reload);
        assert!(config.routes.mock.is_empty());
    }

    #[test]
    #[serial]
    fn test_file_layer_and_route_order() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("memserve.config.json"),
            r#"{
                "source": "build",
                "port": 8080,
                "reload": true,
                "reloadTime": 100,
                "mock": {
                    "GET /zeta": "z",
                    "/alpha": [1, 2],
                    "POST /mid": { "ok": true }
                },
                "proxy": {
                    "/api": { "target": "http://127.0.0.1:9000" }
                }
            }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(&parse(&[]), temp.path()).unwrap();
        assert_eq!(config.settings.port, 8080);
        assert_eq!(config.settings.reload_time, 100);
        assert!(config.settings.reload);
        assert_eq!(config.settings.source, temp.path().join("build"));

        let specs: Vec<&str> = config.routes.mock.keys().map(String::as_str).collect();
        assert_eq!(specs, vec!["GET /zeta", "/alpha", "POST /mid"]);

        let server = config.to_server_config().unwrap();
        assert_eq!(server.mock.len(), 3);
        assert!(server.proxy.contains_key("/api"));
    }

    #[test]
    #[serial]
    fn test_toml_file() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("memserve.config.toml"),
            r#"
port = 9000
dir = "/site"

[mock]
"GET /b" = "second"
"GET /a" = "first"
"#,
        )
        .unwrap();

        let config = ProjectConfig::load(&parse(&[]), temp.path()).unwrap();
        assert_eq!(config.settings.port, 9000);
        assert_eq!(config.settings.dir, "/site");
        let specs: Vec<&str> = config.routes.mock.keys().map(String::as_str).collect();
        assert_eq!(specs, vec!["GET /b", "GET /a"]);
    }

    #[test]
    #[serial]
    fn test_cli_overrides_file() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("memserve.config.json"),
            r#"{ "port": 8080, "reload": true }"#,
        )
        .unwrap();

        let config =
            ProjectConfig::load(&parse(&["--port", "9999", "--no-reload"]), temp.path()).unwrap();
        assert_eq!(config.settings.port, 9999);
        assert!(!config.settings.reload);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_but_not_cli() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("memserve.config.json"),
            r#"{ "port": 8080, "reloadTime": 300 }"#,
        )
        .unwrap();

        unsafe {
            std::env::set_var("MEMSERVE_RELOAD_TIME", "50");
            std::env::set_var("MEMSERVE_PORT", "8181");
        }
        let from_env = ProjectConfig::load(&parse(&[]), temp.path());
        let from_cli = ProjectConfig::load(&parse(&["--port", "9191"]), temp.path());
        unsafe {
            std::env::remove_var("MEMSERVE_RELOAD_TIME");
            std::env::remove_var("MEMSERVE_PORT");
        }

        let from_env = from_env.unwrap();
        assert_eq!(from_env.settings.reload_time, 50);
        assert_eq!(from_env.settings.port, 8181);
        assert_eq!(from_cli.unwrap().settings.port, 9191);
    }

    #[test]
    #[serial]
    fn test_explicit_missing_config_is_error() {
        let temp = TempDir::new().unwrap();
        let err = ProjectConfig::load(&parse(&["--config", "nope.json"]), temp.path()).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::NotFound(_))));
    }

    #[test]
    #[serial]
    fn test_bad_value_names_field() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("memserve.config.json"),
            r#"{ "port": "not a port" }"#,
        )
        .unwrap();

        let err = ProjectConfig::load(&parse(&[]), temp.path()).unwrap_err();
        match err {
            CliError::Config(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "port"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    #[serial]
    fn test_invalid_route_rejected_by_validation() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("memserve.config.json"),
            r#"{ "mock": { "GET /@@/memserve/client.js": "x" } }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(&parse(&[]), temp.path()).unwrap();
        assert!(matches!(config.to_server_config(), Err(CliError::Server(_))));
    }
}
