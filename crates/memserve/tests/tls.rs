//! HTTPS listener with a generated self-signed certificate.

use memserve::{DevServer, ServerConfig, ServerError};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tempfile::TempDir;

fn write_pair(dir: &TempDir) -> (PathBuf, PathBuf) {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();

    let key = dir.path().join("key.pem");
    let cert_path = dir.path().join("cert.pem");
    fs::write(&key, key_pair.serialize_pem()).unwrap();
    fs::write(&cert_path, cert.pem()).unwrap();
    (key, cert_path)
}

fn loopback(config: ServerConfig) -> ServerConfig {
    config.host(IpAddr::V4(Ipv4Addr::LOCALHOST)).port(0)
}

#[tokio::test]
async fn test_https_serves_store() {
    let temp = TempDir::new().unwrap();
    let (key, cert) = write_pair(&temp);

    let server = DevServer::new(loopback(ServerConfig::new("dist").https(key, cert).reload(true)))
        .unwrap()
        .listen()
        .await
        .unwrap();
    assert!(server.url().starts_with("https://"));
    server.store().write("index.html", "<html></html>").unwrap();

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let response = client
        .get(format!("{}/index.html", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().starts_with("<html></html>"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_many_short_connections_then_clean_shutdown() {
    let temp = TempDir::new().unwrap();
    let (key, cert) = write_pair(&temp);

    let server = DevServer::new(loopback(ServerConfig::new("dist").https(key, cert)))
        .unwrap()
        .listen()
        .await
        .unwrap();
    server.store().write("ping.txt", "pong").unwrap();

    // A fresh client per request, each connection closed when dropped.
    for _ in 0..20 {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .build()
            .unwrap();
        let response = client
            .get(format!("{}/ping.txt", server.url()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "pong");
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), server.shutdown())
        .await
        .expect("shutdown in time")
        .unwrap();
}

#[tokio::test]
async fn test_missing_key_aborts_startup() {
    let temp = TempDir::new().unwrap();
    let (_key, cert) = write_pair(&temp);
    let missing = temp.path().join("nope.pem");

    let result = DevServer::new(loopback(ServerConfig::new("dist").https(&missing, cert)))
        .unwrap()
        .listen()
        .await;

    match result {
        Err(ServerError::TlsMaterialMissing { path, .. }) => assert_eq!(path, missing),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("server started without a key"),
    }
}

#[tokio::test]
async fn test_garbage_certificate_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (key, _cert) = write_pair(&temp);
    let garbage = temp.path().join("garbage.pem");
    fs::write(&garbage, "not a certificate").unwrap();

    let result = DevServer::new(loopback(ServerConfig::new("dist").https(key, garbage)))
        .unwrap()
        .listen()
        .await;

    assert!(matches!(result, Err(ServerError::TlsConfig(_))));
}
