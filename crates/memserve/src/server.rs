//! Development server.
//!
//! Wires the store, reload channel, mock rules and proxy rules into one
//! axum router and serves it over plain TCP or TLS.

use crate::config::{HttpsConfig, ServerConfig};
use crate::error::{Result, ServerError};
use crate::mock::MockRouter;
use crate::port;
use crate::proxy::ProxyDispatcher;
use crate::reload::{handle_upgrade, ReloadChannel, SOCKET_PATH};
use crate::router::{dispatch, panic_response, rewrite_mime, MimeTable, RequestRouter};
use crate::store::{MemoryStore, SharedStore};
use axum::routing::get;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower_http::catch_panic::CatchPanicLayer;

/// State shared by every request handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub reload: Option<ReloadChannel>,
    pub files: Arc<RequestRouter>,
    pub mocks: Arc<MockRouter>,
    pub proxy: Arc<ProxyDispatcher>,
}

/// A configured, not yet listening, dev server.
pub struct DevServer {
    config: ServerConfig,
    store: SharedStore,
    mime: Arc<MimeTable>,
    state: AppState,
}

impl DevServer {
    /// Validate `config` and build every component.
    ///
    /// # Errors
    ///
    /// Returns `Config` if validation fails or a proxy rule cannot be
    /// compiled.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let reload = config.reload.then(|| ReloadChannel::new(config.heartbeat()));

        let mut store = MemoryStore::new(&config.dir);
        if let Some(channel) = &reload {
            store = store.with_reload(channel.clone());
        }
        let store = Arc::new(store);

        let mime = Arc::new(MimeTable::new(&config.mime_types));
        let files = RequestRouter::new(
            Arc::clone(&store),
            Arc::clone(&mime),
            config.reload,
            config.reload_time,
        );

        let state = AppState {
            reload,
            files: Arc::new(files),
            mocks: Arc::new(MockRouter::install(&config.mock)),
            proxy: Arc::new(ProxyDispatcher::install(&config.proxy)?),
        };

        Ok(Self {
            config,
            store,
            mime,
            state,
        })
    }

    /// The store this server reads from.
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// The reload channel, when reload is enabled.
    pub fn reload_channel(&self) -> Option<&ReloadChannel> {
        self.state.reload.as_ref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The complete request pipeline.
    pub fn router(&self) -> Router {
        let mut app = Router::new();
        if self.state.reload.is_some() {
            app = app.route(SOCKET_PATH, get(handle_upgrade));
        }

        app.fallback(dispatch)
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.mime),
                rewrite_mime,
            ))
            .layer(CatchPanicLayer::custom(panic_response))
            .with_state(self.state.clone())
    }

    /// Bind and start serving in the background.
    ///
    /// The configured port is probed first (see [`port::allocate_on`]); port
    /// `0` asks the OS for any free port.
    ///
    /// # Errors
    ///
    /// - `TlsMaterialMissing` if a configured key or certificate cannot be read
    /// - `TlsConfig` if they cannot be parsed
    /// - `BindFailure` if the chosen port cannot be bound
    pub async fn listen(self) -> Result<RunningServer> {
        let tls = match &self.config.https {
            Some(https) => Some(load_tls(https).await?),
            None => None,
        };

        let host = self.config.host;
        let port = if self.config.port == 0 {
            0
        } else {
            port::allocate_on(host, self.config.port, &HashSet::new())
        };

        let addr = SocketAddr::new(host, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailure { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = self
            .state
            .reload
            .as_ref()
            .map(|channel| channel.spawn_heartbeat(shutdown_rx.clone()));

        let app = self.router();
        let scheme = if tls.is_some() { "https" } else { "http" };

        let task = match tls {
            Some(acceptor) => tokio::spawn(serve_tls(listener, acceptor, app, shutdown_rx)),
            None => tokio::spawn(serve_plain(listener, app, shutdown_rx)),
        };

        print_running(scheme, local_addr.port());

        Ok(RunningServer {
            local_addr,
            scheme,
            store: self.store,
            reload: self.state.reload,
            shutdown_tx,
            task,
            heartbeat,
        })
    }
}

/// Handle to a listening server.
pub struct RunningServer {
    local_addr: SocketAddr,
    scheme: &'static str,
    store: SharedStore,
    reload: Option<ReloadChannel>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Loopback URL of the server, e.g. `http://127.0.0.1:7777`.
    pub fn url(&self) -> String {
        format!("{}://127.0.0.1:{}", self.scheme, self.port())
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn reload_channel(&self) -> Option<&ReloadChannel> {
        self.reload.as_ref()
    }

    /// Stop accepting, close reload connections and wait for the serving
    /// task to finish.
    pub async fn shutdown(self) -> Result<()> {
        if let Some(channel) = &self.reload {
            channel.close_all();
        }
        let _ = self.shutdown_tx.send(true);

        if let Some(heartbeat) = self.heartbeat {
            let _ = heartbeat.await;
        }

        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::HandlerFault(format!("server task failed: {}", e))),
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

async fn serve_plain(listener: TcpListener, app: Router, shutdown: watch::Receiver<bool>) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;
    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut connections = tokio::task::JoinSet::new();

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
            // Reap finished connections so the set only holds live ones.
            Some(_) = connections.join_next() => continue,
            _ = wait_for_shutdown(shutdown.clone()) => break,
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls), TowerToHyperService::new(app));
            tokio::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(%peer, error = %e, "connection closed with error");
                    }
                }
                _ = wait_for_shutdown(shutdown) => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.await;
                }
            }
        });
    }

    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Read and parse the configured key and certificate.
async fn load_tls(https: &HttpsConfig) -> Result<TlsAcceptor> {
    let key_pem = read_material(&https.key).await?;
    let cert_pem = read_material(&https.cert).await?;

    let certs = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ServerError::TlsConfig(format!("{}: {}", https.cert.display(), e)))?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig(format!(
            "{}: no certificates found",
            https.cert.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_slice(&key_pem)
        .map_err(|e| ServerError::TlsConfig(format!("{}: {}", https.key.display(), e)))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn read_material(path: &std::path::Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|source| ServerError::TlsMaterialMissing {
            path: path.to_path_buf(),
            source,
        })
}

fn print_running(scheme: &str, port: u16) {
    tracing::info!("Running at:");
    tracing::info!("- Local: {}://127.0.0.1:{}", scheme, port);
    tracing::info!("- Network: {}://{}:{}", scheme, lan_ip(), port);
}

/// Address of the interface that routes outward, or loopback.
///
/// Connecting a UDP socket sends nothing; it only picks a route.
pub fn lan_ip() -> IpAddr {
    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let Ok(socket) = UdpSocket::bind(("0.0.0.0", 0)) else {
        return loopback;
    };
    if socket.connect(("8.8.8.8", 80)).is_err() {
        return loopback;
    }

    match socket.local_addr() {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        _ => loopback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_mock_wins_over_store() {
        let server = DevServer::new(ServerConfig::new("dist").mock("GET /mock/0", json!([0, 1, 2, 3]))).unwrap();
        server.store().write("mock/0", "file contents").unwrap();

        let (status, headers, body) = send(server.router(), Method::GET, "/mock/0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(body, "[0,1,2,3]");
    }

    #[tokio::test]
    async fn test_unclaimed_post_is_method_not_allowed() {
        let server = DevServer::new(ServerConfig::new("dist")).unwrap();
        server.store().write("index.html", "<p></p>").unwrap();

        let (status, headers, _) = send(server.router(), Method::POST, "/index.html").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers[header::ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn test_mime_rewrite_fills_missing_content_type() {
        let server = DevServer::new(ServerConfig::new("dist").mock_fn("GET /data.json", |_ctx| async {
            axum::response::Response::new(Body::from("{}"))
        }))
        .unwrap();

        let (status, headers, _) = send(server.router(), Method::GET, "/data.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("application/json"));
    }

    #[tokio::test]
    async fn test_panicking_mock_becomes_500() {
        async fn explode(_ctx: crate::mock::MockContext) -> axum::response::Response {
            panic!("mock exploded")
        }

        let server = DevServer::new(ServerConfig::new("dist").mock_fn("GET /boom", explode)).unwrap();

        let app = server.router();
        let (status, _, body) = send(app.clone(), Method::GET, "/boom").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.starts_with("<pre style=\"font-size: 14px; white-space: pre-wrap;\">"));
        assert!(body.contains("mock exploded"));

        // Still serving afterwards
        let (status, _, _) = send(app, Method::GET, "/other").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_client_script_only_with_reload() {
        let server = DevServer::new(ServerConfig::new("dist").reload(true).reload_time(100)).unwrap();
        let (status, headers, body) = send(server.router(), Method::GET, "/@@/memserve/client.js").await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("application/javascript"));
        assert!(body.contains("reloadTime: 100"));

        let server = DevServer::new(ServerConfig::new("dist")).unwrap();
        let (status, _, _) = send(server.router(), Method::GET, "/@@/memserve/client.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_request_is_served() {
        let server = DevServer::new(ServerConfig::new("dist")).unwrap();
        server.store().write("a.txt", "hello").unwrap();

        let (status, _, _) = send(server.router(), Method::HEAD, "/a.txt").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(DevServer::new(ServerConfig::new("dist").reload_time(0)).is_err());
    }

    #[test]
    fn test_reload_channel_follows_config() {
        assert!(DevServer::new(ServerConfig::new("dist")).unwrap().reload_channel().is_none());
        assert!(
            DevServer::new(ServerConfig::new("dist").reload(true))
                .unwrap()
                .reload_channel()
                .is_some()
        );
    }
}
