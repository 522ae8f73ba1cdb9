//! In-memory development server.
//!
//! Build tools write their output into a [`MemoryStore`] instead of onto
//! disk; [`DevServer`] serves it over HTTP(S), answers declared mock routes,
//! forwards proxied prefixes upstream and pushes reload notifications to
//! connected browsers.
//!
//! ```no_run
//! use memserve::{DevServer, ServerConfig};
//!
//! # async fn run() -> memserve::Result<()> {
//! let config = ServerConfig::new("dist")
//!     .reload(true)
//!     .mock("GET /api/ping", "pong");
//!
//! let server = DevServer::new(config)?;
//! let store = server.store();
//! let running = server.listen().await?;
//!
//! store.write("index.html", "<html></html>")?;
//! running.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod mock;
pub mod port;
pub mod proxy;
pub mod reload;
pub mod router;
pub mod server;
pub mod store;

pub use config::{HttpsConfig, ProxyConfig, ServerConfig};
pub use error::{ConfigError, Result, ServerError};
pub use mock::{MockContext, MockRouter, Responder};
pub use port::allocate;
pub use proxy::ProxyDispatcher;
pub use reload::{ReloadChannel, ReloadEvent};
pub use router::{MimeTable, RequestRouter};
pub use server::{DevServer, RunningServer};
pub use store::{MemoryStore, SharedStore, Timestamp, VirtualFile};
