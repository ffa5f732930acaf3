//! # probe-fixture
//!
//! Fixture web server for crawlprobe.
//!
//! Serves pre-authored pages for the cluster under test to crawl, one origin
//! per `<server>.<testcase>.<domain>` host name, and records every URL it
//! answered in a [`ServedUrlLog`] so spidering can be asserted afterwards.
//!
//! ## Layout
//!
//! ```text
//! tests/
//!   case1/
//!     README
//!     testcase/           instructions, seeds, expectation files
//!     a/index.html        served as http://a.case1.<domain>:<port>/
//!     a/robots.txt
//!     a/robots.txt.status-code
//! ```
//!
//! With [`FixtureConfig::with_tls`] the same tree is also served over HTTPS
//! on a second port, recorded with the `https` scheme.
//!
//! ## Example
//!
//! ```ignore
//! use probe_fixture::{FixtureConfig, FixtureServer, ServedUrlLog};
//!
//! let log = ServedUrlLog::new();
//! let server = FixtureServer::start(FixtureConfig::new("tests", "http", 28080), log.clone()).await?;
//! // ... run the cluster against it ...
//! println!("{:?}", log.served_urls());
//! server.stop().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod handler;
mod log;
mod tls;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{Extension, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use handler::FixtureState;
pub use log::ServedUrlLog;
pub use tls::TlsConfig;

/// Fixture server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureConfig {
    /// Directory holding one subdirectory per test case.
    pub root: PathBuf,
    /// Scheme recorded in served URLs.
    pub scheme: String,
    /// Port to listen on, also substituted for `${PORT}`.
    pub port: u16,
    /// Address to bind.
    pub bind: String,
    /// Optional HTTPS listener.
    pub tls: Option<TlsConfig>,
}

impl FixtureConfig {
    /// Settings binding all interfaces.
    pub fn new(root: impl Into<PathBuf>, scheme: impl Into<String>, port: u16) -> Self {
        Self {
            root: root.into(),
            scheme: scheme.into(),
            port,
            bind: "0.0.0.0".to_string(),
            tls: None,
        }
    }

    /// Bind a different address.
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Also serve over HTTPS on `port` with a PEM certificate chain and key.
    pub fn with_tls(mut self, port: u16, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            port,
            cert: cert.into(),
            key: key.into(),
        });
        self
    }
}

/// Fixture server errors.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    /// The fixture root does not exist.
    #[error("fixture root {0} is not a directory")]
    MissingRoot(PathBuf),

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address attempted.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The certificate or key could not be loaded.
    #[error("TLS setup failed for {path}: {reason}")]
    Tls {
        /// Certificate or key file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the fixture router. Every request goes to the one fallback handler.
pub fn router(config: &FixtureConfig, log: ServedUrlLog) -> Router {
    listener_router(&config.root, &config.scheme, config.port, log)
}

fn listener_router(root: &Path, scheme: &str, port: u16, log: ServedUrlLog) -> Router {
    let state = Arc::new(FixtureState {
        root: root.to_path_buf(),
        scheme: scheme.to_string(),
        port,
        log,
    });
    Router::new()
        .fallback(handler::serve)
        .layer(Extension(state))
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, FixtureError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| FixtureError::Bind { addr, source })
}

/// A running fixture server.
#[derive(Debug)]
pub struct FixtureServer {
    local_addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    log: ServedUrlLog,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl FixtureServer {
    /// Bind and start serving in background tasks.
    pub async fn start(config: FixtureConfig, log: ServedUrlLog) -> Result<Self, FixtureError> {
        if !tokio::fs::metadata(&config.root).await.is_ok_and(|m| m.is_dir()) {
            return Err(FixtureError::MissingRoot(config.root));
        }

        let acceptor = config.tls.as_ref().map(tls::acceptor).transpose()?;

        let listener = bind(&config.bind, config.port).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        let app = router(&config, log.clone());
        let mut stopped = shutdown.subscribe();
        let mut tasks = vec![tokio::spawn(async move {
            let signal = async move {
                let _ = stopped.changed().await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
                tracing::error!(error = %e, "fixture server failed");
            }
        })];

        let mut tls_addr = None;
        if let (Some(tls), Some(acceptor)) = (&config.tls, acceptor) {
            let listener = bind(&config.bind, tls.port).await?;
            let addr = listener.local_addr()?;
            let app = listener_router(&config.root, "https", config.port, log.clone());
            tasks.push(tokio::spawn(tls::serve(listener, acceptor, app, shutdown.subscribe())));
            tracing::info!(tls_addr = %addr, "fixture server listening for TLS");
            tls_addr = Some(addr);
        }

        tracing::info!(%local_addr, root = %config.root.display(), "fixture server listening");
        Ok(Self {
            local_addr,
            tls_addr,
            log,
            shutdown,
            tasks,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the HTTPS listener, when configured.
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    /// The server's served-URL log.
    pub fn log(&self) -> &ServedUrlLog {
        &self.log
    }

    /// Stop accepting connections and wait for the server tasks to end.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "fixture server task ended abnormally");
            }
        }
        tracing::info!(local_addr = %self.local_addr, "fixture server stopped");
    }
}
