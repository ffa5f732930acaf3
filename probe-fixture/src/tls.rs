//! HTTPS listener.
//!
//! axum only serves plain TCP, so TLS connections are accepted here, wrapped
//! with rustls and handed to a hyper HTTP/1.1 connection running the same
//! router as the plain listener.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use crate::FixtureError;

/// HTTPS listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Port to listen on.
    pub port: u16,
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

fn tls_error(path: &Path, reason: impl ToString) -> FixtureError {
    FixtureError::Tls {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Load the certificate and key into an acceptor.
pub(crate) fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor, FixtureError> {
    let certs = CertificateDer::pem_file_iter(&config.cert)
        .map_err(|e| tls_error(&config.cert, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(&config.cert, e))?;
    if certs.is_empty() {
        return Err(tls_error(&config.cert, "no certificates found"));
    }
    let key = PrivateKeyDer::from_pem_file(&config.key).map_err(|e| tls_error(&config.key, e))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut server = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(&config.cert, e))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(&config.cert, e))?;
    server.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}

/// Accept TLS connections until `shutdown` flips.
pub(crate) async fn serve(listener: TcpListener, acceptor: TlsAcceptor, app: Router, mut shutdown: watch::Receiver<bool>) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, "TLS accept failed");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(%peer, error = %e, "TLS connection ended with error");
            }
        });
    }
}
