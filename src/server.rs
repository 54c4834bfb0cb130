//! Router composition, TLS listener, and startup plumbing.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::chrome::{InstanceConfig, InstanceManager};
use crate::config::{Config, Mode};
use crate::handlers::shell::ShellAssets;
use crate::handlers::{batch, shell, stream, AppState};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Initializes tracing with an env-filterable console subscriber.
/// `--verbose` turns on frame-level logging for this crate.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,preview_proxy=trace"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Batch mode: one catch-all preview/passthrough handler.
pub fn batch_router(state: AppState) -> Router {
    Router::new().fallback(batch::handle).with_state(state)
}

/// Streaming mode: the update stream plus the shell/passthrough catch-all.
/// Both handlers share the one manager through the router state.
pub fn streaming_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream::handle))
        .fallback(shell::handle)
        .with_state(state)
}

/// Builds the pool and router for `config` and serves it over TLS.
pub async fn run(config: Config) -> Result<(), ServerError> {
    // reqwest also links a rustls provider; make the choice explicit so the
    // server config builder has a process-level default.
    let _ = tokio_rustls::rustls::crypto::aws_lc_rs::default_provider().install_default();

    let manager = InstanceManager::new(InstanceConfig {
        visible: config.use_full_chrome,
        browser_path: None,
    });
    let assets = Arc::new(ShellAssets::load(config.static_dir.as_deref())?);
    let state = AppState::new(manager, assets);

    let router = match config.mode {
        Mode::Batch => batch_router(state),
        Mode::Streaming => streaming_router(state),
    };

    info!(
        "starting {} proxy for {} on port {}",
        config.mode, config.proxy_host, config.port
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    serve_tls(router, addr, &config.cert_file, &config.key_file).await
}

/// Accept loop: TLS handshake per connection, then hand the stream to
/// hyper with the router behind it.
pub async fn serve_tls(
    router: Router,
    addr: SocketAddr,
    cert_file: &Path,
    key_file: &Path,
) -> Result<(), ServerError> {
    let tls_config = load_tls_config(cert_file, key_file)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = TcpListener::bind(addr).await?;
    info!("listening on https://{addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(e) => {
                    debug!("tls handshake with {peer} failed: {e}");
                    return;
                }
            };
            let service = TowerToHyperService::new(router);
            if let Err(e) = ConnectionBuilder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                .await
            {
                debug!("connection from {peer} ended with error: {e}");
            }
        });
    }
}

fn load_tls_config(cert_file: &Path, key_file: &Path) -> Result<ServerConfig, ServerError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_file)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_file)?))?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {}", key_file.display())))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}
