//! HTTP server
//!
//! Plain mode serves `/cert` (signed request) and `/token` (bearer token).
//! mTLS mode serves `/` behind the TLS handshake policy and resolves the
//! caller from the peer certificate. `/health` is always open.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::routing::{MethodRouter, any, get};
use axum::{Json, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::cert::{Certificate, ChainValidator};
use crate::config::Config;
use crate::credentials::CredentialDir;
use crate::keys::{PrivateKey, PublicKey};
use crate::pipeline::{
    AuthPipeline, BearerTokenStage, Greeting, PeerCertificateStage, PeerCertificates, Protected,
    RequireScopes, SignedRequestStage,
};
use crate::signature::NonceCache;
use crate::tls;
use crate::token::TokenValidator;
use crate::{Error, Result};

fn authority_dir(config: &Config) -> CredentialDir {
    CredentialDir::new(&config.credentials.path, &config.credentials.authority)
}

/// Load only the authority certificate, all the mTLS scheme needs.
pub fn load_root(config: &Config) -> Result<Certificate> {
    authority_dir(config).ca_certificate()
}

/// Trust material for the plain routes, loaded once at startup and never
/// mutated.
#[derive(Debug)]
pub struct Trust {
    /// Root of trust
    pub root: Certificate,
    /// Authority public key for token validation
    pub authority_key: PublicKey,
}

impl Trust {
    /// Load the authority certificate and public key.
    pub fn load(config: &Config) -> Result<Self> {
        let dir = authority_dir(config);
        Ok(Self {
            root: dir.ca_certificate()?,
            authority_key: dir.public_key()?,
        })
    }
}

/// The server's own certificate and key, needed for mTLS.
#[derive(Debug)]
pub struct ServerIdentity {
    /// Leaf certificate
    pub cert: Certificate,
    /// Private key
    pub key: PrivateKey,
}

impl ServerIdentity {
    /// Load `<credentials>/<server_identity>/{certificate.crt, private.key}`.
    pub fn load(config: &Config) -> Result<Self> {
        let dir = CredentialDir::new(
            &config.credentials.path,
            &config.credentials.server_identity,
        );
        Ok(Self {
            cert: dir.certificate()?,
            key: dir.private_key()?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

fn with_required_scopes(pipeline: AuthPipeline, config: &Config) -> AuthPipeline {
    if config.server.required_scopes.is_empty() {
        pipeline
    } else {
        pipeline.stage(RequireScopes::new(config.server.required_scopes.clone()))
    }
}

fn protected_route(protected: Protected) -> MethodRouter {
    any(move |request: Request| {
        let protected = protected.clone();
        async move { protected.handle(request).await }
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Routes for the signed-request and bearer-token schemes.
pub fn plain_router(config: &Config, trust: &Trust) -> Result<Router> {
    let validator = Arc::new(
        ChainValidator::new(trust.root.clone())
            .map_err(|e| Error::Startup(format!("Invalid root certificate: {e}")))?,
    );

    let mut signed = SignedRequestStage::new(validator)
        .with_window(config.replay_window())
        .with_uri_scheme(config.server.uri_scheme.clone())
        .with_max_body_bytes(config.server.max_body_bytes);
    if config.replay.nonce_cache.enabled {
        signed = signed.with_nonce_cache(Arc::new(NonceCache::new(
            config.replay.nonce_cache.capacity,
            config.replay_window(),
        )));
        info!(
            capacity = config.replay.nonce_cache.capacity,
            "Nonce cache enabled"
        );
    }

    let tokens = Arc::new(TokenValidator::new(
        &trust.authority_key,
        config.token.audience.as_deref(),
    ));

    let cert_route = Protected::new(
        with_required_scopes(AuthPipeline::new().stage(signed), config),
        Greeting,
    );
    let token_route = Protected::new(
        with_required_scopes(
            AuthPipeline::new().stage(BearerTokenStage::new(tokens)),
            config,
        ),
        Greeting,
    );

    Ok(Router::new()
        .route("/cert", protected_route(cert_route))
        .route("/token", protected_route(token_route))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http()))
}

/// Routes for the mutual-TLS scheme.
///
/// Requests must carry [`PeerCertificates`] in their extensions; the
/// listener in [`serve_mtls`] inserts them.
pub fn mtls_router(config: &Config) -> Router {
    let root = Protected::new(
        with_required_scopes(AuthPipeline::new().stage(PeerCertificateStage), config),
        Greeting,
    );
    Router::new()
        .route("/", protected_route(root))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

// ─────────────────────────────────────────────────────────────────────────────
// Listeners
// ─────────────────────────────────────────────────────────────────────────────

/// Accept TLS connections on `listener` until `shutdown` fires.
///
/// Connections failing the handshake are dropped before any request is
/// read. Each accepted connection is served with the peer's certificates
/// attached to every request.
pub async fn serve_mtls(
    listener: TcpListener,
    router: Router,
    tls_config: ServerConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.recv() => {
                info!("mTLS listener stopping");
                return Ok(());
            }
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "TLS handshake rejected");
                    return;
                }
            };

            let peers = PeerCertificates(Arc::new(
                tls.get_ref()
                    .1
                    .peer_certificates()
                    .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
                    .unwrap_or_default(),
            ));
            debug!(peer = %peer_addr, certs = peers.0.len(), "TLS handshake complete");

            let service = router.map_request(move |mut request: Request<hyper::body::Incoming>| {
                request.extensions_mut().insert(peers.clone());
                request
            });

            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls), TowerToHyperService::new(service))
                .await
            {
                debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        });
    }
}

/// Certificate-scope authorization server
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a server from validated configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Load trust material, bind and serve until SIGINT/SIGTERM.
    ///
    /// Credential problems surface as [`Error::Startup`] before the socket
    /// is bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        if self.config.server.mtls {
            let root = load_root(&self.config)?;
            let identity = ServerIdentity::load(&self.config)?;
            let prefix = self.config.required_scope_prefix();
            let tls_config = tls::server_config(&root, &identity.cert, &identity.key, &prefix)?;
            let router = mtls_router(&self.config);

            let listener = TcpListener::bind(addr).await?;
            info!(%addr, required_scope_prefix = %prefix, "Listening (mTLS)");

            let shutdown_rx = shutdown_tx.subscribe();
            tokio::select! {
                result = serve_mtls(listener, router, tls_config, shutdown_rx) => result?,
                () = shutdown_signal(shutdown_tx) => {}
            }
        } else {
            let trust = Trust::load(&self.config)?;
            let router = plain_router(&self.config, &trust)?;

            let listener = TcpListener::bind(addr).await?;
            info!(%addr, "Listening");
            info!("  GET http://{addr}/cert   (signed request)");
            info!("  GET http://{addr}/token  (bearer token)");

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal(shutdown_tx))
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
