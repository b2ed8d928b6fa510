//! Mutual TLS policy.
//!
//! [`server_config`] requires a client certificate chaining to the trusted
//! root and, when a prefix is configured, installs [`ScopePrefixVerifier`]
//! so that the handshake itself rejects peers holding no scope with that
//! prefix. [`client_config`] presents the caller's certificate and trusts
//! the same root for the server; it enforces no scope policy of its own.
//!
//! Only TLS 1.3 is offered.
//!
//! ```text
//! TCP connection
//!   → TLS handshake  (webpki chain check, then scope-prefix check)
//!   → peer certificate injected into request extensions
//!   → PeerCertificateStage resolves the Client
//! ```

mod verifier;

pub use verifier::ScopePrefixVerifier;

use std::sync::Arc;

use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::ClientCertVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;

use crate::cert::Certificate;
use crate::keys::PrivateKey;
use crate::{Error, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

fn root_store(root: &Certificate) -> Result<Arc<RootCertStore>> {
    let mut store = RootCertStore::empty();
    store
        .add(CertificateDer::from(root.der().to_vec()))
        .map_err(|e| Error::Startup(format!("Failed to add CA cert to trust store: {e}")))?;
    Ok(Arc::new(store))
}

fn key_der(key: &PrivateKey) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.pkcs8_der().to_vec()))
}

/// Build the server side of mutual TLS.
///
/// An empty `required_scope_prefix` disables the scope check; chain
/// validation still applies.
pub fn server_config(
    root: &Certificate,
    cert: &Certificate,
    key: &PrivateKey,
    required_scope_prefix: &str,
) -> Result<ServerConfig> {
    let provider = provider();
    let webpki = WebPkiClientVerifier::builder_with_provider(root_store(root)?, provider.clone())
        .build()
        .map_err(|e| Error::Startup(format!("Failed to build client verifier: {e}")))?;

    let verifier: Arc<dyn ClientCertVerifier> = if required_scope_prefix.is_empty() {
        webpki
    } else {
        Arc::new(ScopePrefixVerifier::new(webpki, required_scope_prefix))
    };

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![CertificateDer::from(cert.der().to_vec())], key_der(key))
        .map_err(|e| Error::Startup(format!("TLS config error (cert/key mismatch?): {e}")))?;

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cn = ?cert.common_name(),
        required_scope_prefix,
        "mTLS server config built"
    );
    Ok(config)
}

/// Build the client side of mutual TLS.
pub fn client_config(root: &Certificate, cert: &Certificate, key: &PrivateKey) -> Result<ClientConfig> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_root_certificates(root_store(root)?)
        .with_client_auth_cert(vec![CertificateDer::from(cert.der().to_vec())], key_der(key))
        .map_err(|e| Error::Startup(format!("TLS client config error: {e}")))?;

    debug!(client_cn = ?cert.common_name(), "mTLS client config built");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustls::pki_types::ServerName;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::fixtures::{Identity, alice, bob, carol, mallory, primary};

    /// Run a full handshake over an in-memory stream and exchange one
    /// message each way. Returns `[client, server]` results.
    async fn handshake(client: ClientConfig, server: ServerConfig) -> [std::result::Result<(), String>; 2] {
        let (client_stream, server_stream) = tokio::io::duplex(16 * 1024);

        let client = async move {
            let connector = tokio_rustls::TlsConnector::from(Arc::new(client));
            let sni = ServerName::try_from("localhost").map_err(|e| e.to_string())?;
            let mut stream = connector
                .connect(sni, client_stream)
                .await
                .map_err(|e| format!("connect: {e}"))?;
            stream.write_all(b"hello").await.map_err(|e| e.to_string())?;
            stream.shutdown().await.map_err(|e| e.to_string())?;
            let mut resp = Vec::new();
            stream
                .read_to_end(&mut resp)
                .await
                .map_err(|e| format!("read: {e}"))?;
            if resp == b"goodbye" {
                Ok(())
            } else {
                Err(format!("unexpected response {resp:?}"))
            }
        };

        let server = async move {
            let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server));
            let mut stream = acceptor
                .accept(server_stream)
                .await
                .map_err(|e| format!("accept: {e}"))?;
            let mut req = Vec::new();
            stream.read_to_end(&mut req).await.map_err(|e| e.to_string())?;
            stream.write_all(b"goodbye").await.map_err(|e| e.to_string())?;
            stream.shutdown().await.map_err(|e| e.to_string())?;
            Ok(())
        };

        let (c, s) = tokio::join!(client, server);
        [c, s]
    }

    fn server(prefix: &str) -> ServerConfig {
        server_config(&primary().cert, &bob().cert, &bob().key, prefix).unwrap()
    }

    fn client(identity: &Identity) -> ClientConfig {
        client_config(&primary().cert, &identity.cert, &identity.key).unwrap()
    }

    #[tokio::test]
    async fn peer_with_matching_scope_prefix_is_accepted() {
        // GIVEN: alice holds bob.user.read; server requires "bob."
        let [c, s] = handshake(client(alice()), server("bob.")).await;
        // THEN: both sides complete
        assert_eq!(c, Ok(()));
        assert_eq!(s, Ok(()));
    }

    #[tokio::test]
    async fn peer_without_matching_scope_is_rejected() {
        // GIVEN: carol holds only alice.read
        let [_, s] = handshake(client(carol()), server("bob.")).await;
        // THEN: the server aborts the handshake
        assert!(s.is_err());
    }

    #[tokio::test]
    async fn empty_prefix_only_checks_chain() {
        let [c, s] = handshake(client(carol()), server("")).await;
        assert_eq!(c, Ok(()));
        assert_eq!(s, Ok(()));
    }

    #[tokio::test]
    async fn peer_from_other_authority_is_rejected() {
        // GIVEN: mallory's certificate has the right scopes but a rogue issuer
        let config = client_config(&primary().cert, &mallory().cert, &mallory().key).unwrap();
        let [_, s] = handshake(config, server("bob.")).await;
        assert!(s.is_err());
    }

    #[test]
    fn mismatched_server_key_is_startup_error() {
        let err = server_config(&primary().cert, &bob().cert, &alice().key, "").unwrap_err();
        assert!(err.is_startup_fatal());
    }
}
