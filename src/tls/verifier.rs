//! Client certificate verifier enforcing the scope-prefix policy.

use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tracing::{debug, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::scope::Scopes;

/// Delegates chain validation to an inner verifier, then requires at least
/// one scope in the peer's leaf certificate to start with `prefix`.
#[derive(Debug)]
pub struct ScopePrefixVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    prefix: String,
}

impl ScopePrefixVerifier {
    /// Wrap `inner` with a scope-prefix requirement.
    pub fn new(inner: Arc<dyn ClientCertVerifier>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Apply the policy to a leaf certificate.
    pub fn check(&self, end_entity: &CertificateDer<'_>) -> Result<(), rustls::Error> {
        let (_, cert) = X509Certificate::from_der(end_entity.as_ref())
            .map_err(|e| rustls::Error::General(format!("failed to parse certificate: {e}")))?;
        let scopes = Scopes::from_certificate(&cert);

        if scopes.has_prefix(&self.prefix) {
            debug!(prefix = %self.prefix, scopes = %scopes, "Peer scope prefix accepted");
            Ok(())
        } else {
            warn!(prefix = %self.prefix, scopes = %scopes, "Peer has no scope with required prefix");
            Err(rustls::Error::General(format!(
                "no scope with prefix '{}'",
                self.prefix
            )))
        }
    }
}

impl ClientCertVerifier for ScopePrefixVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let verified = self
            .inner
            .verify_client_cert(end_entity, intermediates, now)?;
        self.check(end_entity)?;
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
