//! X.509 certificates: parsing, chain validation and issuance.
//!
//! # Modules
//!
//! - [`chain`]: path validation against the single trusted root (`ChainValidator`)
//! - [`issuer`]: `rcgen`-backed authority, leaf and key pair generation
//!
//! A [`Certificate`] is parsed once and owns everything later stages need
//! (subject, validity, scopes, public key, raw DER), so it can be shared
//! read-only across concurrent validations without re-parsing.

pub mod chain;
pub mod issuer;

pub use chain::{ChainError, ChainValidator, Role};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::keys::PublicKey;
use crate::scope::Scopes;

// ─────────────────────────────────────────────────────────────────────────────
// Certificate
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    common_name: Option<String>,
    organization: Option<String>,
    organizational_unit: Option<String>,
    not_before: i64,
    not_after: i64,
    is_ca: bool,
    scopes: Scopes,
    public_key: PublicKey,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    ///
    /// Fails when the DER is malformed or the subject key is not RSA.
    pub fn from_der(der: &[u8]) -> Result<Self, ChainError> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|e| ChainError::Decode(e.to_string()))?;

        let public_key = PublicKey::from_spki(cert.public_key())?;
        let validity = cert.validity();
        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|bc| bc.value.ca);

        Ok(Self {
            der: der.to_vec(),
            common_name: first_attr(cert.subject().iter_common_name()),
            organization: first_attr(cert.subject().iter_organization()),
            organizational_unit: first_attr(cert.subject().iter_organizational_unit()),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            is_ca,
            scopes: Scopes::from_certificate(&cert),
            public_key,
        })
    }

    /// Parse a standard-base64 DER certificate, as carried in `X-Client-Cert`.
    pub fn from_base64(encoded: &str) -> Result<Self, ChainError> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ChainError::Decode(format!("certificate is not base64: {e}")))?;
        Self::from_der(&der)
    }

    /// Raw DER bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject common name.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Subject organization.
    #[must_use]
    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    /// Subject organizational unit.
    #[must_use]
    pub fn organizational_unit(&self) -> Option<&str> {
        self.organizational_unit.as_deref()
    }

    /// `(not_before, not_after)` as Unix seconds.
    #[must_use]
    pub fn validity(&self) -> (i64, i64) {
        (self.not_before, self.not_after)
    }

    /// Whether `now` (Unix seconds) lies within the validity interval.
    #[must_use]
    pub fn is_valid_at(&self, now: i64) -> bool {
        (self.not_before..=self.not_after).contains(&now)
    }

    /// Basic constraints `cA` flag.
    #[must_use]
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Scopes from the scope extension; empty when absent.
    #[must_use]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Subject public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}

fn first_attr<'a, 'b: 'a>(
    mut attrs: impl Iterator<Item = &'a x509_parser::x509::AttributeTypeAndValue<'b>>,
) -> Option<String> {
    attrs
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}
