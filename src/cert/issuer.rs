//! Certificate and key issuance.
//!
//! Produces the byte-level artifacts every other module consumes: PKCS#8
//! private keys, PKIX public keys, a self-signed authority certificate and
//! leaf certificates carrying the scope extension. Used by the `issue`
//! CLI commands and by tests to mint fixtures.

use std::time::Duration;

use aws_lc_rs::encoding::AsDer;
use aws_lc_rs::rsa;
use aws_lc_rs::signature::RsaKeyPair;
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose,
    PKCS_RSA_SHA256, PublicKeyData, SanType, SerialNumber, SignatureAlgorithm,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rand::RngExt;
use rcgen::string::Ia5String;
use time::OffsetDateTime;
use tracing::debug;

use crate::keys::{KeyError, PrivateKey, PublicKey};
use crate::scope::{SCOPE_OID_ARCS, Scopes};
use crate::{Error, Result};

/// Organizational unit stamped on every leaf certificate.
pub const LEAF_ORGANIZATIONAL_UNIT: &str = "Client";

// ─────────────────────────────────────────────────────────────────────────────
// Key pairs
// ─────────────────────────────────────────────────────────────────────────────

/// Supported RSA modulus sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySize {
    /// 2048-bit modulus.
    #[default]
    Rsa2048,
    /// 3072-bit modulus.
    Rsa3072,
    /// 4096-bit modulus.
    Rsa4096,
}

impl KeySize {
    /// Map a bit count onto a supported size.
    pub fn from_bits(bits: u32) -> std::result::Result<Self, KeyError> {
        match bits {
            2048 => Ok(Self::Rsa2048),
            3072 => Ok(Self::Rsa3072),
            4096 => Ok(Self::Rsa4096),
            other => Err(KeyError::UnsupportedAlgorithm(format!("RSA-{other}"))),
        }
    }

    fn to_aws(self) -> rsa::KeySize {
        match self {
            Self::Rsa2048 => rsa::KeySize::Rsa2048,
            Self::Rsa3072 => rsa::KeySize::Rsa3072,
            Self::Rsa4096 => rsa::KeySize::Rsa4096,
        }
    }
}

/// A freshly generated key pair in its on-disk encodings.
pub struct GeneratedKeyPair {
    private_der: Vec<u8>,
    public_der: Vec<u8>,
}

impl GeneratedKeyPair {
    /// PKCS#8 `PrivateKeyInfo` DER.
    #[must_use]
    pub fn private_der(&self) -> &[u8] {
        &self.private_der
    }

    /// PKIX `SubjectPublicKeyInfo` DER.
    #[must_use]
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }
}

impl std::fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeyPair").finish_non_exhaustive()
    }
}

/// Generate an RSA key pair.
pub fn generate_key_pair(size: KeySize) -> std::result::Result<GeneratedKeyPair, KeyError> {
    let key_pair =
        RsaKeyPair::generate(size.to_aws()).map_err(|e| KeyError::Malformed(e.to_string()))?;
    let pkcs8 = key_pair
        .as_der()
        .map_err(|e| KeyError::Malformed(e.to_string()))?;
    let private_der = pkcs8.as_ref().to_vec();
    let public_der = rcgen_key_pair(&private_der)?.subject_public_key_info();

    Ok(GeneratedKeyPair {
        private_der,
        public_der,
    })
}

fn rcgen_key_pair(pkcs8: &[u8]) -> std::result::Result<KeyPair, KeyError> {
    KeyPair::from_pkcs8_der_and_sign_algo(&PrivatePkcs8KeyDer::from(pkcs8), &PKCS_RSA_SHA256)
        .map_err(|e| KeyError::Malformed(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate parameters
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for a self-signed authority certificate.
#[derive(Debug, Clone)]
pub struct CaParams {
    /// Subject common name.
    pub common_name: String,
    /// Subject organization.
    pub organization: String,
    /// Serial number.
    pub serial: u64,
    /// Lifetime from now.
    pub validity: Duration,
}

/// Parameters for a leaf certificate.
#[derive(Debug, Clone)]
pub struct LeafParams {
    /// Subject common name, the caller's name.
    pub name: String,
    /// Subject organization.
    pub organization: String,
    /// Scopes embedded in the scope extension.
    pub scopes: Scopes,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// Serial number.
    pub serial: u64,
    /// Lifetime from now.
    pub validity: Duration,
}

/// Default serial: the issuance date as `YYYYMMDD`.
#[must_use]
pub fn date_serial() -> u64 {
    let date = OffsetDateTime::now_utc().date();
    let year = u64::try_from(date.year()).unwrap_or_default();
    year * 10_000 + u64::from(u8::from(date.month())) * 100 + u64::from(date.day())
}

/// Default leaf serial: `YYYYMMDD` followed by a random two-digit suffix
/// offset into `100..199`.
#[must_use]
pub fn leaf_serial() -> u64 {
    date_serial() * 100 + rand::rng().random_range(100..199)
}

// ─────────────────────────────────────────────────────────────────────────────
// Issuance
// ─────────────────────────────────────────────────────────────────────────────

/// Issue a self-signed authority certificate for `key`.
///
/// Returns the certificate DER.
pub fn issue_ca(key: &PrivateKey, params: &CaParams) -> Result<Vec<u8>> {
    let signing_key = rcgen_key_pair(key.pkcs8_der())?;

    let mut cert_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, params.organization.as_str());
    dn.push(DnType::CommonName, params.common_name.as_str());
    cert_params.distinguished_name = dn;
    cert_params.serial_number = Some(SerialNumber::from(params.serial));
    cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    cert_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    cert_params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    set_validity(&mut cert_params, params.validity);

    let cert = cert_params
        .self_signed(&signing_key)
        .map_err(|e| Error::Certificate(format!("CA cert generation failed: {e}")))?;

    debug!(cn = %params.common_name, serial = params.serial, "Issued CA certificate");
    Ok(cert.der().to_vec())
}

/// Issue a leaf certificate for `subject_key`, signed by the authority.
///
/// The scope extension is always emitted, non-critical, even for an empty
/// scope set.
pub fn issue_leaf(
    ca_cert_der: &[u8],
    ca_key: &PrivateKey,
    subject_key: &PublicKey,
    params: &LeafParams,
) -> Result<Vec<u8>> {
    let signing_key = rcgen_key_pair(ca_key.pkcs8_der())?;
    let issuer = Issuer::from_ca_cert_der(&CertificateDer::from(ca_cert_der), signing_key)
        .map_err(|e| Error::Certificate(format!("Failed to parse CA cert: {e}")))?;

    let mut cert_params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, params.organization.as_str());
    dn.push(DnType::OrganizationalUnitName, LEAF_ORGANIZATIONAL_UNIT);
    dn.push(DnType::CommonName, params.name.as_str());
    cert_params.distinguished_name = dn;
    cert_params.serial_number = Some(SerialNumber::from(params.serial));
    cert_params.is_ca = IsCa::NoCa;
    cert_params.key_identifier_method =
        KeyIdMethod::PreSpecified(format!("{}-key-1", params.name).into_bytes());
    cert_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    cert_params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    set_validity(&mut cert_params, params.validity);

    let mut sans = Vec::with_capacity(params.dns_names.len());
    for dns in &params.dns_names {
        let ia5 = Ia5String::try_from(dns.as_str())
            .map_err(|e| Error::Certificate(format!("Invalid DNS SAN '{dns}': {e}")))?;
        sans.push(SanType::DnsName(ia5));
    }
    cert_params.subject_alt_names = sans;

    let mut scope_ext = CustomExtension::from_oid_content(SCOPE_OID_ARCS, params.scopes.encode());
    scope_ext.set_criticality(false);
    cert_params.custom_extensions = vec![scope_ext];

    let cert = cert_params
        .signed_by(&SubjectKey(subject_key), &issuer)
        .map_err(|e| Error::Certificate(format!("Leaf cert signing failed: {e}")))?;

    debug!(
        cn = %params.name,
        scopes = %params.scopes,
        serial = params.serial,
        "Issued leaf certificate"
    );
    Ok(cert.der().to_vec())
}

/// Subject public key handed to rcgen; rcgen wraps it into an SPKI.
struct SubjectKey<'a>(&'a PublicKey);

impl PublicKeyData for SubjectKey<'_> {
    fn der_bytes(&self) -> &[u8] {
        self.0.pkcs1_der()
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        match self.0 {
            PublicKey::Rsa(_) => &PKCS_RSA_SHA256,
        }
    }
}

fn set_validity(params: &mut CertificateParams, validity: Duration) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + validity;
}
