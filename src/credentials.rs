//! On-disk credential layout.
//!
//! ```text
//! <root>/<name>/ca_certificate.crt   authority certificate (DER)
//! <root>/<name>/certificate.crt      leaf certificate (DER)
//! <root>/<name>/private.key          PKCS#8 private key (DER)
//! <root>/<name>/public.pub           SubjectPublicKeyInfo (DER)
//! <root>/<name>/token                bearer token (text)
//! ```
//!
//! Every read is a startup concern: a missing or undecodable file is
//! [`Error::Startup`] and the process must not start serving.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cert::Certificate;
use crate::keys::{PrivateKey, PublicKey};
use crate::{Error, Result};

/// Authority certificate file name.
pub const CA_CERTIFICATE_FILE: &str = "ca_certificate.crt";
/// Leaf certificate file name.
pub const CERTIFICATE_FILE: &str = "certificate.crt";
/// Private key file name.
pub const PRIVATE_KEY_FILE: &str = "private.key";
/// Public key file name.
pub const PUBLIC_KEY_FILE: &str = "public.pub";
/// Token file name.
pub const TOKEN_FILE: &str = "token";

/// One named credential directory under a shared root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDir {
    dir: PathBuf,
}

impl CredentialDir {
    /// `<root>/<name>`.
    pub fn new(root: impl AsRef<Path>, name: &str) -> Self {
        Self {
            dir: root.as_ref().join(name),
        }
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of `file` inside the directory.
    #[must_use]
    pub fn file(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.file(file);
        let bytes = fs::read(&path)
            .map_err(|e| Error::Startup(format!("Failed to read {}: {e}", path.display())))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Read credential");
        Ok(bytes)
    }

    fn write(&self, file: &str, contents: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file(file);
        fs::write(&path, contents)?;
        debug!(path = %path.display(), bytes = contents.len(), "Wrote credential");
        Ok(path)
    }

    /// Load the authority certificate.
    pub fn ca_certificate(&self) -> Result<Certificate> {
        let der = self.read(CA_CERTIFICATE_FILE)?;
        Certificate::from_der(&der).map_err(|e| self.decode_error(CA_CERTIFICATE_FILE, &e))
    }

    /// Load the leaf certificate.
    pub fn certificate(&self) -> Result<Certificate> {
        let der = self.read(CERTIFICATE_FILE)?;
        Certificate::from_der(&der).map_err(|e| self.decode_error(CERTIFICATE_FILE, &e))
    }

    /// Load the private key.
    pub fn private_key(&self) -> Result<PrivateKey> {
        let der = self.read(PRIVATE_KEY_FILE)?;
        Ok(PrivateKey::from_pkcs8_der(&der)?)
    }

    /// Load the public key.
    pub fn public_key(&self) -> Result<PublicKey> {
        let der = self.read(PUBLIC_KEY_FILE)?;
        Ok(PublicKey::from_spki_der(&der)?)
    }

    /// Load the token, trimmed.
    pub fn token(&self) -> Result<String> {
        let bytes = self.read(TOKEN_FILE)?;
        String::from_utf8(bytes)
            .map(|s| s.trim().to_owned())
            .map_err(|e| self.decode_error(TOKEN_FILE, &e))
    }

    /// Store the authority certificate.
    pub fn write_ca_certificate(&self, der: &[u8]) -> Result<PathBuf> {
        self.write(CA_CERTIFICATE_FILE, der)
    }

    /// Store the leaf certificate.
    pub fn write_certificate(&self, der: &[u8]) -> Result<PathBuf> {
        self.write(CERTIFICATE_FILE, der)
    }

    /// Store a PKCS#8 private key.
    pub fn write_private_key(&self, der: &[u8]) -> Result<PathBuf> {
        self.write(PRIVATE_KEY_FILE, der)
    }

    /// Store a SubjectPublicKeyInfo public key.
    pub fn write_public_key(&self, der: &[u8]) -> Result<PathBuf> {
        self.write(PUBLIC_KEY_FILE, der)
    }

    /// Store a token.
    pub fn write_token(&self, token: &str) -> Result<PathBuf> {
        self.write(TOKEN_FILE, token.as_bytes())
    }

    fn decode_error(&self, file: &str, err: &dyn std::fmt::Display) -> Error {
        Error::Startup(format!(
            "Failed to decode {}: {err}",
            self.file(file).display()
        ))
    }
}
