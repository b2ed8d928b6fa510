//! Shared PKI for integration tests.
//!
//! Builds a credentials directory the same way `certauthz issue` does:
//! authority `primary`, server identity `bob`, clients `alice` and `carol`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use certauthz::cert::issuer::{self, CaParams, KeySize, LeafParams};
use certauthz::config::Config;
use certauthz::credentials::CredentialDir;
use certauthz::keys::PrivateKey;
use certauthz::scope::Scopes;
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(86_400);

pub struct Pki {
    dir: TempDir,
}

impl Pki {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn identity(&self, name: &str) -> CredentialDir {
        CredentialDir::new(self.path(), name)
    }

    /// Default configuration pointing at this PKI.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.credentials.path = self.path().to_path_buf();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config
    }
}

fn write_identity(root: &Path, ca: &CredentialDir, name: &str, scopes: &str) {
    let dir = CredentialDir::new(root, name);
    let pair = issuer::generate_key_pair(KeySize::Rsa2048).unwrap();
    dir.write_private_key(pair.private_der()).unwrap();
    dir.write_public_key(pair.public_der()).unwrap();

    let der = issuer::issue_leaf(
        ca.ca_certificate().unwrap().der(),
        &ca.private_key().unwrap(),
        &dir.public_key().unwrap(),
        &LeafParams {
            name: name.into(),
            organization: "RedRad".into(),
            scopes: Scopes::decode(scopes.as_bytes()),
            dns_names: vec!["localhost".into()],
            serial: issuer::leaf_serial(),
            validity: DAY,
        },
    )
    .unwrap();
    dir.write_certificate(&der).unwrap();
}

fn build() -> Pki {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let primary = CredentialDir::new(root, "primary");
    let pair = issuer::generate_key_pair(KeySize::Rsa2048).unwrap();
    let key = PrivateKey::from_pkcs8_der(pair.private_der()).unwrap();
    let ca = issuer::issue_ca(
        &key,
        &CaParams {
            common_name: "Primary CA".into(),
            organization: "RedRad".into(),
            serial: issuer::date_serial(),
            validity: DAY,
        },
    )
    .unwrap();
    primary.write_private_key(pair.private_der()).unwrap();
    primary.write_public_key(pair.public_der()).unwrap();
    primary.write_ca_certificate(&ca).unwrap();

    write_identity(root, &primary, "bob", "alice.user.read");
    write_identity(root, &primary, "alice", "bob.user.read bob.user.write");
    write_identity(root, &primary, "carol", "alice.read");

    Pki { dir }
}

/// The PKI shared by every test in one test binary.
pub fn pki() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(build)
}
