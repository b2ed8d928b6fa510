//! Shared unit-test PKI.
//!
//! RSA key generation dominates test time, so every authority and identity
//! is minted once per test binary.

use std::sync::OnceLock;
use std::time::Duration;

use crate::cert::Certificate;
use crate::cert::issuer::{self, CaParams, KeySize, LeafParams};
use crate::keys::{PrivateKey, PublicKey};
use crate::scope::Scopes;

const HOUR: Duration = Duration::from_secs(3_600);

pub(crate) struct Authority {
    pub key: PrivateKey,
    pub public: PublicKey,
    pub cert: Certificate,
}

pub(crate) struct Identity {
    pub key: PrivateKey,
    pub cert: Certificate,
}

fn mint_authority(cn: &str) -> Authority {
    let pair = issuer::generate_key_pair(KeySize::Rsa2048).unwrap();
    let key = PrivateKey::from_pkcs8_der(pair.private_der()).unwrap();
    let der = issuer::issue_ca(
        &key,
        &CaParams {
            common_name: cn.into(),
            organization: "RedRad".into(),
            serial: 1,
            validity: HOUR,
        },
    )
    .unwrap();
    Authority {
        key,
        public: PublicKey::from_spki_der(pair.public_der()).unwrap(),
        cert: Certificate::from_der(&der).unwrap(),
    }
}

/// Issue a leaf signed by `authority`.
pub(crate) fn mint_identity(authority: &Authority, name: &str, scopes: &str) -> Identity {
    let pair = issuer::generate_key_pair(KeySize::Rsa2048).unwrap();
    let der = issuer::issue_leaf(
        authority.cert.der(),
        &authority.key,
        &PublicKey::from_spki_der(pair.public_der()).unwrap(),
        &LeafParams {
            name: name.into(),
            organization: "RedRad".into(),
            scopes: Scopes::decode(scopes.as_bytes()),
            dns_names: vec!["localhost".into()],
            serial: 2,
            validity: HOUR,
        },
    )
    .unwrap();
    Identity {
        key: PrivateKey::from_pkcs8_der(pair.private_der()).unwrap(),
        cert: Certificate::from_der(&der).unwrap(),
    }
}

/// The trusted authority.
pub(crate) fn primary() -> &'static Authority {
    static CELL: OnceLock<Authority> = OnceLock::new();
    CELL.get_or_init(|| mint_authority("Primary CA"))
}

/// An unrelated authority with the same subject.
pub(crate) fn rogue() -> &'static Authority {
    static CELL: OnceLock<Authority> = OnceLock::new();
    CELL.get_or_init(|| mint_authority("Primary CA"))
}

/// `alice`, holding `bob.user.read bob.user.write`, issued by [`primary`].
pub(crate) fn alice() -> &'static Identity {
    static CELL: OnceLock<Identity> = OnceLock::new();
    CELL.get_or_init(|| mint_identity(primary(), "alice", "bob.user.read bob.user.write"))
}

/// `bob`, the serving identity, issued by [`primary`].
pub(crate) fn bob() -> &'static Identity {
    static CELL: OnceLock<Identity> = OnceLock::new();
    CELL.get_or_init(|| mint_identity(primary(), "bob", "alice.user.read"))
}

/// `carol`, holding only `alice.read`, issued by [`primary`].
pub(crate) fn carol() -> &'static Identity {
    static CELL: OnceLock<Identity> = OnceLock::new();
    CELL.get_or_init(|| mint_identity(primary(), "carol", "alice.read"))
}

/// `mallory`, issued by [`rogue`].
pub(crate) fn mallory() -> &'static Identity {
    static CELL: OnceLock<Identity> = OnceLock::new();
    CELL.get_or_init(|| mint_identity(rogue(), "alice", "bob.user.read bob.user.write"))
}
