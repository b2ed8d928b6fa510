use std::hint::black_box;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use certauthz::cert::issuer::{self, CaParams, KeySize, LeafParams};
use certauthz::cert::{Certificate, ChainValidator, Role};
use certauthz::keys::{PrivateKey, PublicKey};
use certauthz::scope::Scopes;

const DAY: Duration = Duration::from_secs(86_400);

struct Material {
    validator: ChainValidator,
    leaf_der: Vec<u8>,
}

fn material(size: KeySize) -> Material {
    let ca_pair = issuer::generate_key_pair(size).unwrap();
    let ca_key = PrivateKey::from_pkcs8_der(ca_pair.private_der()).unwrap();
    let ca_der = issuer::issue_ca(
        &ca_key,
        &CaParams {
            common_name: "Bench CA".into(),
            organization: "RedRad".into(),
            serial: 1,
            validity: DAY,
        },
    )
    .unwrap();

    let leaf_pair = issuer::generate_key_pair(size).unwrap();
    let leaf_der = issuer::issue_leaf(
        &ca_der,
        &ca_key,
        &PublicKey::from_spki_der(leaf_pair.public_der()).unwrap(),
        &LeafParams {
            name: "alice".into(),
            organization: "RedRad".into(),
            scopes: Scopes::decode(b"bob.user.read bob.user.write"),
            dns_names: vec!["localhost".into()],
            serial: 2,
            validity: DAY,
        },
    )
    .unwrap();

    Material {
        validator: ChainValidator::new(Certificate::from_der(&ca_der).unwrap()).unwrap(),
        leaf_der,
    }
}

fn bench_chain_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_validation");

    for (bits, size) in [(2048, KeySize::Rsa2048), (4096, KeySize::Rsa4096)] {
        let m = material(size);
        let leaf = Certificate::from_der(&m.leaf_der).unwrap();
        let encoded = STANDARD.encode(&m.leaf_der);

        group.bench_with_input(BenchmarkId::new("validate", bits), &leaf, |b, leaf| {
            b.iter(|| m.validator.validate(black_box(leaf), Role::Client).unwrap());
        });

        group.bench_with_input(
            BenchmarkId::new("decode_der_and_validate", bits),
            &m.leaf_der,
            |b, der| {
                b.iter(|| {
                    let leaf = Certificate::from_der(black_box(der)).unwrap();
                    m.validator.validate(&leaf, Role::Client).unwrap();
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("decode_base64_and_validate", bits),
            &encoded,
            |b, encoded| {
                b.iter(|| {
                    let leaf = Certificate::from_base64(black_box(encoded)).unwrap();
                    m.validator.validate(&leaf, Role::Client).unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_chain_validation);
criterion_main!(benches);
