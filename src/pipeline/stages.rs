//! Built-in authentication stages.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{HeaderMap, Request};
use http_body_util::LengthLimitError;
use rustls::pki_types::CertificateDer;
use tracing::debug;

use super::{AuthRejection, AuthStage};
use crate::cert::{Certificate, ChainValidator, Role};
use crate::identity::Client;
use crate::signature::{
    self, CLIENT_CERT_HEADER, NONCE_HEADER, NonceCache, ReplayWindow, SIGNATURE_HEADER,
    SignatureError, SignedRequestParams, TIMESTAMP_HEADER,
};
use crate::token::{self, TokenError, TokenValidator};
use crate::unix_now;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Signed request
// ─────────────────────────────────────────────────────────────────────────────

/// Certificate-plus-signature scheme.
///
/// Checks, in order: certificate header present and decodable, chain to
/// the root, timestamp window, body digest, signature, and finally the
/// nonce cache when one is configured. The body is drained once for the
/// digest and put back for the operation.
#[derive(Debug, Clone)]
pub struct SignedRequestStage {
    validator: Arc<ChainValidator>,
    window: ReplayWindow,
    nonces: Option<Arc<NonceCache>>,
    uri_scheme: String,
    max_body_bytes: usize,
}

impl SignedRequestStage {
    /// Default cap on the drained body.
    pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

    /// Stage validating against `validator` with the default window.
    #[must_use]
    pub fn new(validator: Arc<ChainValidator>) -> Self {
        Self {
            validator,
            window: ReplayWindow::default(),
            nonces: None,
            uri_scheme: "http".to_owned(),
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Override the timestamp window.
    #[must_use]
    pub fn with_window(mut self, window: ReplayWindow) -> Self {
        self.window = window;
        self
    }

    /// Reject reused nonces.
    #[must_use]
    pub fn with_nonce_cache(mut self, cache: Arc<NonceCache>) -> Self {
        self.nonces = Some(cache);
        self
    }

    /// Scheme used when rebuilding the signed URI.
    #[must_use]
    pub fn with_uri_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.uri_scheme = scheme.into();
        self
    }

    /// Cap on the body drained for the digest.
    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// The absolute URI the caller is expected to have signed.
    fn signed_uri(&self, request: &Request<Body>) -> String {
        let host = header(request.headers(), HOST.as_str())
            .or_else(|| request.uri().authority().map(|a| a.as_str()))
            .unwrap_or_default();
        let path = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        format!("{}://{host}{path}", self.uri_scheme)
    }

    async fn drain_body(&self, request: &mut Request<Body>) -> Result<Vec<u8>, SignatureError> {
        let body = std::mem::take(request.body_mut());
        let bytes = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|e| {
                let cause = e.into_inner();
                if cause.is::<LengthLimitError>() {
                    SignatureError::BodyTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    SignatureError::Body(cause.to_string())
                }
            })?;
        *request.body_mut() = Body::from(bytes.clone());
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AuthStage for SignedRequestStage {
    fn name(&self) -> &'static str {
        "signed_request"
    }

    async fn authenticate(
        &self,
        request: &mut Request<Body>,
        _resolved: Option<&Client>,
    ) -> Result<Client, AuthRejection> {
        let headers = request.headers();
        let Some(encoded) = header(headers, CLIENT_CERT_HEADER) else {
            return Err(AuthRejection::unauthorized(
                "missing_certificate",
                "client certificate is missing",
            ));
        };
        let cert = Certificate::from_base64(encoded)?;
        self.validator.validate(&cert, Role::Client)?;

        let timestamp = header(headers, TIMESTAMP_HEADER)
            .ok_or(SignatureError::MissingTimestamp)?
            .to_owned();
        let now = unix_now();
        let ts = self.window.check(&timestamp, now)?;

        let signature = header(headers, SIGNATURE_HEADER)
            .unwrap_or_default()
            .to_owned();
        let nonce = header(headers, NONCE_HEADER).unwrap_or_default().to_owned();
        let uri = self.signed_uri(request);
        let method = request.method().as_str().to_owned();

        let body = self.drain_body(request).await?;
        let params = SignedRequestParams {
            method,
            uri,
            body_md5: signature::body_digest(&body),
            timestamp,
            nonce,
        };
        signature::verify(&cert, &signature, &params)?;

        let name = cert.common_name().unwrap_or_default();
        if let Some(cache) = &self.nonces {
            cache.check_and_insert(name, &params.nonce, ts, now)?;
        }

        debug!(cn = name, uri = %params.uri, "Signed request verified");
        Ok(Client::new(name, cert.scopes().clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bearer token
// ─────────────────────────────────────────────────────────────────────────────

/// `Authorization: Bearer <token>` scheme.
#[derive(Debug, Clone)]
pub struct BearerTokenStage {
    validator: Arc<TokenValidator>,
}

impl BearerTokenStage {
    /// Stage validating tokens with `validator`.
    #[must_use]
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl AuthStage for BearerTokenStage {
    fn name(&self) -> &'static str {
        "bearer_token"
    }

    async fn authenticate(
        &self,
        request: &mut Request<Body>,
        _resolved: Option<&Client>,
    ) -> Result<Client, AuthRejection> {
        let value = header(request.headers(), AUTHORIZATION.as_str())
            .ok_or(TokenError::MalformedHeader)?;
        let claims = self.validator.validate(token::bearer_token(value)?)?;
        Ok(token::identity_from_claims(&claims))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Peer certificate
// ─────────────────────────────────────────────────────────────────────────────

/// Certificates presented by the TLS peer, leaf first.
///
/// Inserted into request extensions by the mutual-TLS listener after a
/// successful handshake.
#[derive(Debug, Clone)]
pub struct PeerCertificates(pub Arc<Vec<CertificateDer<'static>>>);

/// Resolves the caller from the already-verified TLS peer certificate.
///
/// The chain and scope-prefix checks ran during the handshake and are not
/// repeated here.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerCertificateStage;

#[async_trait]
impl AuthStage for PeerCertificateStage {
    fn name(&self) -> &'static str {
        "peer_certificate"
    }

    async fn authenticate(
        &self,
        request: &mut Request<Body>,
        _resolved: Option<&Client>,
    ) -> Result<Client, AuthRejection> {
        let leaf = request
            .extensions()
            .get::<PeerCertificates>()
            .and_then(|peers| peers.0.first())
            .ok_or_else(|| {
                AuthRejection::unauthorized(
                    "missing_certificate",
                    "no peer certificate on connection",
                )
            })?;
        let cert = Certificate::from_der(leaf.as_ref())?;
        Ok(Client::new(
            cert.common_name().unwrap_or_default(),
            cert.scopes().clone(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scope requirement
// ─────────────────────────────────────────────────────────────────────────────

/// Requires the resolved client to hold every listed scope.
///
/// Must follow a stage that resolves a client.
#[derive(Debug, Clone)]
pub struct RequireScopes {
    required: Vec<String>,
}

impl RequireScopes {
    /// Require all of `scopes`. An empty list admits any resolved client.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AuthStage for RequireScopes {
    fn name(&self) -> &'static str {
        "require_scopes"
    }

    async fn authenticate(
        &self,
        _request: &mut Request<Body>,
        resolved: Option<&Client>,
    ) -> Result<Client, AuthRejection> {
        let client = resolved.ok_or_else(|| {
            AuthRejection::unauthorized("unauthenticated", "no authenticated client")
        })?;
        if client.scopes().has_all(self.required.as_slice()) {
            return Ok(client.clone());
        }
        let missing: Vec<&str> = self
            .required
            .iter()
            .map(String::as_str)
            .filter(|s| !client.scopes().has(s))
            .collect();
        Err(AuthRejection::forbidden(format!(
            "missing scopes: {}",
            missing.join(",")
        )))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::fixtures::{Identity, alice, carol, mallory, primary};
    use crate::scope::Scopes;
    use crate::signature::SignedHeaders;
    use crate::token::TokenIssuer;

    fn validator() -> Arc<ChainValidator> {
        Arc::new(ChainValidator::new(primary().cert.clone()).unwrap())
    }

    fn signed(identity: &Identity, method: &str, path: &str, body: &[u8], ts: i64, nonce: u64) -> Request<Body> {
        let uri = format!("http://localhost:8585{path}");
        let headers = SignedHeaders::sign_with(
            &identity.key,
            identity.cert.der(),
            method,
            &uri,
            body,
            ts,
            nonce,
        )
        .unwrap();
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost:8585")
            .body(Body::from(body.to_vec()))
            .unwrap();
        headers.apply(request.headers_mut());
        request
    }

    #[tokio::test]
    async fn signed_request_resolves_certificate_identity() {
        // GIVEN: alice signs a GET for /cert now
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now(), 1);
        // WHEN: the stage runs
        let client = SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap();
        // THEN: name and scopes come from the certificate
        assert_eq!(client.name(), "alice");
        assert_eq!(client.scopes(), &Scopes::decode(b"bob.user.read bob.user.write"));
    }

    #[tokio::test]
    async fn body_is_bound_and_restored() {
        // GIVEN: a signed POST with a body
        let mut request = signed(alice(), "POST", "/cert?x=1", b"{\"a\":1}", unix_now(), 2);
        SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap();
        // THEN: the operation still sees the body
        let body = axum::body::to_bytes(std::mem::take(request.body_mut()), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"a\":1}");
    }

    #[tokio::test]
    async fn altered_body_is_rejected() {
        let mut request = signed(alice(), "POST", "/cert", b"original", unix_now(), 3);
        *request.body_mut() = Body::from("tampered");
        let err = SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_certificate_is_unauthorized() {
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now(), 4);
        request.headers_mut().remove(CLIENT_CERT_HEADER);
        let err = SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error(), "missing_certificate");
    }

    #[tokio::test]
    async fn timestamp_problems_are_bad_requests() {
        let stage = SignedRequestStage::new(validator());

        // GIVEN: no timestamp header
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now(), 5);
        request.headers_mut().remove(TIMESTAMP_HEADER);
        let err = stage.authenticate(&mut request, None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        // GIVEN: a request signed 601 seconds ago
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now() - 601, 6);
        let err = stage.authenticate(&mut request, None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "timestamp is expired");
    }

    #[tokio::test]
    async fn request_within_window_is_accepted() {
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now() - 599, 7);
        SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn certificate_from_other_authority_is_rejected() {
        // GIVEN: mallory signs correctly with a rogue-issued certificate
        let mut request = signed(mallory(), "GET", "/cert", b"", unix_now(), 8);
        let err = SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error(), "invalid_certificate");
    }

    #[tokio::test]
    async fn signed_uri_uses_configured_scheme() {
        // GIVEN: the caller signed an http URI, server rebuilds https
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now(), 9);
        let err = SignedRequestStage::new(validator())
            .with_uri_scheme("https")
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.error(), "invalid_signature");
    }

    #[tokio::test]
    async fn nonce_cache_rejects_replay() {
        // GIVEN: a stage with a nonce cache
        let cache = Arc::new(NonceCache::new(16, ReplayWindow::default()));
        let stage = SignedRequestStage::new(validator()).with_nonce_cache(cache.clone());
        let ts = unix_now();

        // WHEN: the same signed request arrives twice
        stage
            .authenticate(&mut signed(alice(), "GET", "/cert", b"", ts, 10), None)
            .await
            .unwrap();
        let err = stage
            .authenticate(&mut signed(alice(), "GET", "/cert", b"", ts, 10), None)
            .await
            .unwrap_err();

        // THEN: the replay is refused
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error(), "replayed_request");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn replay_without_nonce_cache_is_accepted() {
        let stage = SignedRequestStage::new(validator());
        let ts = unix_now();
        for _ in 0..2 {
            stage
                .authenticate(&mut signed(alice(), "GET", "/cert", b"", ts, 11), None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut request = signed(alice(), "POST", "/cert", &[b'x'; 64], unix_now(), 12);
        let err = SignedRequestStage::new(validator())
            .with_max_body_bytes(16)
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn broken_body_stream_is_bad_request_not_too_large() {
        // GIVEN: a body that fails after the first chunk
        let mut request = signed(alice(), "POST", "/cert", b"a", unix_now(), 13);
        *request.body_mut() = Body::from_stream(futures::stream::iter([
            Ok("a"),
            Err(std::io::Error::other("client reset")),
        ]));

        // WHEN: the stage drains it for the digest
        let err = SignedRequestStage::new(validator())
            .authenticate(&mut request, None)
            .await
            .unwrap_err();

        // THEN: reported as an unreadable body
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error(), "invalid_body");
    }

    #[tokio::test]
    async fn nonce_cache_requires_a_nonce() {
        let stage = SignedRequestStage::new(validator())
            .with_nonce_cache(Arc::new(NonceCache::new(16, ReplayWindow::default())));
        let mut request = signed(alice(), "GET", "/cert", b"", unix_now(), 14);
        request.headers_mut().remove(NONCE_HEADER);

        let err = stage.authenticate(&mut request, None).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error(), "invalid_nonce");
    }

    #[tokio::test]
    async fn nonce_cache_is_scoped_per_caller() {
        // GIVEN: alice and carol pick the same nonce
        let stage = SignedRequestStage::new(validator())
            .with_nonce_cache(Arc::new(NonceCache::new(16, ReplayWindow::default())));
        let ts = unix_now();

        // THEN: neither request is taken for a replay of the other
        stage
            .authenticate(&mut signed(alice(), "GET", "/cert", b"", ts, 15), None)
            .await
            .unwrap();
        let client = stage
            .authenticate(&mut signed(carol(), "GET", "/cert", b"", ts, 15), None)
            .await
            .unwrap();
        assert_eq!(client.name(), "carol");
    }

    // ── bearer token ────────────────────────────────────────────────────────

    fn token_stage() -> BearerTokenStage {
        BearerTokenStage::new(Arc::new(TokenValidator::new(&primary().public, None)))
    }

    fn with_authorization(value: &str) -> Request<Body> {
        Request::builder()
            .uri("/token")
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn bearer_token_resolves_claims() {
        let token = TokenIssuer::new(&primary().key)
            .issue(
                "alice",
                "bob",
                &Scopes::decode(b"bob.user.read"),
                std::time::Duration::from_secs(60),
            )
            .unwrap();
        let client = token_stage()
            .authenticate(&mut with_authorization(&format!("Bearer {token}")), None)
            .await
            .unwrap();
        assert_eq!(client.name(), "alice.local");
        assert!(client.scopes().has("bob.user.read"));
    }

    #[tokio::test]
    async fn malformed_authorization_is_invalid_token() {
        for value in ["Basic abc", "Bearer", "Bearer a b"] {
            let err = token_stage()
                .authenticate(&mut with_authorization(value), None)
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.message(), "invalid token");
        }

        let mut request = Request::builder().uri("/token").body(Body::empty()).unwrap();
        let err = token_stage().authenticate(&mut request, None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    // ── peer certificate ────────────────────────────────────────────────────

    #[tokio::test]
    async fn peer_certificate_resolves_leaf() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(PeerCertificates(Arc::new(vec![CertificateDer::from(
                alice().cert.der().to_vec(),
            )])));
        let client = PeerCertificateStage
            .authenticate(&mut request, None)
            .await
            .unwrap();
        assert_eq!(client.name(), "alice");
    }

    #[tokio::test]
    async fn missing_peer_certificate_is_unauthorized() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = PeerCertificateStage
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    // ── scope requirement ───────────────────────────────────────────────────

    #[tokio::test]
    async fn require_scopes_forbids_missing_scope() {
        // GIVEN: alice lacks carol.admin
        let client = Client::new("alice", Scopes::decode(b"bob.user.read bob.user.write"));
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();

        // THEN: requiring it is 403, requiring held scopes passes
        let err = RequireScopes::new(["bob.user.read", "carol.admin"])
            .authenticate(&mut request, Some(&client))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.message(), "missing scopes: carol.admin");

        let passed = RequireScopes::new(["bob.user.read"])
            .authenticate(&mut request, Some(&client))
            .await
            .unwrap();
        assert_eq!(passed, client);
    }

    #[tokio::test]
    async fn require_scopes_without_client_is_unauthorized() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = RequireScopes::new(Vec::<String>::new())
            .authenticate(&mut request, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
