//! Signing key cache for the identity provider's published key set.
//!
//! The key set (JWKS) is fetched from the realm's
//! `/protocol/openid-connect/certs` endpoint and held as an immutable
//! [`SigningKeySet`] published through a `watch` channel. Every successful
//! refresh replaces the whole set; a failed refresh leaves the previous set
//! in place.
//!
//! Refreshes happen for three reasons:
//! - once at startup ([`KeySetCache::init`]), which must succeed
//! - on a fixed interval ([`KeySetCache::spawn_refresh_task`])
//! - when a token names a key ID the current set does not contain, no more
//!   than once per rate-limit window
//!
//! # Security
//!
//! - Only keys with `use` absent or `sig` are loaded
//! - Symmetric (`oct`) keys are never loaded
//! - Every fetch is bounded by a timeout, so a stalled identity provider
//!   cannot hold a request past it

use crate::config::{
    Config, DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS, DEFAULT_JWKS_REFRESH_RATE_LIMIT_SECONDS,
    DEFAULT_JWKS_REFRESH_TIMEOUT_SECONDS,
};
use crate::observability::metrics::record_key_set_refresh;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Errors from fetching or querying the key set.
#[derive(Debug, Error)]
pub enum KeySetError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Key set fetch failed: {0}")]
    Fetch(String),

    #[error("Key set endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Key set document could not be parsed: {0}")]
    Parse(String),

    #[error("Key set contains no usable signing keys")]
    EmptyKeySet,

    #[error("Key set fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("No signing key matches the token's key ID")]
    KeyNotFound,
}

impl KeySetError {
    /// Bounded label for metrics.
    fn kind(&self) -> &'static str {
        match self {
            KeySetError::Client(_) => "client",
            KeySetError::Fetch(_) => "fetch",
            KeySetError::Status(_) => "status",
            KeySetError::Parse(_) => "parse",
            KeySetError::EmptyKeySet => "empty",
            KeySetError::Timeout(_) => "timeout",
            KeySetError::KeyNotFound => "key_not_found",
        }
    }
}

/// Why a refresh was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Initial,
    Scheduled,
    UnknownKid,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Initial => "initial",
            RefreshTrigger::Scheduled => "scheduled",
            RefreshTrigger::UnknownKid => "unknown_kid",
        }
    }
}

/// A single JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type: "RSA", "EC" or "OKP".
    pub kty: String,

    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default)]
    pub alg: Option<String>,

    /// Key use; encryption keys ("enc") are skipped.
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    #[serde(default)]
    pub x: Option<String>,

    #[serde(default)]
    pub y: Option<String>,
}

/// JWKS document. Entries are decoded one by one so that a single
/// unrecognized key does not reject the whole document.
#[derive(Debug, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<serde_json::Value>,
}

/// A published key together with its prebuilt decoding key.
pub struct VerificationKey {
    jwk: Jwk,
    kid: String,
    decoding_key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("kty", &self.jwk.kty)
            .field("alg", &self.jwk.alg)
            .field("crv", &self.jwk.crv)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Build a verification key from a published JWK.
    ///
    /// Fails if the key has no ID, is not a signing key, or its material
    /// cannot be decoded.
    pub fn from_jwk(jwk: Jwk) -> Result<Self, String> {
        let kid = match &jwk.kid {
            Some(kid) if !kid.is_empty() => kid.clone(),
            _ => return Err("key has no kid".to_string()),
        };

        if let Some(key_use) = &jwk.key_use {
            if key_use != "sig" {
                return Err(format!("key use is '{key_use}', not 'sig'"));
            }
        }

        let decoding_key = match jwk.kty.as_str() {
            "RSA" => match (jwk.n.as_deref(), jwk.e.as_deref()) {
                (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e),
                _ => return Err("RSA key is missing n or e".to_string()),
            },
            "EC" => match (jwk.x.as_deref(), jwk.y.as_deref()) {
                (Some(x), Some(y)) => DecodingKey::from_ec_components(x, y),
                _ => return Err("EC key is missing x or y".to_string()),
            },
            "OKP" => match jwk.x.as_deref() {
                Some(x) => DecodingKey::from_ed_components(x),
                None => return Err("OKP key is missing x".to_string()),
            },
            other => return Err(format!("unsupported key type '{other}'")),
        }
        .map_err(|e| format!("invalid key material: {e}"))?;

        Ok(Self {
            jwk,
            kid,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Whether a token signed with `alg` may be verified by this key.
    ///
    /// The algorithm must be asymmetric, match the key type (and curve for
    /// EC and OKP keys), and match the key's declared `alg` if it has one.
    pub fn supports(&self, alg: Algorithm) -> bool {
        let kty = self.jwk.kty.as_str();
        let crv = self.jwk.crv.as_deref();

        let compatible = match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => kty == "RSA",
            Algorithm::ES256 => kty == "EC" && crv == Some("P-256"),
            Algorithm::ES384 => kty == "EC" && crv == Some("P-384"),
            Algorithm::EdDSA => kty == "OKP" && crv == Some("Ed25519"),
            // HMAC algorithms would turn the public key into a shared secret
            _ => false,
        };

        compatible
            && match &self.jwk.alg {
                None => true,
                Some(declared) => declared
                    .parse::<Algorithm>()
                    .is_ok_and(|declared| declared == alg),
            }
    }
}

/// An immutable snapshot of the identity provider's signing keys.
#[derive(Debug)]
pub struct SigningKeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
    refreshed_at: DateTime<Utc>,
    source_url: String,
}

impl SigningKeySet {
    /// Build a key set from a fetched document, skipping unusable keys.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::EmptyKeySet` if no key survives.
    pub fn from_document(document: JwksDocument, source_url: &str) -> Result<Self, KeySetError> {
        let mut keys = HashMap::new();

        for entry in document.keys {
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    debug!(target: "rg.auth.jwks", error = %e, "Skipping unparseable key entry");
                    continue;
                }
            };

            match VerificationKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(key.kid.clone(), Arc::new(key));
                }
                Err(reason) => {
                    debug!(target: "rg.auth.jwks", reason = %reason, "Skipping key");
                }
            }
        }

        if keys.is_empty() {
            return Err(KeySetError::EmptyKeySet);
        }

        Ok(Self {
            keys,
            refreshed_at: Utc::now(),
            source_url: source_url.to_string(),
        })
    }

    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }
}

/// Key set location and refresh timing.
#[derive(Debug, Clone)]
pub struct KeySetConfig {
    /// Full URL of the JWKS document.
    pub jwks_url: String,

    /// Interval between scheduled refreshes.
    pub refresh_interval: Duration,

    /// Minimum spacing between refreshes caused by unknown key IDs.
    pub refresh_rate_limit: Duration,

    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
}

impl KeySetConfig {
    /// Config for `jwks_url` with default timings.
    pub fn new(jwks_url: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            refresh_interval: Duration::from_secs(DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS),
            refresh_rate_limit: Duration::from_secs(DEFAULT_JWKS_REFRESH_RATE_LIMIT_SECONDS),
            fetch_timeout: Duration::from_secs(DEFAULT_JWKS_REFRESH_TIMEOUT_SECONDS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            jwks_url: config.jwks_url(),
            refresh_interval: config.jwks_refresh_interval,
            refresh_rate_limit: config.jwks_refresh_rate_limit,
            fetch_timeout: config.jwks_refresh_timeout,
        }
    }
}

/// Cache of the identity provider's signing keys.
///
/// Readers take a cheap `Arc` snapshot of the current set; refreshes swap
/// the whole set. Unknown-kid refreshes are serialized by `unknown_kid_gate`,
/// which also holds the time of the last such refresh.
pub struct KeySetCache {
    config: KeySetConfig,
    http_client: reqwest::Client,
    current: watch::Sender<Arc<SigningKeySet>>,
    generation: AtomicU64,
    unknown_kid_gate: Mutex<Option<Instant>>,
}

impl KeySetCache {
    /// Fetch the key set once and build the cache.
    ///
    /// # Errors
    ///
    /// Any fetch, parse or empty-set failure. The service cannot verify
    /// tokens without keys, so callers should treat this as fatal.
    #[instrument(skip_all, fields(url = %config.jwks_url))]
    pub async fn init(config: KeySetConfig) -> Result<Arc<Self>, KeySetError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| KeySetError::Client(e.to_string()))?;

        let start = Instant::now();
        let initial = match fetch_bounded(&http_client, &config.jwks_url, config.fetch_timeout).await
        {
            Ok(set) => set,
            Err(e) => {
                record_key_set_refresh(
                    RefreshTrigger::Initial.as_str(),
                    e.kind(),
                    start.elapsed(),
                );
                return Err(e);
            }
        };
        record_key_set_refresh(RefreshTrigger::Initial.as_str(), "success", start.elapsed());

        info!(
            target: "rg.auth.jwks",
            key_count = initial.len(),
            "Initial key set loaded"
        );

        let (current, _) = watch::channel(Arc::new(initial));

        Ok(Arc::new(Self {
            config,
            http_client,
            current,
            generation: AtomicU64::new(1),
            unknown_kid_gate: Mutex::new(None),
        }))
    }

    /// The current key set.
    pub fn current(&self) -> Arc<SigningKeySet> {
        Arc::clone(&self.current.borrow())
    }

    /// Receiver that observes every published key set.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SigningKeySet>> {
        self.current.subscribe()
    }

    /// Number of successful fetches since startup, including the first.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn lookup(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.current.borrow().get(kid)
    }

    /// Look up the key for `kid`.
    ///
    /// A known kid is served from memory. An unknown kid triggers at most one
    /// refresh per rate-limit window; concurrent misses wait on the same
    /// refresh instead of starting their own.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::KeyNotFound` if the kid is still unknown.
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> Result<Arc<VerificationKey>, KeySetError> {
        if let Some(key) = self.lookup(kid) {
            return Ok(key);
        }

        {
            let mut last_refresh = self.unknown_kid_gate.lock().await;

            // Another request may have refreshed while this one waited
            if let Some(key) = self.lookup(kid) {
                return Ok(key);
            }

            let now = Instant::now();
            if let Some(previous) = *last_refresh {
                if now.duration_since(previous) < self.config.refresh_rate_limit {
                    debug!(
                        target: "rg.auth.jwks",
                        kid = %kid,
                        "Unknown key ID, refresh suppressed by rate limit"
                    );
                    return Err(KeySetError::KeyNotFound);
                }
            }

            let result = self.refresh(RefreshTrigger::UnknownKid).await;

            // A failed fetch closes the window too. A fetch cancelled along
            // with its request never gets here and leaves it open.
            *last_refresh = Some(now);

            if let Err(e) = result {
                debug!(target: "rg.auth.jwks", error = %e, "Unknown-kid refresh failed");
            }
        }

        self.lookup(kid).ok_or_else(|| {
            warn!(target: "rg.auth.jwks", kid = %kid, "Key ID not found after refresh");
            KeySetError::KeyNotFound
        })
    }

    /// Fetch the key set and publish it.
    ///
    /// On failure the previous set stays in place.
    #[instrument(skip_all, fields(trigger = trigger.as_str()))]
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<(), KeySetError> {
        let start = Instant::now();
        let result =
            fetch_bounded(&self.http_client, &self.config.jwks_url, self.config.fetch_timeout)
                .await;

        match result {
            Ok(set) => {
                let set = Arc::new(set);
                self.current.send_replace(Arc::clone(&set));
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                record_key_set_refresh(trigger.as_str(), "success", start.elapsed());
                info!(
                    target: "rg.auth.jwks",
                    trigger = trigger.as_str(),
                    source_url = set.source_url(),
                    key_count = set.len(),
                    refreshed_at = %set.refreshed_at(),
                    generation,
                    "Key set refreshed"
                );
                Ok(())
            }
            Err(e) => {
                record_key_set_refresh(trigger.as_str(), e.kind(), start.elapsed());
                warn!(
                    target: "rg.auth.jwks",
                    trigger = trigger.as_str(),
                    error = %e,
                    "Key set refresh failed, keeping previous keys"
                );
                Err(e)
            }
        }
    }

    /// Spawn the periodic refresh task.
    ///
    /// The first scheduled refresh happens one interval after the call. The
    /// task exits when `cancel_token` is cancelled.
    pub fn spawn_refresh_task(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let period = cache.config.refresh_interval;
            info!(
                target: "rg.auth.jwks",
                interval_secs = period.as_secs(),
                "Starting key set refresh task"
            );

            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        // Failures are logged by refresh; the next tick retries
                        let _ = cache.refresh(RefreshTrigger::Scheduled).await;
                    }
                    _ = cancel_token.cancelled() => {
                        info!(
                            target: "rg.auth.jwks",
                            "Key set refresh task received shutdown signal, exiting"
                        );
                        break;
                    }
                }
            }
        })
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fetch in a separate task bounded by `timeout`.
///
/// The task is aborted if the timeout fires or the caller is cancelled.
async fn fetch_bounded(
    http_client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<SigningKeySet, KeySetError> {
    let client = http_client.clone();
    let task_url = url.to_string();
    let task = tokio::spawn(async move { fetch_key_set(&client, &task_url).await });
    let _guard = AbortOnDrop(task.abort_handle());

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(KeySetError::Fetch(format!(
            "fetch task ended abnormally: {join_error}"
        ))),
        Err(_) => Err(KeySetError::Timeout(timeout)),
    }
}

async fn fetch_key_set(
    http_client: &reqwest::Client,
    url: &str,
) -> Result<SigningKeySet, KeySetError> {
    debug!(target: "rg.auth.jwks", url = %url, "Fetching key set");

    let response = http_client
        .get(url)
        .send()
        .await
        .map_err(|e| KeySetError::Fetch(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(KeySetError::Status(status.as_u16()));
    }

    let document: JwksDocument = response
        .json()
        .await
        .map_err(|e| KeySetError::Parse(e.to_string()))?;

    SigningKeySet::from_document(document, url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CERTS_PATH: &str = "/realms/test/protocol/openid-connect/certs";

    // Public key material from RFC 7517 / RFC 8037 examples
    const RSA_N: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";
    const RSA_E: &str = "AQAB";
    const EC_X: &str = "MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4";
    const EC_Y: &str = "4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM";
    const ED_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        json!({"kty": "RSA", "kid": kid, "alg": "RS256", "use": "sig", "n": RSA_N, "e": RSA_E})
    }

    fn ed_jwk(kid: &str) -> serde_json::Value {
        json!({"kty": "OKP", "kid": kid, "crv": "Ed25519", "x": ED_X})
    }

    fn jwk(value: serde_json::Value) -> Jwk {
        serde_json::from_value(value).unwrap()
    }

    fn test_config(server: &MockServer) -> KeySetConfig {
        KeySetConfig {
            jwks_url: format!("{}{}", server.uri(), CERTS_PATH),
            refresh_interval: Duration::from_secs(3600),
            refresh_rate_limit: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(2),
        }
    }

    async fn mount_keys(server: &MockServer, keys: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(server)
            .await;
    }

    async fn fetch_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap().len()
    }

    // -------------------------------------------------------------------------
    // Key parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_jwk_deserialization_keycloak_rsa() {
        let key = jwk(json!({
            "kid": "FJ86GcF3jTbNLOco4NvZkUCIUmfYCqoqtOQeMfbhNlE",
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": RSA_N,
            "e": RSA_E,
            "x5c": ["MIICmzCCAYMCBgF..."],
            "x5t": "Dx3Z1h1y1y1y",
        }));

        assert_eq!(key.kty, "RSA");
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        assert_eq!(key.key_use.as_deref(), Some("sig"));
        assert_eq!(key.e.as_deref(), Some("AQAB"));
        assert!(key.crv.is_none());
    }

    #[test]
    fn test_verification_key_rejects_encryption_key() {
        let key = jwk(json!({"kty": "RSA", "kid": "enc-1", "alg": "RSA-OAEP", "use": "enc", "n": RSA_N, "e": RSA_E}));
        assert!(VerificationKey::from_jwk(key).is_err());
    }

    #[test]
    fn test_verification_key_rejects_symmetric_and_incomplete_keys() {
        for value in [
            json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}),
            json!({"kty": "RSA", "kid": "no-exponent", "n": RSA_N}),
            json!({"kty": "EC", "kid": "no-y", "crv": "P-256", "x": EC_X}),
            json!({"kty": "OKP", "crv": "Ed25519", "x": ED_X}),
            json!({"kty": "RSA", "kid": "bad-b64", "n": "***", "e": RSA_E}),
        ] {
            assert!(
                VerificationKey::from_jwk(jwk(value.clone())).is_err(),
                "expected {value} to be rejected"
            );
        }
    }

    #[test]
    fn test_supports_rsa_family() {
        let key = VerificationKey::from_jwk(jwk(json!({"kty": "RSA", "kid": "r", "n": RSA_N, "e": RSA_E}))).unwrap();

        assert!(key.supports(Algorithm::RS256));
        assert!(key.supports(Algorithm::RS512));
        assert!(key.supports(Algorithm::PS384));
        assert!(!key.supports(Algorithm::ES256));
        assert!(!key.supports(Algorithm::EdDSA));
        assert!(!key.supports(Algorithm::HS256));
    }

    #[test]
    fn test_supports_respects_declared_alg() {
        let key = VerificationKey::from_jwk(jwk(rsa_jwk("r"))).unwrap();

        assert!(key.supports(Algorithm::RS256));
        assert!(!key.supports(Algorithm::RS384));
        assert!(!key.supports(Algorithm::PS256));
    }

    #[test]
    fn test_supports_ec_curve_must_match() {
        let key = VerificationKey::from_jwk(jwk(
            json!({"kty": "EC", "kid": "ec", "crv": "P-256", "x": EC_X, "y": EC_Y}),
        ))
        .unwrap();

        assert!(key.supports(Algorithm::ES256));
        assert!(!key.supports(Algorithm::ES384));
        assert!(!key.supports(Algorithm::RS256));
    }

    #[test]
    fn test_supports_eddsa() {
        let key = VerificationKey::from_jwk(jwk(ed_jwk("ed"))).unwrap();

        assert!(key.supports(Algorithm::EdDSA));
        assert!(!key.supports(Algorithm::ES256));
    }

    #[test]
    fn test_key_set_skips_unusable_entries() {
        let document = JwksDocument {
            keys: vec![
                rsa_jwk("good-rsa"),
                ed_jwk("good-ed"),
                json!({"kty": "RSA", "kid": "enc", "use": "enc", "n": RSA_N, "e": RSA_E}),
                json!({"kid": "no-kty"}),
                json!("not an object"),
            ],
        };

        let set = SigningKeySet::from_document(document, "http://idp/certs").unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.get("good-rsa").is_some());
        assert!(set.get("good-ed").is_some());
        assert!(set.get("enc").is_none());
        assert_eq!(set.source_url(), "http://idp/certs");
    }

    #[test]
    fn test_key_set_empty_is_error() {
        let document = JwksDocument {
            keys: vec![json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"})],
        };

        let result = SigningKeySet::from_document(document, "http://idp/certs");
        assert!(matches!(result, Err(KeySetError::EmptyKeySet)));
    }

    // -------------------------------------------------------------------------
    // Cache behavior
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_init_loads_keys() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1"), ed_jwk("k2")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.current().len(), 2);
        assert_eq!(fetch_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_init_fails_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = KeySetCache::init(test_config(&server)).await;
        assert!(matches!(result, Err(KeySetError::Status(500))));
    }

    #[tokio::test]
    async fn test_init_fails_on_garbage_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let result = KeySetCache::init(test_config(&server)).await;
        assert!(matches!(result, Err(KeySetError::Parse(_))));
    }

    #[tokio::test]
    async fn test_init_fails_on_empty_key_set() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![]).await;

        let result = KeySetCache::init(test_config(&server)).await;
        assert!(matches!(result, Err(KeySetError::EmptyKeySet)));
    }

    #[tokio::test]
    async fn test_init_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"keys": [rsa_jwk("k1")]}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&server);
        config.fetch_timeout = Duration::from_millis(200);

        let started = Instant::now();
        let result = KeySetCache::init(config).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_resolve_known_kid_is_idempotent_without_fetch() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        let first = cache.resolve("k1").await.unwrap();
        let second = cache.resolve("k1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kid(), "k1");
        assert_eq!(fetch_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_refreshes_at_most_once_per_window() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        assert!(matches!(
            cache.resolve("unknown").await,
            Err(KeySetError::KeyNotFound)
        ));
        assert!(matches!(
            cache.resolve("also-unknown").await,
            Err(KeySetError::KeyNotFound)
        ));

        // Startup fetch plus a single unknown-kid refresh
        assert_eq!(fetch_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_unknown_kid_share_one_fetch() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        let lookups = (0..8).map(|i| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve(&format!("rotated-{i}")).await })
        });

        for handle in lookups {
            assert!(handle.await.unwrap().is_err());
        }

        assert_eq!(fetch_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_cancelled_unknown_kid_refresh_leaves_window_open() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [rsa_jwk("k1"), ed_jwk("k2")] }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        // Caller goes away while the fetch is in flight
        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve("k2").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert_eq!(cache.generation(), 1);

        // The next miss may still refresh
        let key = cache.resolve("k2").await.unwrap();

        assert_eq!(key.kid(), "k2");
        assert_eq!(cache.generation(), 2);
        assert_eq!(fetch_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_failed_unknown_kid_refresh_closes_window() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(cache.resolve("k2").await.is_err());
        assert!(cache.resolve("k2").await.is_err());

        assert_eq!(fetch_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_picks_up_rotated_key() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("old")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();

        server.reset().await;
        mount_keys(&server, vec![rsa_jwk("old"), ed_jwk("new")]).await;

        let key = cache.resolve("new").await.unwrap();

        assert_eq!(key.kid(), "new");
        assert_eq!(cache.generation(), 2);
        assert!(cache.current().get("old").is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_set() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let cache = KeySetCache::init(test_config(&server)).await.unwrap();
        let before = cache.current();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = cache.refresh(RefreshTrigger::Scheduled).await;

        assert!(matches!(result, Err(KeySetError::Status(503))));
        assert!(Arc::ptr_eq(&before, &cache.current()));
        assert_eq!(cache.generation(), 1);
        assert!(cache.resolve("k1").await.is_ok());
    }

    #[tokio::test]
    async fn test_stalled_refresh_is_abandoned() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let mut config = test_config(&server);
        config.fetch_timeout = Duration::from_millis(300);
        let cache = KeySetCache::init(config).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"keys": [rsa_jwk("k2")]}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let started = Instant::now();
        let result = cache.resolve("k2").await;

        assert!(matches!(result, Err(KeySetError::KeyNotFound)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(cache.current().get("k1").is_some());
    }

    #[tokio::test]
    async fn test_refresh_task_runs_and_stops_on_cancel() {
        let server = MockServer::start().await;
        mount_keys(&server, vec![rsa_jwk("k1")]).await;

        let mut config = test_config(&server);
        config.refresh_interval = Duration::from_millis(100);
        let cache = KeySetCache::init(config).await.unwrap();

        let mut updates = cache.subscribe();
        let cancel_token = CancellationToken::new();
        let task = cache.spawn_refresh_task(cancel_token.clone());

        tokio::time::timeout(Duration::from_secs(2), updates.changed())
            .await
            .expect("scheduled refresh should publish a new set")
            .unwrap();
        assert!(cache.generation() >= 2);

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("refresh task should stop after cancellation")
            .unwrap();
    }
}
