//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real gateway instances in tests,
//! wired to a mock identity provider and an in-memory report store.

use crate::mock_jwks::MockJwksServer;
use crate::test_keys::TestKeypair;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use reports_gateway::auth::{KeySetCache, KeySetConfig, TokenVerifier};
use reports_gateway::config::{Config, StoreFailurePolicy};
use reports_gateway::observability::init_metrics_recorder;
use reports_gateway::repositories::ReportStore;
use reports_gateway::routes::{self, AppState};
use reports_gateway::services::{ReportGateway, RetryPolicy};
use reports_gateway::tls::install_crypto_provider;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Realm name used by every harness instance.
pub const TEST_REALM: &str = "reports";

/// Global metrics handle for test servers
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Knobs for `TestGatewayServer::spawn_with`.
pub struct HarnessOptions {
    pub store: Arc<dyn ReportStore>,
    pub failure_policy: StoreFailurePolicy,
    /// Require `iss` to equal the mock realm's issuer.
    pub check_issuer: bool,
    /// JWKs published next to the harness keypair.
    pub extra_jwks: Vec<Value>,
    /// Extra environment-style config overrides.
    pub vars: HashMap<String, String>,
}

impl HarnessOptions {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self {
            store,
            failure_policy: StoreFailurePolicy::Surface,
            check_issuer: false,
            extra_jwks: Vec::new(),
            vars: HashMap::new(),
        }
    }

    pub fn failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn check_issuer(mut self) -> Self {
        self.check_issuer = true;
        self
    }

    /// Publish `jwk` in the realm's key set as well.
    pub fn publish(mut self, jwk: Value) -> Self {
        self.extra_jwks.push(jwk);
        self
    }

    pub fn var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

/// Test harness for spawning the gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_reports_flow() -> Result<()> {
///     let store = Arc::new(InMemoryReportStore::new(rows));
///     let server = TestGatewayServer::spawn(store).await?;
///     let token = server.keypair().sign(&valid_claims("alice@example.com"));
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/reports", server.url()))
///         .bearer_auth(token)
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    config: Config,
    keypair: TestKeypair,
    jwks: MockJwksServer,
    key_set: Arc<KeySetCache>,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a server using `store` with default options.
    pub async fn spawn(store: Arc<dyn ReportStore>) -> Result<Self, anyhow::Error> {
        Self::spawn_with(HarnessOptions::new(store)).await
    }

    /// Spawn a server.
    ///
    /// The server will:
    /// - Fetch its key set from a fresh mock identity provider that
    ///   publishes the harness keypair (kid `test-key-1`) plus any
    ///   `extra_jwks`
    /// - Retry failed store reads with millisecond backoff
    /// - Bind to a random available port (127.0.0.1:0)
    pub async fn spawn_with(options: HarnessOptions) -> Result<Self, anyhow::Error> {
        install_crypto_provider();

        let keypair = TestKeypair::new(42, "test-key-1");
        let mut published = vec![keypair.jwk_json()];
        published.extend(options.extra_jwks);
        let jwks =
            MockJwksServer::start_with_document(TEST_REALM, json!({ "keys": published })).await;

        let mut vars = HashMap::from([
            ("KEYCLOAK_URL".to_string(), jwks.uri()),
            ("REALM".to_string(), TEST_REALM.to_string()),
            (
                "CLICKHOUSE_URL".to_string(),
                "http://127.0.0.1:1".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        if options.check_issuer {
            vars.insert("JWT_EXPECTED_ISSUER".to_string(), jwks.issuer());
        }
        vars.extend(options.vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let key_set = KeySetCache::init(KeySetConfig::from_config(&config))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load key set: {}", e))?;

        let clock_skew = Duration::from_secs(config.jwt_clock_skew_seconds.unsigned_abs());
        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&key_set),
            clock_skew,
            config.expected_issuer.clone(),
        ));

        let gateway = Arc::new(
            ReportGateway::new(options.store, options.failure_policy).with_retry(RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            }),
        );

        let state = Arc::new(AppState {
            verifier,
            gateway,
        });

        let app = routes::build_routes(state, get_test_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            keypair,
            jwks,
            key_set,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Keypair published by the mock identity provider.
    pub fn keypair(&self) -> &TestKeypair {
        &self.keypair
    }

    pub fn jwks(&self) -> &MockJwksServer {
        &self.jwks
    }

    pub fn key_set(&self) -> &Arc<KeySetCache> {
        &self.key_set
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
