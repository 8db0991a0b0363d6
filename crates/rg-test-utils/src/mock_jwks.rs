//! Mock identity provider.
//!
//! Serves a realm's JWKS document at the same path the identity provider
//! does, so the gateway can be pointed at it through `KEYCLOAK_URL`.

use crate::test_keys::{jwks_document, TestKeypair};
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Wiremock server publishing a realm's signing keys.
pub struct MockJwksServer {
    server: MockServer,
    realm: String,
}

impl MockJwksServer {
    /// Start a server publishing `keys` for `realm`.
    pub async fn start(realm: &str, keys: &[&TestKeypair]) -> Self {
        Self::start_with_document(realm, jwks_document(keys)).await
    }

    /// Start a server publishing an arbitrary JWKS document.
    pub async fn start_with_document(realm: &str, document: Value) -> Self {
        let mock = Self {
            server: MockServer::start().await,
            realm: realm.to_string(),
        };
        mock.serve(ResponseTemplate::new(200).set_body_json(document))
            .await;
        mock
    }

    /// Base URL, usable as `KEYCLOAK_URL`.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Issuer the identity provider would put in `iss`.
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.uri(), self.realm)
    }

    pub fn jwks_path(&self) -> String {
        format!("/realms/{}/protocol/openid-connect/certs", self.realm)
    }

    /// Replace the published keys. Request history is cleared.
    pub async fn set_keys(&self, keys: &[&TestKeypair]) {
        self.server.reset().await;
        self.serve(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .await;
    }

    /// Replace the published document with an arbitrary response body.
    pub async fn set_document(&self, document: Value) {
        self.server.reset().await;
        self.serve(ResponseTemplate::new(200).set_body_json(document))
            .await;
    }

    /// Make the endpoint fail with `status`.
    pub async fn set_failing(&self, status: u16) {
        self.server.reset().await;
        self.serve(ResponseTemplate::new(status)).await;
    }

    /// Number of JWKS fetches since start or the last reset.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    async fn serve(&self, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(self.jwks_path()))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}
