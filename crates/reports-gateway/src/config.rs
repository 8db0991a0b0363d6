//! Reports gateway configuration.
//!
//! Configuration is loaded from environment variables. The analytics store
//! password is held as a `SecretString` and redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default interval between scheduled key-set refreshes (1 hour).
pub const DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS: u64 = 3600;

/// Default minimum spacing between unknown-kid refreshes (5 minutes).
pub const DEFAULT_JWKS_REFRESH_RATE_LIMIT_SECONDS: u64 = 300;

/// Default timeout for a single key-set fetch.
pub const DEFAULT_JWKS_REFRESH_TIMEOUT_SECONDS: u64 = 10;

/// Default timeout for a single report query attempt.
pub const DEFAULT_STORE_QUERY_TIMEOUT_SECONDS: u64 = 5;

/// Default ClickHouse database.
pub const DEFAULT_CLICKHOUSE_DATABASE: &str = "default";

/// Default ClickHouse user.
pub const DEFAULT_CLICKHOUSE_USERNAME: &str = "default";

/// What the gateway does when the report store cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailurePolicy {
    /// Respond 503 so callers can tell an outage from "no records".
    Surface,

    /// Log the failure and respond 200 with whatever rows were collected.
    DegradeToEmpty,
}

impl FromStr for StoreFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(StoreFailurePolicy::Surface),
            "empty" => Ok(StoreFailurePolicy::DegradeToEmpty),
            other => Err(ConfigError::InvalidStoreFailurePolicy(format!(
                "STORE_FAILURE_POLICY must be 'surface' or 'empty', got '{}'",
                other
            ))),
        }
    }
}

/// Reports gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Identity provider base URL (e.g., "http://localhost:8080").
    pub keycloak_url: String,

    /// Identity provider realm name.
    pub realm: String,

    /// Expected `iss` claim. `None` (unset) skips the issuer check; `iss`
    /// carries the host the client used, not necessarily `keycloak_url`.
    pub expected_issuer: Option<String>,

    /// Interval between scheduled key-set refreshes.
    pub jwks_refresh_interval: Duration,

    /// Minimum spacing between refreshes triggered by unknown key IDs.
    pub jwks_refresh_rate_limit: Duration,

    /// Timeout for a single key-set fetch.
    pub jwks_refresh_timeout: Duration,

    /// JWT clock skew tolerance in seconds.
    pub jwt_clock_skew_seconds: i64,

    /// ClickHouse HTTP endpoint (e.g., "http://127.0.0.1:8123").
    pub clickhouse_url: String,

    /// ClickHouse database holding the `reports` table.
    pub clickhouse_database: String,

    /// ClickHouse user.
    pub clickhouse_username: String,

    /// ClickHouse password.
    pub clickhouse_password: SecretString,

    /// Timeout for a single report query attempt.
    pub store_query_timeout: Duration,

    /// Behavior when the report store fails.
    pub store_failure_policy: StoreFailurePolicy,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("keycloak_url", &self.keycloak_url)
            .field("realm", &self.realm)
            .field("expected_issuer", &self.expected_issuer)
            .field("jwks_refresh_interval", &self.jwks_refresh_interval)
            .field("jwks_refresh_rate_limit", &self.jwks_refresh_rate_limit)
            .field("jwks_refresh_timeout", &self.jwks_refresh_timeout)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("clickhouse_url", &self.clickhouse_url)
            .field("clickhouse_database", &self.clickhouse_database)
            .field("clickhouse_username", &self.clickhouse_username)
            .field("clickhouse_password", &"[REDACTED]")
            .field("store_query_timeout", &self.store_query_timeout)
            .field("store_failure_policy", &self.store_failure_policy)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid store failure policy: {0}")]
    InvalidStoreFailurePolicy(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let keycloak_url = required(vars, "KEYCLOAK_URL")?
            .trim_end_matches('/')
            .to_string();
        let realm = required(vars, "REALM")?;
        let clickhouse_url = required(vars, "CLICKHOUSE_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let expected_issuer = vars
            .get("JWT_EXPECTED_ISSUER")
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let jwks_refresh_interval = duration_secs(
            vars,
            "JWKS_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_REFRESH_INTERVAL_SECONDS,
        )?;
        let jwks_refresh_rate_limit = duration_secs(
            vars,
            "JWKS_REFRESH_RATE_LIMIT_SECONDS",
            DEFAULT_JWKS_REFRESH_RATE_LIMIT_SECONDS,
        )?;
        let jwks_refresh_timeout = duration_secs(
            vars,
            "JWKS_REFRESH_TIMEOUT_SECONDS",
            DEFAULT_JWKS_REFRESH_TIMEOUT_SECONDS,
        )?;
        let store_query_timeout = duration_secs(
            vars,
            "STORE_QUERY_TIMEOUT_SECONDS",
            DEFAULT_STORE_QUERY_TIMEOUT_SECONDS,
        )?;

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let clickhouse_database = vars
            .get("CLICKHOUSE_DATABASE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLICKHOUSE_DATABASE.to_string());

        let clickhouse_username = vars
            .get("CLICKHOUSE_USERNAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLICKHOUSE_USERNAME.to_string());

        let clickhouse_password =
            SecretString::from(vars.get("CLICKHOUSE_PASSWORD").cloned().unwrap_or_default());

        let store_failure_policy = match vars.get("STORE_FAILURE_POLICY") {
            Some(value) => value.parse()?,
            None => StoreFailurePolicy::Surface,
        };

        Ok(Config {
            bind_address,
            keycloak_url,
            realm,
            expected_issuer,
            jwks_refresh_interval,
            jwks_refresh_rate_limit,
            jwks_refresh_timeout,
            jwt_clock_skew_seconds,
            clickhouse_url,
            clickhouse_database,
            clickhouse_username,
            clickhouse_password,
            store_query_timeout,
            store_failure_policy,
        })
    }

    /// URL of the realm's published signing keys.
    pub fn jwks_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/certs",
            self.keycloak_url, self.realm
        )
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Parse a positive number of seconds, falling back to `default` when unset.
fn duration_secs(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}
