//! Liveness handler.

/// Handler for GET /health
///
/// Returns "OK" whenever the process can serve requests. The key set is
/// loaded before the listener binds, so a running server always has keys.
#[tracing::instrument(skip_all, name = "rg.health.check")]
pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check_returns_ok() {
        assert_eq!(health_check().await, "OK");
    }
}
