//! HTTP readiness and tunnel-verification polling loops.

use std::time::Duration;

use tracing::debug;

/// Poll `url` until it returns any non-5xx response or the attempt budget
/// elapses. Returns `true` if the service became ready.
pub async fn wait_for_service_ready(
    client: &reqwest::Client,
    url: &str,
    attempts: u32,
    delay: Duration,
    per_request_timeout: Duration,
) -> bool {
    for attempt in 1..=attempts {
        let result = tokio::time::timeout(per_request_timeout, client.get(url).send()).await;
        match result {
            Ok(Ok(resp)) if !resp.status().is_server_error() => {
                debug!(url, attempt, status = %resp.status(), "service ready");
                return true;
            }
            Ok(Ok(resp)) => debug!(url, attempt, status = %resp.status(), "service not ready yet"),
            Ok(Err(e)) => debug!(url, attempt, error = %e, "readiness probe failed"),
            Err(_) => debug!(url, attempt, "readiness probe timed out"),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    false
}

/// Two-phase tunnel verification: a couple of quick `HEAD` checks, then a
/// handful of `GET` attempts with exponential backoff. Returns `true` once
/// any attempt succeeds.
pub async fn verify_tunnel_url(
    client: &reqwest::Client,
    url: &str,
    request_timeout: Duration,
) -> bool {
    for _ in 0..2 {
        let result = tokio::time::timeout(request_timeout, client.head(url).send()).await;
        if matches!(result, Ok(Ok(resp)) if !resp.status().is_server_error()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let mut backoff = Duration::from_secs(2);
    let cap = Duration::from_secs(15);
    for _ in 0..6 {
        let result = tokio::time::timeout(request_timeout, client.get(url).send()).await;
        if matches!(result, Ok(Ok(resp)) if !resp.status().is_server_error()) {
            return true;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(cap);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn readiness_succeeds_on_first_non_5xx_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let client = reqwest::Client::new();
        let ready =
            wait_for_service_ready(&client, &server.uri(), 3, Duration::from_millis(10), Duration::from_secs(1)).await;
        assert!(ready);
    }

    #[tokio::test]
    async fn readiness_gives_up_after_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let client = reqwest::Client::new();
        let ready =
            wait_for_service_ready(&client, &server.uri(), 2, Duration::from_millis(5), Duration::from_secs(1)).await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn tunnel_verification_succeeds_on_head_probe() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let client = reqwest::Client::new();
        let verified = verify_tunnel_url(&client, &server.uri(), Duration::from_secs(1)).await;
        assert!(verified);
    }
}
