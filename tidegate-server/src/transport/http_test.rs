#[cfg(test)]
mod tests {
    use crate::config::{Args, Config};
    use crate::gate::{self, Gate};
    use crate::transport::http::router;
    use crate::types::{CheckResponse, StatsResponse, UnbanResponse};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
    use clap::Parser;
    use serde_json::json;
    use tower::ServiceExt;

    fn test_gate(max_requests: u32, burst: u32, ban_threshold: u32) -> Gate {
        let args = Args::parse_from([
            "tidegate",
            "--max-requests",
            &max_requests.to_string(),
            "--burst-capacity",
            &burst.to_string(),
            "--ban-threshold",
            &ban_threshold.to_string(),
        ]);
        gate::build(&Config::from_args(args).unwrap())
    }

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(app: &Router, uri: &str) -> axum::response::Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn check_body(route: &str, addr: &str, user_id: Option<u64>, timestamp: u64) -> serde_json::Value {
        json!({
            "route": route,
            "addr": addr,
            "user_id": user_id,
            "timestamp": timestamp,
        })
    }

    #[tokio::test]
    async fn test_check_allows_and_sets_quota_headers() {
        let app = router(test_gate(2, 5, 5));

        let response = post_json(
            &app,
            "/v1/check",
            check_body("/api/orders", "203.0.113.5", Some(1), 1_700_000_000),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers["x-ratelimit-limit"], "2");
        assert_eq!(headers["x-ratelimit-remaining"], "1");
        assert_eq!(headers["x-ratelimit-reset"], "1700000060");
        assert!(headers.get("retry-after").is_none());

        let body: CheckResponse = body_json(response).await;
        assert!(body.allowed);
        assert_eq!(body.reason, None);
        assert_eq!(body.scope, "default");
    }

    #[tokio::test]
    async fn test_denied_check_gets_429_with_retry_after() {
        let app = router(test_gate(2, 5, 5));
        let at = 1_700_000_000;

        for _ in 0..2 {
            let response = post_json(
                &app,
                "/v1/check",
                check_body("/api/orders", "203.0.113.5", Some(1), at),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = post_json(
            &app,
            "/v1/check",
            check_body("/api/orders", "203.0.113.5", Some(1), at),
        )
        .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");

        let body: CheckResponse = body_json(response).await;
        assert!(!body.allowed);
        assert_eq!(body.reason.as_deref(), Some("rate_limited"));
        assert_eq!(body.retry_after, 60);
    }

    #[tokio::test]
    async fn test_ban_and_unban_flow() {
        let app = router(test_gate(1, 1, 2));
        // Anchored to the wall clock: unban reads the ban record at real time.
        let t0 = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let check = |at: u64| check_body("/api/orders", "203.0.113.5", Some(482), at);

        // Admit, then two violations: the second crosses the ban threshold.
        assert_eq!(post_json(&app, "/v1/check", check(t0)).await.status(), StatusCode::OK);

        let body: CheckResponse = body_json(post_json(&app, "/v1/check", check(t0 + 1)).await).await;
        assert_eq!(body.reason.as_deref(), Some("rate_limited"));

        let body: CheckResponse = body_json(post_json(&app, "/v1/check", check(t0 + 2)).await).await;
        assert_eq!(body.reason.as_deref(), Some("banned"));
        assert_eq!(body.retry_after, 3600);

        // Still banned, window state notwithstanding.
        let body: CheckResponse = body_json(post_json(&app, "/v1/check", check(t0 + 3)).await).await;
        assert_eq!(body.reason.as_deref(), Some("banned"));

        // Clear the ban; the client is evaluated normally again.
        let response = post_json(&app, "/v1/admin/unban", json!({"client_key": "user:482"})).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: UnbanResponse = body_json(response).await;
        assert!(body.cleared);

        let body: CheckResponse = body_json(post_json(&app, "/v1/check", check(t0 + 70)).await).await;
        assert!(body.allowed);
    }

    #[tokio::test]
    async fn test_unban_without_ban_reports_not_cleared() {
        let app = router(test_gate(2, 5, 5));
        let response = post_json(&app, "/v1/admin/unban", json!({"client_key": "user:9"})).await;
        let body: UnbanResponse = body_json(response).await;
        assert!(!body.cleared);
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(test_gate(2, 5, 5));
        let response = get(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_reports_decisions() {
        let app = router(test_gate(1, 5, 5));
        let at = 1_700_000_000;

        post_json(&app, "/v1/check", check_body("/a", "203.0.113.5", None, at)).await;
        post_json(&app, "/v1/check", check_body("/a", "203.0.113.5", None, at)).await;

        let body: StatsResponse = body_json(get(&app, "/v1/admin/stats").await).await;
        assert_eq!(body.metrics.requests_allowed, 1);
        assert_eq!(body.metrics.requests_denied, 1);
        assert_eq!(body.metrics.total_clients, 1);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let app = router(test_gate(2, 5, 5));
        post_json(
            &app,
            "/v1/check",
            check_body("/a", "203.0.113.5", None, 1_700_000_000),
        )
        .await;

        let response = get(&app, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("tidegate_requests_total 1"));
        assert!(text.contains("tidegate_requests_allowed 1"));
        assert!(text.contains("tidegate_clients_total 1"));
    }

    #[tokio::test]
    async fn test_malformed_check_is_a_client_error() {
        let app = router(test_gate(2, 5, 5));
        let response = post_json(&app, "/v1/check", json!({"route": "/a"})).await;
        assert!(response.status().is_client_error());
    }
}
