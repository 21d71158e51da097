mod common;

use {
    axum::{
        body::Body,
        http::{Request, StatusCode, header::CONTENT_TYPE},
    },
    common::*,
    payflow::transport::http::router,
    serde_json::{Value, json},
    tower::ServiceExt,
};

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let response = router(h.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let correlation = response
        .headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, correlation)
}

fn payment_body(amount: Value) -> Value {
    json!({
        "amount": amount,
        "currency": "USD",
        "customerId": "c1",
        "orderId": "o1",
        "returnUrl": "https://x/r",
        "cancelUrl": "https://x/c",
    })
}

fn post_payment(key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/payments")
        .header(CONTENT_TYPE, "application/json")
        .header("X-Correlation-Id", "trace-42");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn create_payment_and_replay_with_same_key() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;

    let (status, body, correlation) =
        send(&h, post_payment(Some("K1"), &payment_body(json!(100.00)))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["amount"], "100.00");
    assert!(!body["providerTransactionId"].as_str().unwrap().is_empty());
    assert_eq!(correlation.as_deref(), Some("trace-42"), "correlation id echoed");

    let (replay_status, replay_body, _) =
        send(&h, post_payment(Some("K1"), &payment_body(json!(100.00)))).await;
    assert_eq!(replay_status, StatusCode::CREATED);
    assert_eq!(replay_body["transactionId"], body["transactionId"]);
    assert_eq!(replay_body["providerTransactionId"], body["providerTransactionId"]);
}

#[tokio::test]
async fn validation_failures_are_bad_requests() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;

    // Missing idempotency key.
    let (status, body, _) = send(&h, post_payment(None, &payment_body(json!(100.00)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "IDEMPOTENCY_KEY_REQUIRED");
    assert_eq!(body["path"], "/v1/payments");
    assert!(body["timestamp"].is_string());
    assert!(body["correlationId"].is_string());

    // Negative amount.
    let (status, body, _) =
        send(&h, post_payment(Some("K2"), &payment_body(json!(-10.00)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");

    // Over-precise amount never reaches the orchestrator.
    let (status, _, _) =
        send(&h, post_payment(Some("K3"), &payment_body(json!("10.001")))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Plain-http callback URL.
    let mut body_bad_url = payment_body(json!(100.00));
    body_bad_url["returnUrl"] = json!("http://x/r");
    let (status, body, _) = send(&h, post_payment(Some("K4"), &body_bad_url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn unsupported_currency_is_service_unavailable_and_persists_nothing() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;

    let mut body = payment_body(json!(100.00));
    body["currency"] = json!("ZZZ");
    let (status, error_body, _) = send(&h, post_payment(Some("K5"), &body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_body["error"], "NO_ELIGIBLE_PROVIDER");

    assert!(
        h.backends
            .payments
            .get_by_idempotency_key("K5")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn provider_failure_still_returns_created_with_failed_payload() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "fail", &["USD"], 10).await;

    let (status, body, _) = send(&h, post_payment(Some("K6"), &payment_body(json!(100.00)))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "FAILED");
    assert_eq!(body["errorMessage"], "card declined");
    assert_eq!(body["providerErrorCode"], "card_declined");
    assert!(!body["transactionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn get_payment_roundtrip_and_404() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;

    let (_, created, _) = send(&h, post_payment(Some("K7"), &payment_body(json!(55)))).await;
    let id = created["transactionId"].as_str().unwrap().to_string();

    let (status, fetched, _) = send(
        &h,
        Request::builder()
            .uri(format!("/v1/payments/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["transactionId"], created["transactionId"]);
    assert_eq!(fetched["amount"], "55.00");

    let (status, _, _) = send(
        &h,
        Request::builder()
            .uri(format!("/v1/payments/{}", uuid::Uuid::now_v7()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refund_endpoint_enforces_state_and_amounts() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "succeed", &["USD"], 10).await;

    let (_, created, _) = send(&h, post_payment(Some("K8"), &payment_body(json!(100.00)))).await;
    let id = created["transactionId"].as_str().unwrap().to_string();

    let refund = |key: &str, body: Value| {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/payments/{id}/refund"))
            .header(CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", key)
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status, body, _) = send(&h, refund("R1", json!({"amount": 50.00}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(body["amount"], "50.00");

    let (status, parent, _) = send(
        &h,
        Request::builder()
            .uri(format!("/v1/payments/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parent["status"], "PARTIALLY_REFUNDED");

    // Second refund exceeding the remainder.
    let (status, body, _) = send(&h, refund("R2", json!({"amount": 60.00}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "EXCESSIVE_AMOUNT");
}

#[tokio::test]
async fn provider_admin_surface_elides_credentials() {
    let h = harness();

    let create = Request::builder()
        .method("POST")
        .uri("/v1/providers")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "name": "sandbox",
                "displayName": "Sandbox",
                "supportedCurrencies": ["USD", "EUR"],
                "priority": 5,
                "credentials": {"behavior": "succeed", "webhook_secret": "whsec_x"},
                "configurations": [
                    {"region": "global", "baseUrl": "https://sandbox.test"}
                ],
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body, _) = send(&h, create).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "sandbox");
    assert!(body.get("credentials").is_none(), "credentials never serialized");
    let id = body["id"].as_str().unwrap().to_string();

    let (status, list, _) = send(
        &h,
        Request::builder()
            .uri("/v1/providers/active?currency=EUR")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _, _) = send(
        &h,
        Request::builder()
            .uri("/v1/providers/active?currency=THB")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Disable through PATCH, then soft delete.
    let (status, patched, _) = send(
        &h,
        Request::builder()
            .method("PATCH")
            .uri(format!("/v1/providers/{id}/status"))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"status": "DISABLED"}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["status"], "DISABLED");

    let (status, _, _) = send(
        &h,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v1/providers/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(
        &h,
        Request::builder()
            .uri(format!("/v1/providers/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_route_statuses() {
    let h = harness();
    register_sandbox(&h.state, "sandbox", "pending", &["USD"], 10).await;

    let (_, created, _) = send(&h, post_payment(Some("K9"), &payment_body(json!(10)))).await;
    let provider_txn_id = created["providerTransactionId"].as_str().unwrap().to_string();

    let event = json!({
        "id": "evt_http_1",
        "type": "payment.succeeded",
        "object": "payment",
        "paymentId": provider_txn_id,
        "status": "succeeded",
    })
    .to_string();

    let webhook = |body: &str, signature: &str| {
        Request::builder()
            .method("POST")
            .uri("/v1/webhooks/sandbox")
            .header(CONTENT_TYPE, "application/json")
            .header("X-Sandbox-Signature", signature)
            .header("x-forwarded-for", "203.0.113.10")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status, body, _) = send(&h, webhook(&event, &sandbox_signature(&event))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");

    let (status, body, _) = send(&h, webhook(&event, &sandbox_signature(&event))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_duplicate"], true);

    let (status, body, _) = send(&h, webhook(&event, "bad-signature")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "webhook rejected", "reason not disclosed");

    let (status, _, _) = send(
        &h,
        Request::builder()
            .method("POST")
            .uri("/v1/webhooks/ghost")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(event))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_rate_limit_returns_429() {
    let h = harness_with(fast_resilience(), 2);
    register_sandbox(&h.state, "sandbox", "pending", &["USD"], 10).await;

    let request = |i: usize| {
        let body = json!({
            "id": format!("evt_limit_{i}"),
            "type": "payment.succeeded",
            "object": "payment",
            "paymentId": "sbx_none",
            "status": "succeeded",
        })
        .to_string();
        Request::builder()
            .method("POST")
            .uri("/v1/webhooks/sandbox")
            .header(CONTENT_TYPE, "application/json")
            .header("X-Sandbox-Signature", sandbox_signature(&body))
            .header("x-forwarded-for", "203.0.113.20")
            .body(Body::from(body))
            .unwrap()
    };

    for i in 0..2 {
        let (status, _, _) = send(&h, request(i)).await;
        assert_ne!(status, StatusCode::TOO_MANY_REQUESTS, "hit {i} within limit");
    }
    let (status, body, _) = send(&h, request(2)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
}
