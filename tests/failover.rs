mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use common::{Reply, ScriptedClient, ordered_service, service};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use openai_gateway::{
    ForwardRequest, GatewayError,
    config::SelectionStrategy,
    core::{AttemptFailure, RequestBody, ResponseBody},
};
use serde_json::json;

fn chat_request() -> ForwardRequest {
    ForwardRequest::new(Method::POST, "/openai/deployments/gpt/chat/completions")
        .with_body(RequestBody::Json(json!({"messages": [{"role": "user", "content": "hi"}]})))
}

#[tokio::test]
async fn test_exhaustion_returns_last_failure() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(429, json!({"error": {"message": "rate limited"}})))
            .reply("b", Reply::Json(500, json!({"error": {"message": "boom"}})))
            .reply("c", Reply::Transport("connection refused")),
    );
    let gateway = ordered_service(&["a", "b", "c"], client.clone());

    let err = gateway.forward(&chat_request()).await.unwrap_err();

    assert_eq!(client.hosts(), vec!["a", "b", "c"]);
    match &err {
        GatewayError::AllInstancesFailed {
            last_failure: Some(failure),
        } => {
            assert!(matches!(**failure, AttemptFailure::Transport { .. }));
            assert_eq!(failure.instance(), "c");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    // The caller never sees instance names
    assert!(!err.client_body().to_string().contains("\"c\""));
}

#[tokio::test]
async fn test_exhaustion_keeps_last_upstream_status_and_body() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Transport("refused"))
            .reply("b", Reply::Json(429, json!({"error": {"message": "slow down"}}))),
    );
    let gateway = ordered_service(&["a", "b"], client);

    let err = gateway.forward(&chat_request()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(err.client_body(), json!({"error": {"message": "slow down"}}));
}

#[tokio::test]
async fn test_non_json_error_body_is_wrapped() {
    let client = Arc::new(ScriptedClient::new().reply("a", Reply::Text(503, "upstream down")));
    let gateway = ordered_service(&["a"], client);

    let err = gateway.forward(&chat_request()).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body = err.client_body();
    assert_eq!(body["error"]["message"], "upstream down");
}

#[tokio::test]
async fn test_early_success_stops_failover() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Transport("refused"))
            .reply("b", Reply::Json(200, json!({"id": "chatcmpl-1"})))
            .reply("c", Reply::Json(200, json!({"id": "never"}))),
    );
    let gateway = ordered_service(&["a", "b", "c"], client.clone());

    let response = gateway.forward(&chat_request()).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, ResponseBody::Json(json!({"id": "chatcmpl-1"})));
    assert_eq!(client.hosts(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_each_instance_tried_at_most_once() {
    let names = ["a", "b", "c", "d", "e"];
    let mut scripted = ScriptedClient::new();
    for name in names {
        scripted = scripted.reply(name, Reply::Json(500, json!({"error": name})));
    }
    let client = Arc::new(scripted);
    let gateway = service(&names, client.clone());

    for _ in 0..10 {
        let _ = gateway.forward(&chat_request()).await;
    }

    let calls = client.hosts();
    assert_eq!(calls.len(), 50);
    for attempt in calls.chunks(names.len()) {
        let distinct: HashSet<_> = attempt.iter().collect();
        assert_eq!(distinct.len(), names.len());
    }
}

#[tokio::test]
async fn test_empty_registry_makes_no_call() {
    let client = Arc::new(ScriptedClient::new());
    let gateway = service(&[], client.clone());

    let err = gateway.forward(&chat_request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoInstancesConfigured));
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let err = gateway.forward_round_robin(&chat_request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoInstancesConfigured));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn test_outbound_request_shape() {
    let client = Arc::new(ScriptedClient::new().reply("a", Reply::Json(200, json!({}))));
    let gateway = ordered_service(&["a"], client.clone());

    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("gateway.local"));
    headers.insert("content-length", HeaderValue::from_static("999"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
    headers.insert("authorization", HeaderValue::from_static("Bearer inbound"));
    headers.insert("x-trace", HeaderValue::from_static("t-1"));

    let request = ForwardRequest::new(Method::POST, "/openai/openai/embeddings?api-version=2024-02-01")
        .with_headers(headers)
        .with_body(RequestBody::Json(json!({"input": "x"})));
    gateway.forward(&request).await.unwrap();

    let call = &client.calls()[0];
    assert_eq!(call.uri, "http://a/openai/embeddings?api-version=2024-02-01");
    assert_eq!(call.headers.get("api-key").unwrap(), "key-a");
    assert_eq!(call.headers.get("authorization").unwrap(), "Bearer inbound");
    assert_eq!(call.headers.get("x-trace").unwrap(), "t-1");
    assert_eq!(call.headers.get("content-type").unwrap(), "application/json");
    assert!(call.headers.get("host").is_none());
    assert!(call.headers.get("accept-encoding").is_none());
    assert!(call.headers.get("connection").is_none());
    let sent: serde_json::Value = serde_json::from_slice(&call.body).unwrap();
    assert_eq!(sent, json!({"input": "x"}));
}

#[tokio::test]
async fn test_success_with_text_body() {
    let client = Arc::new(ScriptedClient::new().reply("a", Reply::Text(200, "plain answer")));
    let gateway = ordered_service(&["a"], client);

    let response = gateway
        .forward(&ForwardRequest::new(Method::GET, "/openai/models"))
        .await
        .unwrap();
    assert_eq!(response.body, ResponseBody::Text("plain answer".to_string()));
}

#[tokio::test]
async fn test_binary_body_is_relayed_unchanged() {
    const MP3: &[u8] = &[73, 68, 51, 255, 251, 144, 0];
    let client = Arc::new(ScriptedClient::new().reply("a", Reply::Binary(MP3, "audio/mpeg")));
    let gateway = ordered_service(&["a"], client);

    let response = gateway
        .forward(
            &ForwardRequest::new(Method::POST, "/audio/speech")
                .with_body(RequestBody::Json(json!({"input": "hi"}))),
        )
        .await
        .unwrap();

    assert_eq!(response.body, ResponseBody::Raw(bytes::Bytes::from_static(MP3)));
    assert_eq!(response.headers.get("content-type").unwrap(), "audio/mpeg");
}

#[tokio::test]
async fn test_attempt_timeout_is_transport_failure() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Hang)
            .reply("b", Reply::Json(200, json!({"ok": true}))),
    );
    let gateway = openai_gateway::GatewayService::with_registry(
        common::registry(&["a", "b"]),
        client.clone(),
        openai_gateway::core::ForwardSettings {
            request_timeout: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(50),
        },
    )
    .with_strategy(Box::new(common::InOrder));

    let response = gateway.forward(&chat_request()).await.unwrap();
    assert_eq!(response.body, ResponseBody::Json(json!({"ok": true})));
    assert_eq!(client.hosts(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_round_robin_rotation_and_exhaustion() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(200, json!({"from": "a"})))
            .reply("b", Reply::Json(200, json!({"from": "b"})))
            .reply("c", Reply::Json(200, json!({"from": "c"}))),
    );
    let gateway = service(&["a", "b", "c"], client.clone());

    for _ in 0..6 {
        gateway.forward_round_robin(&chat_request()).await.unwrap();
    }
    assert_eq!(client.hosts(), vec!["a", "b", "c", "a", "b", "c"]);

    let failing = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(500, json!({"error": "a"})))
            .reply("b", Reply::Transport("refused")),
    );
    let gateway = service(&["a", "b"], failing.clone());
    let err = gateway.forward_round_robin(&chat_request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::AllInstancesUnavailable));
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(failing.hosts(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_forward_with_policy_follows_configuration() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(200, json!({})))
            .reply("b", Reply::Json(200, json!({}))),
    );
    let gateway = service(&["a", "b"], client.clone())
        .with_default_policy(SelectionStrategy::RoundRobin);

    for _ in 0..4 {
        gateway.forward_with_policy(&chat_request()).await.unwrap();
    }
    assert_eq!(client.hosts(), vec!["a", "b", "a", "b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_round_robin_is_fair() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(200, json!({})))
            .reply("b", Reply::Json(200, json!({})))
            .reply("c", Reply::Json(200, json!({}))),
    );
    let gateway = Arc::new(service(&["a", "b", "c"], client.clone()));

    let tasks: Vec<_> = (0..30)
        .map(|_| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.forward_round_robin(&chat_request()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let hosts = client.hosts();
    for name in ["a", "b", "c"] {
        assert_eq!(hosts.iter().filter(|h| *h == name).count(), 10);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_run_concurrently() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(200, json!({})))
            .delay("a", Duration::from_millis(100)),
    );
    let gateway = Arc::new(service(&["a"], client.clone()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.forward(&chat_request()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(client.max_concurrency() > 1);
}

#[tokio::test]
async fn test_cancelled_call_releases_in_flight_slot() {
    let client = Arc::new(ScriptedClient::new().reply("a", Reply::Hang));
    let gateway = Arc::new(service(&["a"], client.clone()));

    let task = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.forward(&chat_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gateway.in_flight(), 1);

    task.abort();
    let _ = task.await;
    assert_eq!(gateway.in_flight(), 0);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_close_drains_then_aborts() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Hang)
            .reply("b", Reply::Json(200, json!({}))),
    );
    let gateway = Arc::new(service(&["a"], client.clone()));

    let stuck = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.forward(&chat_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    gateway.close().await;

    let result = stuck.await.unwrap();
    assert!(matches!(result, Err(GatewayError::ClientClosed)));
    assert!(client.is_closed());
    assert_eq!(gateway.in_flight(), 0);

    // New calls are refused without touching the network
    let err = gateway.forward(&chat_request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::ClientClosed));
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(client.call_count(), 1);

    // Closing twice is a no-op
    gateway.close().await;
}

#[tokio::test]
async fn test_close_lets_quick_calls_finish() {
    let client = Arc::new(
        ScriptedClient::new()
            .reply("a", Reply::Json(200, json!({"done": true})))
            .delay("a", Duration::from_millis(50)),
    );
    let gateway = Arc::new(openai_gateway::GatewayService::with_registry(
        common::registry(&["a"]),
        client.clone(),
        openai_gateway::core::ForwardSettings {
            request_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        },
    ));

    let call = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.forward(&chat_request()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    gateway.close().await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.body, ResponseBody::Json(json!({"done": true})));
}
