//! Integration tests for negotiation failure paths.
//!
//! A real handshake needs a live realtime endpoint and a capture device;
//! what must hold everywhere is the failure ordering: a refused credential
//! aborts negotiation before any channel or device is touched.

use std::sync::Arc;

use voxlink::config::SessionConfig;
use voxlink::errors::SignalingError;
use voxlink::gateway::{router, GatewayState};
use voxlink::signaling::{ControlPlaneClient, SignalingClient};

/// Gateway with no upstream API key: `POST /session` answers 500.
async fn spawn_refusing_gateway() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = GatewayState::new(dir.path().join("settings.json"), None, None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), dir)
}

#[tokio::test]
async fn test_negotiate_fails_fast_on_refused_credential() {
    let (base, _dir) = spawn_refusing_gateway().await;
    let client = SignalingClient::new(ControlPlaneClient::new(&base));

    let err = client.negotiate(&SessionConfig::default()).await.unwrap_err();
    match err {
        SignalingError::Credential(msg) => {
            assert!(msg.contains("500"), "credential error should carry the status: {}", msg);
        }
        other => panic!("expected a credential error, got: {}", other),
    }
}

#[tokio::test]
async fn test_negotiate_fails_fast_on_unreachable_control_plane() {
    // Nothing listens here at all.
    let client = SignalingClient::new(ControlPlaneClient::new("http://127.0.0.1:9"));

    let err = client.negotiate(&SessionConfig::default()).await.unwrap_err();
    assert!(matches!(err, SignalingError::Credential(_)));
}

#[tokio::test]
async fn test_credential_value_is_extracted() {
    // A stub control plane that mints a fixed credential.
    use axum::routing::post;
    use axum::{Json, Router};

    let app = Router::new().route(
        "/session",
        post(|| async {
            Json(serde_json::json!({ "client_secret": { "value": "ek_test_123" } }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let control_plane = ControlPlaneClient::new(&format!("http://{}", addr));
    let credential = control_plane
        .create_credential("gpt-realtime-2025-08-28", "verse")
        .await
        .unwrap();
    assert_eq!(credential, "ek_test_123");
}
