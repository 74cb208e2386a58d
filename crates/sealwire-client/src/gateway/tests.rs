//! Tests for the session gateway against the scripted server.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Method;
use serde_json::json;

use sealwire_core::config::{AuthEndpoints, EncryptionConfig};
use sealwire_crypto::CryptoEngine;

use super::SessionGateway;
use crate::channel::SecureChannel;
use crate::error::{AuthError, ClientError};
use crate::events::SessionState;
use crate::handshake::{HandshakeCoordinator, HandshakeState};
use crate::keystore::KeyStore;
use crate::store::{KeyValueStore, MemoryStore};
use crate::testing::{self, FakeServer};
use crate::tokens::{ACCESS_TOKEN_KEY, AuthTokenPair, TokenStore};
use crate::transport::HttpTransport;

struct Harness {
    server: Arc<FakeServer>,
    store: Arc<MemoryStore>,
    gateway: SessionGateway,
}

fn gateway_over(server: &Arc<FakeServer>, store: &Arc<MemoryStore>) -> SessionGateway {
    let config = EncryptionConfig::default();
    let kv: Arc<dyn KeyValueStore> = Arc::clone(store) as Arc<dyn KeyValueStore>;
    let transport: Arc<dyn HttpTransport> = Arc::clone(server) as Arc<dyn HttpTransport>;
    let handshake = Arc::new(HandshakeCoordinator::new(
        KeyStore::new(Arc::clone(&kv)),
        CryptoEngine::new(),
        Arc::clone(&transport),
        config.clone(),
        Duration::from_secs(5),
    ));
    let channel = Arc::new(SecureChannel::new(
        handshake,
        CryptoEngine::new(),
        config.plaintext_paths,
    ));
    SessionGateway::new(
        transport,
        channel,
        TokenStore::new(kv),
        AuthEndpoints::default(),
        Duration::from_secs(5),
    )
}

fn harness() -> Harness {
    let server = FakeServer::new();
    let store = Arc::new(MemoryStore::new());
    let gateway = gateway_over(&server, &store);
    Harness {
        server,
        store,
        gateway,
    }
}

async fn logged_in() -> Harness {
    let h = harness();
    h.gateway
        .login(json!({"username": "ada", "password": "pw"}))
        .await
        .unwrap();
    h
}

fn count_terminations(gateway: &SessionGateway) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&hits);
    gateway.on_session_terminated(move || {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    hits
}

fn count_auth_failures(gateway: &SessionGateway) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&hits);
    gateway.on_auth_failure(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    hits
}

async fn stored_tokens(store: &Arc<MemoryStore>) -> Option<AuthTokenPair> {
    TokenStore::new(Arc::clone(store) as Arc<dyn KeyValueStore>)
        .load()
        .await
        .unwrap()
}

// =============================================================================
// Encryption and auth headers
// =============================================================================

#[tokio::test]
async fn login_stores_tokens_and_authenticates() {
    let h = logged_in().await;
    assert_eq!(h.gateway.state(), SessionState::Authenticated);
    assert_eq!(h.gateway.access_token().await.as_deref(), Some("access-1"));
    assert_eq!(
        stored_tokens(&h.store).await,
        Some(AuthTokenPair::new("access-1", "refresh-1"))
    );

    let login = h.server.requests_to(testing::LOGIN);
    assert!(login[0].body_was_encrypted);
    assert_eq!(login[0].plaintext_body.as_ref().unwrap()["username"], json!("ada"));
}

#[tokio::test]
async fn requests_carry_bearer_and_are_encrypted_both_ways() {
    let h = logged_in().await;
    let resp = h
        .gateway
        .request(Method::POST, "/students/123", Some(json!({"grade": 7})))
        .await
        .unwrap();
    assert_eq!(resp.data()["echo"], json!({"grade": 7}));

    let seen = h.server.requests_to("/students/123");
    assert_eq!(seen.len(), 1);
    assert!(seen[0].body_was_encrypted);
    assert!(seen[0].client_key_header.is_some());
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer access-1"));
    assert!(!seen[0].raw_body.as_ref().unwrap().to_string().contains("grade"));
}

#[tokio::test]
async fn payment_paths_stay_plaintext() {
    let h = logged_in().await;
    let resp = h
        .gateway
        .request(Method::POST, "/payments/create-order", Some(json!({"amount": 10})))
        .await
        .unwrap();
    assert_eq!(resp.data()["echo"], json!({"amount": 10}));

    let seen = h.server.requests_to("/payments/create-order");
    assert!(!seen[0].body_was_encrypted);
    assert!(seen[0].client_key_header.is_none());
}

#[tokio::test]
async fn failed_handshake_degrades_to_plaintext_requests() {
    let h = harness();
    h.server.fail_handshake.store(true, Ordering::SeqCst);
    h.gateway
        .login(json!({"username": "ada", "password": "pw"}))
        .await
        .unwrap();

    let resp = h
        .gateway
        .request(Method::GET, "/students/123", None)
        .await
        .unwrap();
    assert_eq!(resp.data()["path"], json!("/students/123"));
    assert!(!h.gateway.channel().should_encrypt("/students/123"));
    assert!(h.server.requests().iter().all(|r| r.client_key_header.is_none()));
}

#[tokio::test]
async fn forged_response_is_surfaced_as_crypto_error() {
    let h = logged_in().await;
    h.server.forge_responses.store(true, Ordering::SeqCst);
    let err = h
        .gateway
        .request(Method::GET, "/students/1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Crypto(_)));
}

#[tokio::test]
async fn non_401_errors_become_api_errors() {
    let h = harness();
    let err = h
        .gateway
        .login(json!({"username": "ada", "password": "wrong"}))
        .await
        .unwrap_err();
    match err {
        ClientError::Api { status, code, .. } => {
            assert_eq!(status, 400);
            assert_eq!(code.as_deref(), Some("BAD_CREDENTIALS"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);
}

// =============================================================================
// Single-flight refresh
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_401s_share_one_refresh() {
    let h = logged_in().await;
    h.server.expire_access_token();
    h.server.set_refresh_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for i in 0..5 {
        let gw = h.gateway.clone();
        handles.push(tokio::spawn(async move {
            gw.request(Method::GET, &format!("/students/{i}"), None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.state(), SessionState::Authenticated);
    assert_eq!(
        h.gateway.access_token().await,
        Some(h.server.access_token())
    );
    assert_eq!(
        stored_tokens(&h.store).await.unwrap().refresh_token,
        h.server.refresh_token()
    );
}

#[tokio::test]
async fn sequential_expiry_refreshes_each_time() {
    let h = logged_in().await;
    for _ in 0..2 {
        h.server.expire_access_token();
        h.gateway
            .request(Method::GET, "/students/1", None)
            .await
            .unwrap();
    }
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refresh_failure_rejects_every_waiter() {
    let h = logged_in().await;
    let failures = count_auth_failures(&h.gateway);
    h.server.expire_access_token();
    h.server.refresh_fails.store(true, Ordering::SeqCst);
    h.server.set_refresh_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let gw = h.gateway.clone();
        handles.push(tokio::spawn(async move {
            gw.request(Method::GET, "/students/1", None).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(
            matches!(err, ClientError::Auth(AuthError::RefreshFailed(_))),
            "got {err:?}"
        );
        assert!(err.requires_login());
    }

    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);
    assert!(h.gateway.access_token().await.is_none());
    assert!(stored_tokens(&h.store).await.is_none());
}

#[tokio::test]
async fn request_is_replayed_at_most_once() {
    let h = logged_in().await;
    h.server.reject_all_tokens.store(true, Ordering::SeqCst);

    let err = h
        .gateway
        .request(Method::GET, "/students/1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 401, .. }));
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.server.requests_to("/students/1").len(), 2);
}

#[tokio::test]
async fn unauthenticated_401_reports_no_token() {
    let h = harness();
    let err = h
        .gateway
        .request(Method::GET, "/students/1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Auth(AuthError::NoToken)));
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancelled_waiter_is_dropped_from_replay() {
    let h = logged_in().await;
    h.server.expire_access_token();
    h.server.set_refresh_delay(Duration::from_millis(100));

    let first = {
        let gw = h.gateway.clone();
        tokio::spawn(async move { gw.request(Method::GET, "/students/1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let gw = h.gateway.clone();
        tokio::spawn(async move { gw.request(Method::GET, "/students/2", None).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    second.abort();

    first.await.unwrap().unwrap();
    assert!(second.await.unwrap_err().is_cancelled());
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.server.requests_to("/students/2").len(), 1);

    // flag was released: the next expiry refreshes again
    h.server.expire_access_token();
    h.gateway
        .request(Method::GET, "/students/3", None)
        .await
        .unwrap();
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelling_the_trigger_still_completes_the_refresh() {
    let h = logged_in().await;
    h.server.expire_access_token();
    h.server.set_refresh_delay(Duration::from_millis(50));
    let mut states = h.gateway.subscribe_state();

    let trigger = {
        let gw = h.gateway.clone();
        tokio::spawn(async move { gw.request(Method::GET, "/students/1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.gateway.state(), SessionState::Refreshing);
    trigger.abort();

    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == SessionState::Authenticated),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(
        h.gateway.access_token().await,
        Some(h.server.access_token())
    );
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Hard logout paths
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn termination_fires_once_and_never_refreshes() {
    let h = logged_in().await;
    let terminations = count_terminations(&h.gateway);
    h.server.terminated.store(true, Ordering::SeqCst);

    let mut handles = Vec::new();
    for i in 0..3 {
        let gw = h.gateway.clone();
        handles.push(tokio::spawn(async move {
            gw.request(Method::GET, &format!("/students/{i}"), None).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Auth(AuthError::SessionTerminated)));
    }

    assert_eq!(terminations.load(Ordering::SeqCst), 1);
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.state(), SessionState::Terminated);
    assert!(h.gateway.access_token().await.is_none());
    assert!(stored_tokens(&h.store).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn termination_on_refresh_rejects_every_waiter() {
    let h = logged_in().await;
    let terminations = count_terminations(&h.gateway);
    let failures = count_auth_failures(&h.gateway);
    h.server.expire_access_token();
    h.server.terminate_on_refresh.store(true, Ordering::SeqCst);
    h.server.set_refresh_delay(Duration::from_millis(50));

    let mut handles = Vec::new();
    for i in 0..4 {
        let gw = h.gateway.clone();
        handles.push(tokio::spawn(async move {
            gw.request(Method::GET, &format!("/students/{i}"), None).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(
            matches!(err, ClientError::Auth(AuthError::SessionTerminated)),
            "got {err:?}"
        );
    }

    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(terminations.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.state(), SessionState::Terminated);
    assert!(h.gateway.access_token().await.is_none());
    assert!(stored_tokens(&h.store).await.is_none());
}

#[tokio::test]
async fn termination_during_refresh_is_not_undone() {
    let h = logged_in().await;
    let terminations = count_terminations(&h.gateway);
    h.server.expire_access_token();
    h.server.set_refresh_delay(Duration::from_millis(100));

    let refreshing = {
        let gw = h.gateway.clone();
        tokio::spawn(async move { gw.request(Method::GET, "/students/1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.gateway.state(), SessionState::Refreshing);

    h.server.terminated.store(true, Ordering::SeqCst);
    let err = h
        .gateway
        .request(Method::GET, "/students/2", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Auth(AuthError::SessionTerminated)));

    let err = refreshing.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Auth(AuthError::SessionTerminated)));
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(terminations.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.state(), SessionState::Terminated);
    assert!(h.gateway.access_token().await.is_none());
    assert!(stored_tokens(&h.store).await.is_none());
}

#[tokio::test]
async fn a_new_session_can_be_terminated_again() {
    let h = logged_in().await;
    let terminations = count_terminations(&h.gateway);
    h.server.terminated.store(true, Ordering::SeqCst);
    let _ = h.gateway.request(Method::GET, "/students/1", None).await;

    h.server.terminated.store(false, Ordering::SeqCst);
    h.gateway
        .login(json!({"username": "ada", "password": "pw"}))
        .await
        .unwrap();
    h.server.terminated.store(true, Ordering::SeqCst);
    let _ = h.gateway.request(Method::GET, "/students/1", None).await;

    assert_eq!(terminations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_token_logs_out_without_refresh() {
    let h = logged_in().await;
    let failures = count_auth_failures(&h.gateway);
    let terminations = count_terminations(&h.gateway);
    h.server.invalid_token.store(true, Ordering::SeqCst);

    let err = h
        .gateway
        .request(Method::GET, "/students/1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Auth(AuthError::InvalidToken)));
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(terminations.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);
    assert!(stored_tokens(&h.store).await.is_none());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn logout_clears_tokens_and_handshake() {
    let h = logged_in().await;
    h.gateway.logout().await.unwrap();

    assert_eq!(h.server.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);
    assert!(stored_tokens(&h.store).await.is_none());
    assert_eq!(
        h.gateway.channel().handshake().state(),
        HandshakeState::Uninitialized
    );

    h.gateway
        .login(json!({"username": "ada", "password": "pw"}))
        .await
        .unwrap();
    assert_eq!(h.server.handshake_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn logout_during_refresh_stays_logged_out() {
    let h = logged_in().await;
    let failures = count_auth_failures(&h.gateway);
    h.server.expire_access_token();
    h.server.set_refresh_delay(Duration::from_millis(100));

    let refreshing = {
        let gw = h.gateway.clone();
        tokio::spawn(async move { gw.request(Method::GET, "/students/1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.gateway.state(), SessionState::Refreshing);

    h.gateway.logout().await.unwrap();
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);

    let err = refreshing.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Auth(AuthError::NoToken)));
    assert_eq!(h.server.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);
    assert!(h.gateway.access_token().await.is_none());
    assert!(stored_tokens(&h.store).await.is_none());
}

#[tokio::test]
async fn restore_picks_up_persisted_tokens() {
    let h = logged_in().await;
    let fresh = gateway_over(&h.server, &h.store);
    assert_eq!(fresh.state(), SessionState::Unauthenticated);

    assert!(fresh.restore().await.unwrap());
    assert_eq!(fresh.state(), SessionState::Authenticated);
    fresh
        .request(Method::GET, "/students/1", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn restore_discards_half_written_tokens() {
    let h = harness();
    h.store.set(ACCESS_TOKEN_KEY, "orphan").await.unwrap();

    assert!(!h.gateway.restore().await.unwrap());
    assert_eq!(h.gateway.state(), SessionState::Unauthenticated);
    assert!(h.store.is_empty().await);
}
