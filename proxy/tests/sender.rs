mod support;

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nmos_proxy::async_trait;
use nmos_proxy::auth::{AuthError, AuthProvider};
use nmos_proxy::discovery::{DiscoveryClient, MdnsBridge};
use nmos_proxy::sender::{HttpSender, ResponseBody, SEND_ATTEMPTS};
use nmos_proxy::Error;
use nmos_proxy_model::version::is_04::V1_3;
use reqwest::{Method, StatusCode};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{EmptyBridge, FixedBridge, SequenceBridge, API_ROOT};

fn sender(bridge: Arc<dyn MdnsBridge>) -> HttpSender {
    sender_with_auth(bridge, None)
}

fn sender_with_auth(
    bridge: Arc<dyn MdnsBridge>,
    auth: Option<Arc<dyn AuthProvider>>,
) -> HttpSender {
    let discovery = DiscoveryClient::new(bridge, V1_3, false);
    HttpSender::new(discovery, V1_3, Duration::from_millis(500), auth, None)
}

/// A URL that refuses connections.
fn dead_uri() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn json_responses_are_decoded() {
    support::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/resource", API_ROOT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(Arc::new(FixedBridge::new(&server.uri())));
    let body = sender
        .send(
            Method::POST,
            "/resource",
            Some(&json!({"type": "node", "data": {"id": "n1"}})),
        )
        .await
        .unwrap();

    assert_eq!(body, Some(ResponseBody::Json(json!({"ok": true}))));

    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent, json!({"type": "node", "data": {"id": "n1"}}));
    assert!(requests[0]
        .headers
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap()
        .starts_with("application/json"));
}

#[tokio::test]
async fn non_json_responses_come_back_raw() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let sender = sender(Arc::new(FixedBridge::new(&server.uri())));
    let body = sender
        .send(Method::POST, "/health/nodes/n1", None)
        .await
        .unwrap();

    assert_eq!(body, Some(ResponseBody::Raw(b"pong".to_vec())));
}

#[tokio::test]
async fn no_content_yields_empty() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let sender = sender(Arc::new(FixedBridge::new(&server.uri())));
    let body = sender
        .send(Method::DELETE, "/resource/nodes/n1", None)
        .await
        .unwrap();

    assert_eq!(body, None);
}

#[tokio::test]
async fn client_errors_surface_without_failover() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender(Arc::new(FixedBridge::new(&server.uri())));
    let result = sender.send(Method::POST, "/resource", None).await;

    assert_eq!(result, Err(Error::InvalidRequest(StatusCode::BAD_REQUEST)));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn server_errors_burn_the_whole_attempt_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(SEND_ATTEMPTS as u64)
        .mount(&server)
        .await;

    let sender = sender(Arc::new(FixedBridge::new(&server.uri())));
    let result = sender.send(Method::POST, "/resource", None).await;

    assert_eq!(result, Err(Error::TooManyRetries));
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        SEND_ATTEMPTS
    );
}

#[tokio::test]
async fn transport_failure_rotates_to_the_next_aggregator() {
    support::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/resource", API_ROOT)))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = SequenceBridge::new(&[&dead_uri(), &server.uri()]);
    let sender = sender(Arc::new(bridge));
    let result = sender
        .send(
            Method::POST,
            "/resource",
            Some(&json!({"type": "device", "data": {"id": "d1"}})),
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn empty_discovery_raises_no_aggregator() {
    let sender = sender(Arc::new(EmptyBridge));
    let result = sender.send(Method::POST, "/resource", None).await;
    assert_eq!(result, Err(Error::NoAggregator));
}

#[tokio::test]
async fn aggregator_lost_mid_call_raises_no_aggregator() {
    // One dead aggregator, then discovery dries up
    let bridge = SequenceBridge::new(&[&dead_uri()]);
    let sender = sender(Arc::new(bridge));
    let result = sender.send(Method::POST, "/resource", None).await;
    assert_eq!(result, Err(Error::NoAggregator));
}

struct StaticAuth(&'static str);

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        Ok(self.0.to_string())
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        Ok(())
    }
}

struct RefreshingAuth {
    refreshed: AtomicBool,
    refresh_calls: AtomicU32,
    fail_refresh: bool,
}

impl RefreshingAuth {
    fn new(fail_refresh: bool) -> Self {
        RefreshingAuth {
            refreshed: AtomicBool::new(false),
            refresh_calls: AtomicU32::new(0),
            fail_refresh,
        }
    }
}

#[async_trait]
impl AuthProvider for RefreshingAuth {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.refreshed.load(Ordering::SeqCst) {
            Ok("fresh-token".to_string())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            Err(AuthError::Failed("refresh denied".to_string()))
        } else {
            self.refreshed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[tokio::test]
async fn bearer_token_is_injected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer node-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = sender_with_auth(
        Arc::new(FixedBridge::new(&server.uri())),
        Some(Arc::new(StaticAuth("node-token"))),
    );
    let result = sender.send(Method::POST, "/health/nodes/n1", None).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn invalid_token_is_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let auth = Arc::new(RefreshingAuth::new(false));
    let sender = sender_with_auth(Arc::new(FixedBridge::new(&server.uri())), Some(auth.clone()));
    let result = sender.send(Method::POST, "/health/nodes/n1", None).await;

    assert!(result.is_ok());
    assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_refresh_detaches_the_auth_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let auth = Arc::new(RefreshingAuth::new(true));
    let sender = sender_with_auth(Arc::new(FixedBridge::new(&server.uri())), Some(auth.clone()));

    // First call: refresh fails, the request goes out unauthenticated
    let result = sender.send(Method::POST, "/health/nodes/n1", None).await;
    assert!(result.is_ok());
    assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);

    // The client is detached: later calls never consult the provider
    let result = sender.send(Method::POST, "/health/nodes/n1", None).await;
    assert!(result.is_ok());
    assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests
        .iter()
        .all(|request| request.headers.get("authorization").is_none()));
}
