#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use nmos_proxy::config::ProxyConfig;
use nmos_proxy::discovery::MdnsBridge;
use nmos_proxy::RegistrationProxy;
use nmos_proxy_model::version::APIVersion;
use reqwest::Url;
use tokio::sync::Mutex;
use tokio::time::sleep;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_ROOT: &str = "/x-nmos/registration/v1.3";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Always resolves to the same aggregator.
pub struct FixedBridge(pub Url);

impl FixedBridge {
    pub fn new(uri: &str) -> Self {
        FixedBridge(Url::parse(uri).expect("mock url"))
    }
}

#[async_trait]
impl MdnsBridge for FixedBridge {
    async fn resolve(
        &self,
        _service_type: &str,
        _domain: Option<&str>,
        _api_version: APIVersion,
        _scheme: &str,
    ) -> Option<Url> {
        Some(self.0.clone())
    }
}

/// Hands out each URL once, in order, then nothing.
pub struct SequenceBridge {
    urls: Mutex<VecDeque<Url>>,
}

impl SequenceBridge {
    pub fn new(uris: &[&str]) -> Self {
        SequenceBridge {
            urls: Mutex::new(
                uris.iter()
                    .map(|uri| Url::parse(uri).expect("mock url"))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl MdnsBridge for SequenceBridge {
    async fn resolve(
        &self,
        _service_type: &str,
        _domain: Option<&str>,
        _api_version: APIVersion,
        _scheme: &str,
    ) -> Option<Url> {
        self.urls.lock().await.pop_front()
    }
}

/// A network with no Registration API on it.
pub struct EmptyBridge;

#[async_trait]
impl MdnsBridge for EmptyBridge {
    async fn resolve(
        &self,
        _service_type: &str,
        _domain: Option<&str>,
        _api_version: APIVersion,
        _scheme: &str,
    ) -> Option<Url> {
        None
    }
}

pub fn fast_config() -> ProxyConfig {
    ProxyConfig {
        request_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(100),
        queue_poll_interval: Duration::from_millis(10),
        ..ProxyConfig::default()
    }
}

/// Registry mocks for the straightforward cases: registrations succeed,
/// heartbeats succeed, unregisters succeed.
pub async fn mount_registry(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("{}/resource", API_ROOT)))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("^/x-nmos/registration/v1.3/health/nodes/.+$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex("^/x-nmos/registration/v1.3/resource/.+$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

pub async fn wait_until_registered(proxy: &RegistrationProxy) {
    for _ in 0..200 {
        if proxy.status().await.registered {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("proxy did not register in time");
}

pub async fn wait_for_requests<F>(server: &MockServer, predicate: F)
where
    F: Fn(&[wiremock::Request]) -> bool,
{
    for _ in 0..200 {
        if let Some(requests) = server.received_requests().await {
            if predicate(&requests) {
                return;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("expected requests did not arrive in time");
}
