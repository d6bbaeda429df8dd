use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nmos_proxy_model::resource::{ResourceEnvelope, NODE, RESOURCE_NAMESPACE};
use nmos_proxy_model::version::APIVersion;
use nmos_proxy_model::Mirror;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod auth;
pub mod config;
pub mod discovery;
mod error;
mod heartbeat;
pub mod mdns;
mod queue;
pub mod sender;
#[cfg(test)]
mod testing;
pub mod updater;

pub use async_trait::async_trait;
pub use config::ProxyConfig;
pub use error::{Error, Result};

use auth::AuthProvider;
use discovery::{DiscoveryClient, MdnsBridge};
use queue::Request;
use sender::HttpSender;
use updater::{MdnsAction, MdnsUpdater};

pub(crate) struct ProxyCore {
    pub(crate) mirror: Mirror,
    pub(crate) queue: Mutex<VecDeque<Request>>,
    pub(crate) sender: HttpSender,
    pub(crate) updater: Option<Arc<MdnsUpdater>>,
    pub(crate) config: ProxyConfig,
    auth_attached: bool,
    running: AtomicBool,
}

impl ProxyCore {
    pub(crate) fn new(
        config: ProxyConfig,
        bridge: Arc<dyn MdnsBridge>,
        updater: Option<Arc<MdnsUpdater>>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Arc<Self> {
        let discovery = DiscoveryClient::new(bridge, config.api_version, config.https_mode);
        let auth_attached = auth.is_some();
        let sender = HttpSender::new(
            discovery,
            config.api_version,
            config.request_timeout,
            auth,
            updater.clone(),
        );

        Arc::new(ProxyCore {
            mirror: Mirror::new(),
            queue: Mutex::new(VecDeque::new()),
            sender,
            updater,
            config,
            auth_attached,
            running: AtomicBool::new(true),
        })
    }

    pub(crate) fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) async fn enqueue(&self, request: Request) {
        self.queue.lock().await.push_back(request);
    }

    // POST the node then immediately heartbeat it so the registry's
    // garbage collector cannot reap the fresh registration.
    pub(crate) async fn post_node(
        &self,
        namespace: &str,
        node: &ResourceEnvelope,
        node_id: &str,
    ) -> Result<()> {
        let path = format!("/{}", namespace);
        self.sender
            .send(Method::POST, &path, Some(&node.to_wire()))
            .await?;
        let health = format!("/health/nodes/{}", node_id);
        self.sender.send(Method::POST, &health, None).await?;
        Ok(())
    }

    pub(crate) async fn inc_p2p_enable_count(&self) {
        if let Some(updater) = &self.updater {
            updater.inc_p2p_enable_count().await;
        }
    }

    pub(crate) async fn p2p_disable(&self) {
        if let Some(updater) = &self.updater {
            updater.p2p_disable().await;
        }
    }

    async fn update_mdns(&self, res_type: &str, action: MdnsAction) {
        if let Some(updater) = &self.updater {
            updater.update_mdns(res_type, action).await;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub api_href: String,
    pub api_version: APIVersion,
    pub registered: bool,
}

#[must_use]
pub struct ProxyBuilder {
    bridge: Arc<dyn MdnsBridge>,
    config: ProxyConfig,
    updater: Option<Arc<MdnsUpdater>>,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl ProxyBuilder {
    pub fn new(bridge: Arc<dyn MdnsBridge>) -> Self {
        ProxyBuilder {
            bridge,
            config: ProxyConfig::default(),
            updater: None,
            auth: None,
        }
    }

    pub fn with_config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_api_version(mut self, api_version: APIVersion) -> Self {
        self.config.api_version = api_version;
        self
    }

    pub fn with_https_mode(mut self, https_mode: bool) -> Self {
        self.config.https_mode = https_mode;
        self
    }

    pub fn with_mdns_updater(mut self, updater: Arc<MdnsUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Start the proxy's heartbeat and queue tasks. Must be called
    /// within a Tokio runtime.
    pub fn build(self) -> RegistrationProxy {
        let core = ProxyCore::new(self.config, self.bridge, self.updater, self.auth);

        let heartbeat = tokio::spawn(heartbeat::run(core.clone()));
        let worker = tokio::spawn(queue::run(core.clone()));

        RegistrationProxy {
            core,
            heartbeat,
            worker,
        }
    }
}

/// Proxy for the distant aggregation service running elsewhere on the
/// network.
///
/// Registers the node and its resources with a discovered Registration
/// API, keeps the registration alive with heartbeats, and re-discovers,
/// re-registers and re-submits resources when the aggregator is lost.
/// Repeated losses engage P2P mDNS advertising via the attached
/// [`MdnsUpdater`].
pub struct RegistrationProxy {
    core: Arc<ProxyCore>,
    heartbeat: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl RegistrationProxy {
    pub fn builder(bridge: Arc<dyn MdnsBridge>) -> ProxyBuilder {
        ProxyBuilder::new(bridge)
    }

    /// Register `resource` type data including the node.
    ///
    /// NB: node registration is driven by the heartbeat controller so
    /// may take up to one heartbeat interval.
    pub async fn register(&self, res_type: &str, key: &str, fields: Value) {
        self.register_into(RESOURCE_NAMESPACE, res_type, key, fields)
            .await;
    }

    /// Unregister `resource` type data including the node.
    pub async fn unregister(&self, res_type: &str, key: &str) {
        self.unregister_from(RESOURCE_NAMESPACE, res_type, key).await;
    }

    pub async fn register_into(&self, namespace: &str, res_type: &str, key: &str, fields: Value) {
        let mut data = fields;
        if data.get("id").is_none() {
            warn!("No 'id' present in data, using key='{}': {}", key, data);
            if let Some(object) = data.as_object_mut() {
                object.insert("id".to_string(), Value::String(key.to_string()));
            }
        }
        let envelope = ResourceEnvelope::new(res_type, data);

        if namespace == RESOURCE_NAMESPACE && res_type == NODE {
            self.core.mirror.set_node(envelope).await;
            if self.core.auth_attached {
                // Bookkeeping only; the client registration dance is the
                // provider's concern
                self.core.mirror.set_auth_client_registered(true);
            }
        } else {
            self.core
                .mirror
                .put_entity(namespace, res_type, key, envelope)
                .await;
        }

        self.core
            .enqueue(Request {
                method: Method::POST,
                namespace: namespace.to_string(),
                res_type: res_type.to_string(),
                key: key.to_string(),
            })
            .await;
        self.core.update_mdns(res_type, MdnsAction::Register).await;
    }

    pub async fn unregister_from(&self, namespace: &str, res_type: &str, key: &str) {
        if namespace == RESOURCE_NAMESPACE && res_type == NODE {
            self.core.mirror.clear_node().await;
        } else {
            let _ = self.core.mirror.del_entity(namespace, res_type, key).await;
        }

        self.core
            .enqueue(Request {
                method: Method::DELETE,
                namespace: namespace.to_string(),
                res_type: res_type.to_string(),
                key: key.to_string(),
            })
            .await;
        self.core
            .update_mdns(res_type, MdnsAction::Unregister)
            .await;
    }

    pub async fn status(&self) -> Status {
        Status {
            api_href: self.core.sender.api_href().await,
            api_version: self.core.config.api_version,
            registered: self.core.mirror.registered(),
        }
    }

    /// Stop both controller tasks. The queue worker keeps draining while
    /// the node is registered so final unregisters still reach the API.
    pub async fn stop(self) {
        debug!("Stopping aggregator proxy");
        self.core.shutdown();
        let _ = self.heartbeat.await;
        let _ = self.worker.await;
    }
}
