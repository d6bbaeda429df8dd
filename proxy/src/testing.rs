//! Shared fixtures for the crate's unit tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nmos_proxy_model::version::APIVersion;
use reqwest::Url;

use crate::config::ProxyConfig;
use crate::discovery::MdnsBridge;
use crate::updater::{MdnsEngine, MdnsError, MdnsUpdater, TxtRecords};
use crate::ProxyCore;

pub(crate) struct FixedBridge(pub Url);

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

pub(crate) struct EmptyBridge;

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

pub(crate) struct NullEngine;

impl MdnsEngine for NullEngine {
    fn register(
        &self,
        _name: &str,
        _service_type: &str,
        _port: u16,
        _txt: &TxtRecords,
    ) -> Result<(), MdnsError> {
        Ok(())
    }

    fn update(&self, _name: &str, _service_type: &str, _txt: &TxtRecords) -> Result<(), MdnsError> {
        Ok(())
    }
}

pub(crate) fn fast_config() -> ProxyConfig {
    ProxyConfig {
        request_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(50),
        queue_poll_interval: Duration::from_millis(10),
        ..ProxyConfig::default()
    }
}

pub(crate) async fn core(uri: &str) -> Arc<ProxyCore> {
    let url = Url::parse(uri).unwrap();
    ProxyCore::new(fast_config(), Arc::new(FixedBridge(url)), None, None)
}

pub(crate) async fn core_with_updater(uri: &str) -> (Arc<ProxyCore>, Arc<MdnsUpdater>) {
    let updater = MdnsUpdater::builder(Arc::new(NullEngine), "test-node", "_nmos-node._tcp", 3000)
        .with_poll_interval(Duration::from_millis(5))
        .build()
        .await
        .unwrap();

    let url = Url::parse(uri).unwrap();
    let core = ProxyCore::new(
        fast_config(),
        Arc::new(FixedBridge(url)),
        Some(updater.clone()),
        None,
    );
    (core, updater)
}

pub(crate) async fn unreachable_core() -> Arc<ProxyCore> {
    ProxyCore::new(fast_config(), Arc::new(EmptyBridge), None, None)
}
