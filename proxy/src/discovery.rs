use std::sync::Arc;

use async_trait::async_trait;
use nmos_proxy_model::version::APIVersion;
use reqwest::Url;

// From NMOS documentation: https://specs.amwa.tv/is-04/releases/v1.3.2/docs/Upgrade_Path.html#requirements-for-nodes-node-apis
// > Where a Node implements version v1.2 or below,
// > it MUST browse for both the _nmos-register._tcp DNS-SD service type,
// > and the legacy _nmos-registration._tcp DNS-SD service type in order to
// > retrieve the full list of available Registration APIs.
pub const REGISTER_MDNS_TYPE: &str = "nmos-register";
pub const LEGACY_REGISTER_MDNS_TYPE: &str = "nmos-registration";

/// Where registry base URLs come from.
///
/// Implemented over zeroconf in [`crate::mdns`]; tests substitute fixed
/// URL sequences.
#[async_trait]
pub trait MdnsBridge: Send + Sync {
    /// Base URL of a matching aggregator, or `None` when nothing on the
    /// network matches. `domain` restricts the search beyond the local
    /// `.local` domain when given.
    async fn resolve(
        &self,
        service_type: &str,
        domain: Option<&str>,
        api_version: APIVersion,
        scheme: &str,
    ) -> Option<Url>;
}

/// Resolves an aggregator for the configured API version, preferring the
/// modern service type over the legacy one. No caching here; the sender
/// caches the result until it stops responding.
pub struct DiscoveryClient {
    bridge: Arc<dyn MdnsBridge>,
    api_version: APIVersion,
    https_mode: bool,
}

impl DiscoveryClient {
    pub fn new(bridge: Arc<dyn MdnsBridge>, api_version: APIVersion, https_mode: bool) -> Self {
        DiscoveryClient {
            bridge,
            api_version,
            https_mode,
        }
    }

    pub async fn resolve(&self) -> Option<Url> {
        let scheme = if self.https_mode { "https" } else { "http" };

        match self
            .bridge
            .resolve(REGISTER_MDNS_TYPE, None, self.api_version, scheme)
            .await
        {
            Some(url) => Some(url),
            None => {
                self.bridge
                    .resolve(LEGACY_REGISTER_MDNS_TYPE, None, self.api_version, scheme)
                    .await
            }
        }
    }
}
