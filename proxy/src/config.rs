use std::time::Duration;

use nmos_proxy_model::version::{is_04::V1_3, APIVersion};

/// Proxy tuning knobs. Loading these from files or the environment is
/// the host application's business.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Registration API version spoken to the aggregator.
    pub api_version: APIVersion,
    /// Prefer `https` aggregators during discovery.
    pub https_mode: bool,
    /// Per-request timeout on the HTTP sender.
    pub request_timeout: Duration,
    /// Interval between heartbeat controller passes.
    pub heartbeat_interval: Duration,
    /// Idle sleep of the queue worker while unregistered or drained.
    pub queue_poll_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            api_version: V1_3,
            https_mode: false,
            request_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            queue_poll_interval: Duration::from_secs(1),
        }
    }
}
