use std::sync::Arc;
use std::time::Duration;

use nmos_proxy_model::version::APIVersion;
use reqwest::{header, Client, Method, StatusCode, Url};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, AuthProvider};
use crate::discovery::DiscoveryClient;
use crate::error::{Error, Result};
use crate::updater::MdnsUpdater;

const API_NAMESPACE: &str = "x-nmos";
const API_NAME: &str = "registration";

/// Discovery and request attempts allowed per call before giving up.
pub const SEND_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Json(Value),
    Raw(Vec<u8>),
}

enum Attempt {
    Done(Option<ResponseBody>),
    Rejected(StatusCode),
    Failover,
}

/// Issues single requests to the current aggregator, rotating to another
/// one on transport or server failure.
///
/// The resolved aggregator is cached across calls and invalidated when
/// it stops responding. 4xx responses surface immediately as
/// [`Error::InvalidRequest`] without burning the failover budget.
pub struct HttpSender {
    client: Client,
    discovery: DiscoveryClient,
    api_version: APIVersion,
    aggregator: Mutex<Option<Url>>,
    auth: Mutex<Option<Arc<dyn AuthProvider>>>,
    updater: Option<Arc<MdnsUpdater>>,
}

impl HttpSender {
    pub fn new(
        discovery: DiscoveryClient,
        api_version: APIVersion,
        request_timeout: Duration,
        auth: Option<Arc<dyn AuthProvider>>,
        updater: Option<Arc<MdnsUpdater>>,
    ) -> Self {
        // The timeout is kept short: a request that succeeds after the
        // caller has moved on can register the node twice at different
        // aggregators.
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to create HTTP client");

        HttpSender {
            client,
            discovery,
            api_version,
            aggregator: Mutex::new(None),
            auth: Mutex::new(auth),
            updater,
        }
    }

    /// The cached aggregator href, or an empty string.
    pub async fn api_href(&self) -> String {
        self.aggregator
            .lock()
            .await
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default()
    }

    /// Forget the cached aggregator so the next call starts with a fresh
    /// discovery.
    pub async fn invalidate_aggregator(&self) {
        *self.aggregator.lock().await = None;
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<ResponseBody>> {
        {
            let mut aggregator = self.aggregator.lock().await;
            if aggregator.is_none() {
                *aggregator = self.discovery.resolve().await;
            }
        }

        let api_path = format!("/{}/{}/{}{}", API_NAMESPACE, API_NAME, self.api_version, path);

        for attempt in 0..SEND_ATTEMPTS {
            let Some(aggregator) = self.aggregator.lock().await.clone() else {
                warn!("No aggregator available on the network");
                if let Some(updater) = &self.updater {
                    updater.inc_p2p_enable_count().await;
                }
                return Err(Error::NoAggregator);
            };

            match aggregator.join(&api_path) {
                Ok(url) => {
                    debug!("{} {}", method, url);
                    match self.attempt(&method, url, body).await {
                        Attempt::Done(response) => return Ok(response),
                        Attempt::Rejected(status) => return Err(Error::InvalidRequest(status)),
                        Attempt::Failover => {}
                    }
                }
                Err(err) => warn!("Cannot build URL on aggregator {}: {}", aggregator, err),
            }

            // This aggregator is non-functional
            let next = self.discovery.resolve().await;
            *self.aggregator.lock().await = next;
            info!("Updated aggregator to '{}' (attempt {})", self.api_href().await, attempt);
        }

        Err(Error::TooManyRetries)
    }

    async fn attempt(&self, method: &Method, url: Url, body: Option<&Value>) -> Attempt {
        let response = match self.request(method.clone(), url.clone(), body).await {
            Ok(response) => response,
            Err(err) => {
                // Log a warning, then let another aggregator be chosen
                warn!("{} from aggregator {}", err, url);
                return Attempt::Failover;
            }
        };

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            let json = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map_or(false, |value| value.starts_with("application/json"));

            let body = if json {
                response.json().await.map(ResponseBody::Json)
            } else {
                response.bytes().await.map(|bytes| ResponseBody::Raw(bytes.to_vec()))
            };

            match body {
                Ok(body) => Attempt::Done(Some(body)),
                Err(err) => {
                    warn!("{} from aggregator {}", err, url);
                    Attempt::Failover
                }
            }
        } else if status == StatusCode::NO_CONTENT {
            Attempt::Done(None)
        } else if status.is_client_error() {
            warn!("{} response from aggregator: {} {}", status, method, url);
            Attempt::Rejected(status)
        } else {
            warn!("Unexpected status from aggregator {}: {}", url, status);
            Attempt::Failover
        }
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> reqwest::Result<reqwest::Response> {
        let provider = self.auth.lock().await.clone();
        let token = match provider {
            Some(provider) => self.bearer_token(&provider).await,
            None => None,
        };

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await
    }

    // Fetch a bearer token, refreshing once when the current one is
    // rejected. A provider that keeps failing is detached and the call
    // continues unauthenticated.
    async fn bearer_token(&self, provider: &Arc<dyn AuthProvider>) -> Option<String> {
        match provider.bearer_token().await {
            Ok(token) => Some(token),
            Err(AuthError::InvalidToken) => {
                warn!("Invalid token. Requesting new token");
                let refreshed = match provider.refresh().await {
                    Ok(()) => provider.bearer_token().await,
                    Err(err) => Err(err),
                };
                match refreshed {
                    Ok(token) => Some(token),
                    Err(err) => {
                        error!("Error refreshing token: {}. Removing auth client", err);
                        self.detach_auth().await;
                        None
                    }
                }
            }
            Err(err) => {
                error!("Failed to fetch token before making API call: {}. Removing auth client", err);
                self.detach_auth().await;
                None
            }
        }
    }

    async fn detach_auth(&self) {
        *self.auth.lock().await = None;
    }
}
