use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nmos_proxy_model::resource;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub type TxtRecords = HashMap<String, String>;

pub const DEFAULT_P2P_CUT_IN_COUNT: u32 = 5;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MdnsError {
    #[error("mDNS service not found")]
    ServiceNotFound,
    #[error("mDNS engine error: {0}")]
    Engine(String),
}

/// Handle onto the mDNS responder. Implemented over zeroconf in
/// [`crate::mdns`].
pub trait MdnsEngine: Send + Sync {
    fn register(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
        txt: &TxtRecords,
    ) -> Result<(), MdnsError>;

    /// Replace the TXT records of a previously registered service.
    fn update(&self, name: &str, service_type: &str, txt: &TxtRecords) -> Result<(), MdnsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MdnsAction {
    Register,
    Update,
    Unregister,
}

/// TXT keys carrying per-type version counters in P2P mode.
#[must_use]
pub fn default_txt_mappings() -> HashMap<String, String> {
    [
        (resource::NODE, "ver_slf"),
        (resource::DEVICE, "ver_dvc"),
        (resource::SOURCE, "ver_src"),
        (resource::FLOW, "ver_flw"),
        (resource::SENDER, "ver_snd"),
        (resource::RECEIVER, "ver_rcv"),
    ]
    .into_iter()
    .map(|(res_type, txt_key)| (res_type.to_string(), txt_key.to_string()))
    .collect()
}

#[derive(Debug)]
struct P2pState {
    service_versions: HashMap<String, u8>,
    enabled: bool,
    enable_count: u32,
}

#[must_use]
pub struct MdnsUpdaterBuilder {
    engine: Arc<dyn MdnsEngine>,
    name: String,
    service_type: String,
    port: u16,
    txt_base: TxtRecords,
    mappings: HashMap<String, String>,
    p2p_enable: bool,
    cut_in_count: u32,
    poll_interval: Duration,
}

impl MdnsUpdaterBuilder {
    pub fn new<S: Into<String>>(
        engine: Arc<dyn MdnsEngine>,
        name: S,
        service_type: S,
        port: u16,
    ) -> Self {
        MdnsUpdaterBuilder {
            engine,
            name: name.into(),
            service_type: service_type.into(),
            port,
            txt_base: TxtRecords::new(),
            mappings: default_txt_mappings(),
            p2p_enable: false,
            cut_in_count: DEFAULT_P2P_CUT_IN_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_txt_records(mut self, txt: TxtRecords) -> Self {
        self.txt_base = txt;
        self
    }

    pub fn with_mappings(mut self, mappings: HashMap<String, String>) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_p2p_enable(mut self, enable: bool) -> Self {
        self.p2p_enable = enable;
        self
    }

    pub fn with_p2p_cut_in_count(mut self, count: u32) -> Self {
        self.cut_in_count = count;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Advertise the service and start the TXT update task. Must be
    /// called within a Tokio runtime.
    pub async fn build(self) -> Result<Arc<MdnsUpdater>, MdnsError> {
        self.engine
            .register(&self.name, &self.service_type, self.port, &self.txt_base)?;

        let service_versions = self
            .mappings
            .values()
            .map(|txt_key| (txt_key.clone(), 0))
            .collect();

        let updater = Arc::new(MdnsUpdater {
            engine: self.engine,
            name: self.name,
            service_type: self.service_type,
            txt_base: self.txt_base,
            mappings: self.mappings,
            cut_in_count: self.cut_in_count,
            poll_interval: self.poll_interval,
            state: Mutex::new(P2pState {
                service_versions,
                enabled: self.p2p_enable,
                enable_count: 0,
            }),
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(true),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(drain(updater.clone()));
        *updater.task.lock().await = Some(task);

        Ok(updater)
    }
}

/// Keeps the node's advertised TXT records current.
///
/// While P2P mode is engaged the records carry a version counter per
/// resource type, bumped on every register/update/unregister, so peers
/// can spot churn without a central registry. Registry loss signals
/// accumulate in `p2p_enable_count` until the cut-in threshold flips
/// P2P mode on; any successful registration disables it again.
pub struct MdnsUpdater {
    engine: Arc<dyn MdnsEngine>,
    name: String,
    service_type: String,
    txt_base: TxtRecords,
    mappings: HashMap<String, String>,
    cut_in_count: u32,
    poll_interval: Duration,
    state: Mutex<P2pState>,
    queue: Mutex<VecDeque<TxtRecords>>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MdnsUpdater {
    pub fn builder<S: Into<String>>(
        engine: Arc<dyn MdnsEngine>,
        name: S,
        service_type: S,
        port: u16,
    ) -> MdnsUpdaterBuilder {
        MdnsUpdaterBuilder::new(engine, name, service_type, port)
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn p2p_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    pub async fn p2p_enable_count(&self) -> u32 {
        self.state.lock().await.enable_count
    }

    /// Current P2P version counter for a resource type, when mapped.
    pub async fn service_version(&self, res_type: &str) -> Option<u8> {
        let txt_key = self.mappings.get(res_type)?;
        let state = self.state.lock().await;
        state.service_versions.get(txt_key).copied()
    }

    /// Advertise a resource change. All actions bump the same per-type
    /// version counter; a no-op unless P2P mode is engaged.
    pub async fn update_mdns(&self, res_type: &str, action: MdnsAction) {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return;
        }
        let Some(txt_key) = self.mappings.get(res_type) else {
            return;
        };

        debug!("mDNS action: {:?} {}", action, res_type);
        let version = state.service_versions.entry(txt_key.clone()).or_insert(0);
        *version = version.wrapping_add(1);

        let merged = self.p2p_txt_records(&state);
        self.queue.lock().await.push_back(merged);
    }

    /// Count a registry-loss signal towards the P2P cut-in threshold.
    pub async fn inc_p2p_enable_count(&self) {
        let mut state = self.state.lock().await;
        if state.enabled {
            return;
        }
        state.enable_count += 1;
        if state.enable_count >= self.cut_in_count {
            self.enable_locked(&mut state).await;
        }
    }

    pub async fn p2p_enable(&self) {
        let mut state = self.state.lock().await;
        self.enable_locked(&mut state).await;
    }

    pub async fn p2p_disable(&self) {
        let mut state = self.state.lock().await;
        state.enable_count = 0;
        if state.enabled {
            info!("Disabling P2P discovery");
            state.enabled = false;
            self.queue.lock().await.push_back(self.txt_base.clone());
        }
    }

    pub async fn stop(&self) {
        debug!("Stopping mDNS updater");
        self.running.store(false, Ordering::SeqCst);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn enable_locked(&self, state: &mut P2pState) {
        if state.enabled {
            return;
        }
        info!("Enabling P2P discovery");
        state.enabled = true;
        let merged = self.p2p_txt_records(state);
        self.queue.lock().await.push_back(merged);
    }

    fn p2p_txt_records(&self, state: &P2pState) -> TxtRecords {
        let mut txt = self.txt_base.clone();
        txt.extend(
            state
                .service_versions
                .iter()
                .map(|(key, version)| (key.clone(), version.to_string())),
        );
        txt
    }
}

async fn drain(updater: Arc<MdnsUpdater>) {
    debug!("Starting mDNS update task");
    while updater.running() {
        let txt = updater.queue.lock().await.pop_front();
        match txt {
            Some(txt) => {
                if let Err(err) = updater
                    .engine
                    .update(&updater.name, &updater.service_type, &txt)
                {
                    error!(
                        "Unable to update mDNS record of type {} and name {}: {}",
                        updater.service_type, updater.name, err
                    );
                }
            }
            None => sleep(updater.poll_interval).await,
        }
    }
    debug!("Stopping mDNS update task");
}
