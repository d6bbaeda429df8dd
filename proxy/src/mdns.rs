use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use nmos_proxy_model::version::APIVersion;
use reqwest::Url;
use tracing::{debug, error, info, warn};
use zeroconf::{
    browser::TMdnsBrowser, event_loop::TEventLoop, service::TMdnsService,
    txt_record::TTxtRecord, EventLoop, MdnsBrowser, MdnsService, ServiceDiscovery,
    ServiceRegistration, ServiceType, TxtRecord,
};

use crate::discovery::{MdnsBridge, LEGACY_REGISTER_MDNS_TYPE, REGISTER_MDNS_TYPE};
use crate::updater::{MdnsEngine, MdnsError, TxtRecords};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type AdvertList = Arc<Mutex<Vec<RegistryAdvert>>>;

/// A Registration API advertisement seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAdvert {
    pub service_type: String,
    pub api_proto: String,
    pub api_ver: Vec<APIVersion>,
    pub api_auth: bool,
    pub pri: u8,
    pub url: Url,
}

impl RegistryAdvert {
    fn parse(service_type: &str, discovery: &ServiceDiscovery) -> Option<Self> {
        // TXT record required
        let txt = discovery.txt().as_ref()?;

        let api_proto = txt.get("api_proto")?;
        let api_ver = txt.get("api_ver")?;
        let api_auth = txt.get("api_auth")?.parse().ok()?;
        let pri = txt.get("pri")?.parse().ok()?;

        // Use std to form a valid address:port authority
        let address = IpAddr::from_str(discovery.address()).ok()?;
        let authority = SocketAddr::new(address, *discovery.port());

        let url = match Url::parse(&format!("{}://{}/", api_proto, authority)) {
            Ok(url) => url,
            Err(err) => {
                error!("Cannot build URL: {}", err);
                return None;
            }
        };

        let api_ver = api_ver.split(',').flat_map(APIVersion::from_str).collect();

        Some(RegistryAdvert {
            service_type: service_type.to_string(),
            api_proto,
            api_ver,
            api_auth,
            pri,
            url,
        })
    }

    fn matches(&self, service_type: &str, api_version: APIVersion, scheme: &str) -> bool {
        self.service_type == service_type
            && self.api_proto == scheme
            && self.api_ver.contains(&api_version)
    }
}

/// Registry discovery backed by the zeroconf browsers.
#[derive(Clone, Default)]
pub struct ZeroconfBridge {
    adverts: AdvertList,
}

#[async_trait]
impl MdnsBridge for ZeroconfBridge {
    async fn resolve(
        &self,
        service_type: &str,
        _domain: Option<&str>,
        api_version: APIVersion,
        scheme: &str,
    ) -> Option<Url> {
        let mut adverts = self.adverts.lock().unwrap();
        // Smallest priority value wins
        let best = adverts
            .iter()
            .enumerate()
            .filter(|(_, advert)| advert.matches(service_type, api_version, scheme))
            .min_by_key(|(_, advert)| advert.pri)
            .map(|(index, _)| index)?;
        // Hand each advert out once; a dead aggregator must not be
        // offered straight back, and browsing keeps the list fresh
        Some(adverts.remove(best).url)
    }
}

enum MdnsCommand {
    Register {
        name: String,
        service_type: String,
        port: u16,
        txt: TxtRecords,
    },
    UpdateTxt(TxtRecords),
}

/// mDNS responder handle backed by the zeroconf thread.
pub struct ZeroconfEngine {
    commands: Mutex<Sender<MdnsCommand>>,
    advertised: AtomicBool,
}

impl ZeroconfEngine {
    fn send(&self, command: MdnsCommand) -> Result<(), MdnsError> {
        self.commands
            .lock()
            .unwrap()
            .send(command)
            .map_err(|_| MdnsError::Engine("mDNS thread has exited".to_string()))
    }
}

impl MdnsEngine for ZeroconfEngine {
    fn register(
        &self,
        name: &str,
        service_type: &str,
        port: u16,
        txt: &TxtRecords,
    ) -> Result<(), MdnsError> {
        self.send(MdnsCommand::Register {
            name: name.to_string(),
            service_type: service_type.to_string(),
            port,
            txt: txt.clone(),
        })?;
        self.advertised.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn update(&self, _name: &str, _service_type: &str, txt: &TxtRecords) -> Result<(), MdnsError> {
        if !self.advertised.load(Ordering::SeqCst) {
            return Err(MdnsError::ServiceNotFound);
        }
        self.send(MdnsCommand::UpdateTxt(txt.clone()))
    }
}

/// Start the zeroconf thread: browse for Registration APIs and host the
/// node's own advertisement. mDNS must run on its own thread; commands
/// cross over via a channel and discoveries land in the shared advert
/// list. The thread exits once every engine handle has been dropped.
pub fn spawn() -> (ZeroconfBridge, Arc<ZeroconfEngine>) {
    let bridge = ZeroconfBridge::default();
    let adverts = bridge.adverts.clone();
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("mdns".to_string())
        .spawn(move || run(adverts, rx))
        .expect("failed to spawn mDNS thread");

    let engine = Arc::new(ZeroconfEngine {
        commands: Mutex::new(tx),
        advertised: AtomicBool::new(false),
    });

    (bridge, engine)
}

struct AdvertSpec {
    name: String,
    service_type: String,
    port: u16,
    txt: TxtRecords,
}

fn run(adverts: AdvertList, commands: Receiver<MdnsCommand>) {
    let mut register_browser = browser(REGISTER_MDNS_TYPE, adverts.clone());
    let mut legacy_browser = browser(LEGACY_REGISTER_MDNS_TYPE, adverts);

    let register_loop = match register_browser.browse_services() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("Cannot browse registration services: {}", err);
            return;
        }
    };
    let legacy_loop = match legacy_browser.browse_services() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("Cannot browse legacy registration services: {}", err);
            return;
        }
    };

    let mut spec: Option<AdvertSpec> = None;
    loop {
        // (Re)advertise the node service, then poll all event loops
        // until the next command changes the advertised records
        let mut service = spec.as_ref().and_then(advertise);
        let service_loop = match service.as_mut() {
            Some(service) => match service.register() {
                Ok(event_loop) => Some(event_loop),
                Err(err) => {
                    error!("Cannot register mDNS service: {}", err);
                    None
                }
            },
            None => None,
        };

        let command = loop {
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(command) => break Some(command),
                Err(RecvTimeoutError::Timeout) => {
                    poll(&register_loop);
                    poll(&legacy_loop);
                    if let Some(event_loop) = &service_loop {
                        poll(event_loop);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };

        // Take the old advert down before replacing it
        drop(service_loop);
        drop(service);

        match command {
            Some(MdnsCommand::Register {
                name,
                service_type,
                port,
                txt,
            }) => {
                spec = Some(AdvertSpec {
                    name,
                    service_type,
                    port,
                    txt,
                });
            }
            Some(MdnsCommand::UpdateTxt(txt)) => {
                if let Some(spec) = &mut spec {
                    spec.txt = txt;
                }
            }
            None => break,
        }
    }
    debug!("mDNS thread exiting");
}

struct BrowserContext {
    service_type: String,
    adverts: AdvertList,
}

fn browser(service_type: &str, adverts: AdvertList) -> MdnsBrowser {
    let mut browser = MdnsBrowser::new(ServiceType::new(service_type, "tcp").unwrap());
    browser.set_context(Box::new(BrowserContext {
        service_type: service_type.to_string(),
        adverts,
    }));
    browser.set_service_discovered_callback(Box::new(|result, context| {
        on_discovered(result, context);
    }));
    browser
}

fn on_discovered(result: zeroconf::Result<ServiceDiscovery>, context: Option<Arc<dyn Any>>) {
    let context = context
        .as_ref()
        .and_then(|context| context.downcast_ref::<BrowserContext>());
    let Some(context) = context else {
        error!("Missing mDNS browser context");
        return;
    };

    match result {
        Ok(discovery) => {
            debug!("Discovered service: {:?}", discovery);
            if let Some(advert) = RegistryAdvert::parse(&context.service_type, &discovery) {
                let mut adverts = context.adverts.lock().unwrap();
                // De-duplicate on the advertised URL
                adverts.retain(|existing| {
                    existing.url != advert.url || existing.service_type != advert.service_type
                });
                adverts.push(advert);
            }
        }
        Err(err) => error!("Service discovery error: {}", err),
    }
}

fn advertise(spec: &AdvertSpec) -> Option<MdnsService> {
    let Some(service_type) = parse_service_type(&spec.service_type) else {
        error!("Invalid mDNS service type: {}", spec.service_type);
        return None;
    };

    let mut service = MdnsService::new(service_type, spec.port);
    service.set_name(&spec.name);

    let mut txt_record = TxtRecord::new();
    for (key, value) in &spec.txt {
        if let Err(err) = txt_record.insert(key, value) {
            warn!("Cannot set TXT record {}: {}", key, err);
        }
    }
    service.set_txt_record(txt_record);
    service.set_registered_callback(Box::new(registered_callback));

    Some(service)
}

// "_nmos-node._tcp" and plain "nmos-node" are both accepted
fn parse_service_type(service_type: &str) -> Option<ServiceType> {
    let mut parts = service_type.split('.').map(|part| part.trim_start_matches('_'));
    let name = parts.next()?;
    let protocol = parts.next().unwrap_or("tcp");
    ServiceType::new(name, protocol).ok()
}

fn registered_callback(
    result: zeroconf::Result<ServiceRegistration>,
    _context: Option<Arc<dyn Any>>,
) {
    match result {
        Ok(registration) => info!("{} service registered", registration.service_type()),
        Err(err) => error!("mDNS registration error: {}", err),
    }
}

fn poll(event_loop: &EventLoop<'_>) {
    if let Err(err) = event_loop.poll(Duration::ZERO) {
        error!("mDNS poll error: {}", err);
    }
}
