use std::sync::Arc;

use nmos_proxy_model::resource::{NODE, RESOURCE_NAMESPACE};
use reqwest::Method;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ProxyCore;

/// A queued register/unregister intent. POST payloads are looked up in
/// the mirror at dequeue time, so intents for keys that have since been
/// unregistered are harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Request {
    pub method: Method,
    pub namespace: String,
    pub res_type: String,
    pub key: String,
}

pub(crate) async fn run(core: Arc<ProxyCore>) {
    debug!("Starting registration queue task");
    // Keep draining after stop while registered so final unregisters get done
    loop {
        let registered = core.mirror.registered();
        let queue_empty = core.queue.lock().await.is_empty();
        if !core.running() && !(registered && !queue_empty) {
            break;
        }
        if !registered || queue_empty {
            sleep(core.config.queue_poll_interval).await;
            continue;
        }

        let request = core.queue.lock().await.pop_front();
        let Some(request) = request else { continue };

        if let Err(err) = process(&core, &request).await {
            warn!(
                "Error processing {} for {} '{}': {}. Marking node for re-registration",
                request.method, request.res_type, request.key, err
            );
            core.mirror.set_registered(false);
            core.p2p_disable().await;
        }
    }
    debug!("Stopping registration queue task");
}

pub(crate) async fn process(core: &ProxyCore, request: &Request) -> Result<()> {
    if request.method == Method::POST {
        post(core, request).await
    } else if request.method == Method::DELETE {
        delete(core, request).await
    } else {
        warn!(
            "Method {} not supported for Registration API interactions",
            request.method
        );
        Ok(())
    }
}

async fn post(core: &ProxyCore, request: &Request) -> Result<()> {
    if request.namespace == RESOURCE_NAMESPACE && request.res_type == NODE {
        register_node(core, &request.namespace).await;
        return Ok(());
    }

    let envelope = core
        .mirror
        .get_entity(&request.namespace, &request.res_type, &request.key)
        .await;
    let Some(envelope) = envelope else {
        debug!(
            "Skipping registration of {} '{}': no longer mirrored",
            request.res_type, request.key
        );
        return Ok(());
    };

    let path = format!("/{}", request.namespace);
    match core
        .sender
        .send(Method::POST, &path, Some(&envelope.to_wire()))
        .await
    {
        Ok(_) => Ok(()),
        Err(Error::InvalidRequest(status)) => {
            // Permanent rejection; garbage-collect the entity
            warn!(
                "Error registering {} '{}': status {}",
                request.res_type, request.key, status
            );
            warn!("Request data: {}", envelope.to_wire());
            let _ = core
                .mirror
                .del_entity(&request.namespace, &request.res_type, &request.key)
                .await;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn register_node(core: &ProxyCore, namespace: &str) {
    let Some(node) = core.mirror.node().await else {
        debug!("No node envelope held, skipping registration");
        return;
    };
    let Some(node_id) = node.id().map(str::to_string) else {
        warn!("Node envelope is missing an 'id', skipping registration");
        return;
    };

    info!("Attempting registration for node {}", node_id);
    match core.post_node(namespace, &node, &node_id).await {
        Ok(()) => {
            core.mirror.set_registered(true);
            core.p2p_disable().await;
        }
        Err(err) => warn!("Error registering node {}: {}", node_id, err),
    }
}

async fn delete(core: &ProxyCore, request: &Request) -> Result<()> {
    // Unregister paths take the pluralized type
    let path = format!(
        "/{}/{}s/{}",
        request.namespace, request.res_type, request.key
    );
    match core.sender.send(Method::DELETE, &path, None).await {
        Ok(_) => Ok(()),
        Err(Error::InvalidRequest(status)) => {
            warn!(
                "Error deleting resource {}s '{}': status {}",
                request.res_type, request.key, status
            );
            Ok(())
        }
        Err(err) => Err(err),
    }
}
