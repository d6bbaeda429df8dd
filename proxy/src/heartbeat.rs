use std::sync::Arc;
use std::time::Duration;

use nmos_proxy_model::resource::{ResourceEnvelope, REGISTRATION_ORDER, RESOURCE_NAMESPACE};
use reqwest::{Method, StatusCode};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::queue::Request;
use crate::ProxyCore;

const STOP_POLL_SLICE: Duration = Duration::from_secs(1);

pub(crate) async fn run(core: Arc<ProxyCore>) {
    debug!("Starting heartbeat task");
    while core.running() {
        if !core.mirror.registered() {
            reregister(&core).await;
        } else if let Some(node) = core.mirror.node().await {
            heartbeat(&core, &node).await;
        } else {
            core.mirror.set_registered(false);
            core.inc_p2p_enable_count().await;
        }

        // Sleep in short slices so stop() is honoured promptly
        let mut remaining = core.config.heartbeat_interval;
        while !remaining.is_zero() && core.running() {
            let slice = remaining.min(STOP_POLL_SLICE);
            sleep(slice).await;
            remaining -= slice;
        }
    }
    debug!("Stopping heartbeat task");
}

pub(crate) async fn heartbeat(core: &ProxyCore, node: &ResourceEnvelope) {
    let Some(node_id) = node.id() else {
        warn!("Node envelope is missing an 'id'. Marking node for re-registration");
        core.mirror.set_registered(false);
        return;
    };

    debug!("Sending heartbeat for node {}", node_id);
    let path = format!("/health/nodes/{}", node_id);
    match core.sender.send(Method::POST, &path, None).await {
        Ok(_) => {}
        Err(Error::InvalidRequest(status)) if status == StatusCode::NOT_FOUND => {
            warn!("404 error on heartbeat. Marking node for re-registration");
            core.mirror.set_registered(false);
            core.inc_p2p_enable_count().await;
        }
        Err(Error::InvalidRequest(status)) => {
            // Protocol disagreement we cannot recover from
            error!(
                "Unrecoverable error code {} received from Registration API on heartbeat",
                status
            );
            core.shutdown();
        }
        Err(err) => {
            warn!(
                "Unexpected error on heartbeat: {}. Marking node for re-registration",
                err
            );
            core.mirror.set_registered(false);
        }
    }
}

/// Re-register just the node, then queue ordered POSTs for everything
/// else the mirror holds.
pub(crate) async fn reregister(core: &ProxyCore) {
    let Some(node) = core.mirror.node().await else {
        debug!("No node registered, re-register returning");
        return;
    };
    let Some(node_id) = node.id().map(str::to_string) else {
        warn!("Node envelope is missing an 'id', re-register returning");
        return;
    };

    // The registry garbage-collects nodes on heartbeat loss; clearing
    // any stale entry keeps the fresh POST from racing its collector.
    debug!("Clearing old node from API prior to re-registration");
    let delete_path = format!("/resource/nodes/{}", node_id);
    match core.sender.send(Method::DELETE, &delete_path, None).await {
        Ok(_) => {}
        Err(Error::InvalidRequest(status)) => {
            info!(
                "Invalid request when deleting node prior to registration: status {}",
                status
            );
        }
        Err(err) => {
            error!("Aborting node re-register! {}", err);
            return;
        }
    }

    core.mirror.set_registered(false);
    core.inc_p2p_enable_count().await;

    // Whatever is still pending is superseded by the bulk re-enqueue below
    core.queue.lock().await.clear();

    info!("Attempting re-registration for node {}", node_id);
    if let Err(err) = core.post_node(RESOURCE_NAMESPACE, &node, &node_id).await {
        warn!("Error re-registering node: {}", err);
        // Start from a fresh discovery next tick in case the aggregator
        // is issuing 4xx errors incorrectly
        core.sender.invalidate_aggregator().await;
        return;
    }

    core.mirror.set_registered(true);
    core.p2p_disable().await;

    // Re-submit mirrored resources, dependency order first
    for (namespace, res_type, key) in core.mirror.entity_keys(&REGISTRATION_ORDER).await {
        debug!(
            "Re-registration for {} '{}' in namespace '{}'",
            res_type, key, namespace
        );
        core.enqueue(Request {
            method: Method::POST,
            namespace,
            res_type,
            key,
        })
        .await;
    }
}
