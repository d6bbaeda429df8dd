pub mod resource;
pub mod version;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use resource::ResourceEnvelope;
use tokio::sync::RwLock;

type EntityMap = HashMap<String, HashMap<String, HashMap<String, ResourceEnvelope>>>;

/// Local mirror of everything the proxy believes is (or should be)
/// registered with the Registration API.
///
/// The node envelope is held separately from other entities, which live
/// in a namespace -> type -> key map. `registered` is the controller's
/// belief about the remote state and is read on every actor tick.
#[derive(Debug, Default)]
pub struct Mirror {
    node: RwLock<Option<ResourceEnvelope>>,
    entities: RwLock<EntityMap>,
    registered: AtomicBool,
    auth_client_registered: AtomicBool,
}

impl Mirror {
    #[must_use]
    pub fn new() -> Self {
        Mirror::default()
    }

    pub fn registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn auth_client_registered(&self) -> bool {
        self.auth_client_registered.load(Ordering::SeqCst)
    }

    pub fn set_auth_client_registered(&self, registered: bool) {
        self.auth_client_registered.store(registered, Ordering::SeqCst);
    }

    pub async fn node(&self) -> Option<ResourceEnvelope> {
        self.node.read().await.clone()
    }

    pub async fn set_node(&self, envelope: ResourceEnvelope) {
        *self.node.write().await = Some(envelope);
    }

    pub async fn clear_node(&self) {
        *self.node.write().await = None;
    }

    pub async fn put_entity(
        &self,
        namespace: &str,
        res_type: &str,
        key: &str,
        envelope: ResourceEnvelope,
    ) {
        let mut entities = self.entities.write().await;
        entities
            .entry(namespace.to_string())
            .or_default()
            .entry(res_type.to_string())
            .or_default()
            .insert(key.to_string(), envelope);
    }

    pub async fn del_entity(
        &self,
        namespace: &str,
        res_type: &str,
        key: &str,
    ) -> Option<ResourceEnvelope> {
        let mut entities = self.entities.write().await;
        entities.get_mut(namespace)?.get_mut(res_type)?.remove(key)
    }

    pub async fn get_entity(
        &self,
        namespace: &str,
        res_type: &str,
        key: &str,
    ) -> Option<ResourceEnvelope> {
        let entities = self.entities.read().await;
        entities.get(namespace)?.get(res_type)?.get(key).cloned()
    }

    /// Snapshot of all entity identities, grouped by type in the given
    /// order first, then every remaining type in unspecified order.
    /// Yields `(namespace, type, key)` triples.
    pub async fn entity_keys(&self, order: &[&str]) -> Vec<(String, String, String)> {
        let entities = self.entities.read().await;
        let mut keys = Vec::new();

        for res_type in order {
            for (namespace, types) in entities.iter() {
                if let Some(items) = types.get(*res_type) {
                    for key in items.keys() {
                        keys.push((namespace.clone(), (*res_type).to_string(), key.clone()));
                    }
                }
            }
        }

        for (namespace, types) in entities.iter() {
            for (res_type, items) in types.iter() {
                if !order.contains(&res_type.as_str()) {
                    for key in items.keys() {
                        keys.push((namespace.clone(), res_type.clone(), key.clone()));
                    }
                }
            }
        }

        keys
    }
}
