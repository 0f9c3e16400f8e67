//! Node cache and watch handling
//!
//! Maintains a local mirror of the cluster's Node objects fed by a watch
//! stream, enqueues node keys on relevant changes, and performs the label
//! mutation the reconciler needs. Update events only enqueue when the node's
//! labels or annotations actually changed; status-only churn is dropped.

use crate::error::ControllerError;
use crate::workqueue::RateLimitedQueue;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::Api;
use kube_runtime::watcher::{self, watcher};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Read access to the node mirror plus the label mutation, as consumed by the
/// reconciler. Split out so tests can substitute an in-memory store.
#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    /// Returns the cached node for a key, if it still exists.
    fn get_by_key(&self, key: &str) -> Option<Node>;

    /// Returns the keys of all cached nodes.
    fn list_keys(&self) -> Vec<String>;

    /// Merges the given labels into the node's labels on the API server,
    /// leaving unrelated labels and annotations untouched.
    async fn add_labels_to_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), ControllerError>;
}

/// Locally synchronized mirror of the cluster's Node objects.
pub struct NodeCache {
    api: Api<Node>,
    store: RwLock<HashMap<String, Node>>,
    synced: watch::Sender<bool>,
}

impl NodeCache {
    pub fn new(api: Api<Node>) -> Arc<Self> {
        let (synced, _) = watch::channel(false);
        Arc::new(Self {
            api,
            store: RwLock::new(HashMap::new()),
            synced,
        })
    }

    /// Consumes the node watch stream until the stop signal fires, keeping the
    /// mirror current and enqueueing keys for add/update/delete events.
    pub async fn run(self: Arc<Self>, queue: Arc<RateLimitedQueue>, mut stop: watch::Receiver<bool>) {
        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));
        let mut pending: HashMap<String, Node> = HashMap::new();

        loop {
            let event = tokio::select! {
                _ = stop.changed() => break,
                event = stream.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "node watch error");
                    continue;
                }
            };

            match event {
                watcher::Event::Init => pending.clear(),
                watcher::Event::InitApply(node) => {
                    if let Some(key) = node_key(&node) {
                        pending.insert(key, node);
                    }
                }
                watcher::Event::InitDone => {
                    let snapshot = std::mem::take(&mut pending);
                    {
                        let mut store = self.store.write().expect("node store lock poisoned");
                        *store = snapshot;
                        for key in store.keys() {
                            queue.add(key);
                        }
                    }
                    self.synced.send_replace(true);
                    debug!("node cache synced");
                }
                watcher::Event::Apply(node) => {
                    let Some(key) = node_key(&node) else { continue };
                    let previous = self
                        .store
                        .write()
                        .expect("node store lock poisoned")
                        .insert(key.clone(), node.clone());
                    match previous {
                        None => queue.add(&key),
                        Some(old) if spec_changed(&old, &node) => queue.add(&key),
                        Some(_) => debug!(node = %key, "dropping status-only update"),
                    }
                }
                watcher::Event::Delete(node) => {
                    let Some(key) = node_key(&node) else { continue };
                    self.store
                        .write()
                        .expect("node store lock poisoned")
                        .remove(&key);
                    queue.add(&key);
                }
            }
        }
    }

    /// Blocks until the initial list has been mirrored. Returns false if the
    /// stop signal fires first.
    pub async fn wait_for_cache_sync(&self, mut stop: watch::Receiver<bool>) -> bool {
        let mut synced = self.synced.subscribe();
        loop {
            if *synced.borrow() {
                return true;
            }
            tokio::select! {
                changed = synced.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = stop.changed() => return false,
            }
        }
    }
}

#[async_trait::async_trait]
impl NodeStore for NodeCache {
    fn get_by_key(&self, key: &str) -> Option<Node> {
        self.store
            .read()
            .expect("node store lock poisoned")
            .get(key)
            .cloned()
    }

    fn list_keys(&self) -> Vec<String> {
        self.store
            .read()
            .expect("node store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    async fn add_labels_to_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Cluster-scoped queue key for a node: its name.
pub fn node_key(node: &Node) -> Option<String> {
    node.metadata.name.clone()
}

/// Whether an update carries a change the reconciler cares about: a structural
/// difference in labels or annotations.
pub fn spec_changed(old: &Node, new: &Node) -> bool {
    old.metadata.labels != new.metadata.labels
        || old.metadata.annotations != new.metadata.annotations
}
