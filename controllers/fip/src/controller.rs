//! Main controller implementation.
//!
//! Wires the node cache, work queue and reconciler together: workers drain the
//! queue, a ticker periodically re-enqueues every cached node to catch
//! cloud-side drift, and a stop signal drains everything for shutdown.

use crate::config::Options;
use crate::error::ControllerError;
use crate::metrics;
use crate::node_cache::{NodeCache, NodeStore};
use crate::reconciler::Reconciler;
use crate::workqueue::RateLimitedQueue;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Node;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use openstack_client::{AuthOptions, OpenStackClient, OpenStackError};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// How often a failing key is re-admitted before it is dropped until the next
/// event or resync tick.
const MAX_RETRIES: u32 = 5;

/// Ties the adapters, queue and workers together.
pub struct Controller {
    queue: Arc<RateLimitedQueue>,
    nodes: Arc<NodeCache>,
    reconciler: Arc<Reconciler>,
    recheck_interval: Duration,
}

impl Controller {
    /// Builds the Kubernetes and OpenStack clients and assembles the
    /// controller. Fails fast on any bootstrap problem.
    pub async fn new(opts: &Options, auth: AuthOptions) -> Result<Arc<Self>, ControllerError> {
        let client = match &opts.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|err| {
                    ControllerError::InvalidConfig(format!(
                        "cannot read kubeconfig {}: {}",
                        path.display(),
                        err
                    ))
                })?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|err| {
                        ControllerError::InvalidConfig(format!("invalid kubeconfig: {}", err))
                    })?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        let openstack = OpenStackClient::new(auth).await?;
        let nodes = NodeCache::new(Api::<Node>::all(client));
        let reconciler = Arc::new(Reconciler::new(
            nodes.clone(),
            Box::new(openstack),
            opts.default_floating_network.clone(),
            opts.default_floating_subnet.clone(),
        ));

        Ok(Arc::new(Self {
            queue: RateLimitedQueue::new(),
            nodes,
            reconciler,
            recheck_interval: opts.recheck_interval,
        }))
    }

    /// Runs the controller until the stop signal fires.
    pub async fn run(self: Arc<Self>, threadiness: usize, mut stop: watch::Receiver<bool>) {
        info!("starting controller");

        let cache_task = tokio::spawn(
            self.nodes
                .clone()
                .run(self.queue.clone(), stop.clone()),
        );

        info!("waiting for caches to sync");
        if !self.nodes.wait_for_cache_sync(stop.clone()).await {
            error!("stopped while waiting for node cache to sync");
            self.queue.shut_down();
            let _ = cache_task.await;
            return;
        }

        let mut workers = Vec::new();
        for worker in 0..threadiness.max(1) {
            let controller = self.clone();
            workers.push(tokio::spawn(async move {
                controller.run_worker(worker).await;
            }));
        }

        let ticker = {
            let controller = self.clone();
            let mut stop = stop.clone();
            tokio::spawn(async move {
                let interval = controller.recheck_interval;
                let start = tokio::time::Instant::now() + interval;
                let mut ticker = tokio::time::interval_at(start, interval);
                loop {
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = ticker.tick() => {
                            for key in controller.nodes.list_keys() {
                                controller.queue.add(&key);
                            }
                            info!(interval = ?interval, "completed another cycle");
                        }
                    }
                }
            })
        };

        let _ = stop.changed().await;
        info!("stopping controller");
        self.queue.shut_down();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = ticker.await;
        let _ = cache_task.await;
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        while let Some(key) = self.queue.get().await {
            let outcome = AssertUnwindSafe(self.reconciler.sync(&key))
                .catch_unwind()
                .await;
            self.queue.done(&key);

            let result = outcome.unwrap_or_else(|_| {
                error!(worker, key = %key, "panic while syncing key");
                Err(ControllerError::Reconciliation(format!(
                    "panic while syncing {}",
                    key
                )))
            });
            handle_sync_result(&self.queue, &key, result);
        }
    }
}

/// Accounts a finished sync and decides whether the key is retried.
fn handle_sync_result(
    queue: &Arc<RateLimitedQueue>,
    key: &str,
    result: Result<(), ControllerError>,
) {
    let err = match result {
        Ok(()) => {
            metrics::SUCCESSFUL_OPERATIONS.inc();
            queue.forget(key);
            return;
        }
        Err(err) => err,
    };

    metrics::FAILED_OPERATIONS.inc();
    match &err {
        ControllerError::OpenStack(OpenStackError::CreateFip(_)) => {
            metrics::CREATE_FIP_ERRORS.inc()
        }
        ControllerError::OpenStack(OpenStackError::AssociateFip(_)) => {
            metrics::ASSOCIATE_INSTANCE_FIP_ERRORS.inc()
        }
        _ => {}
    }

    if queue.num_requeues(key) < MAX_RETRIES {
        info!(key = %key, error = %err, "error syncing key");
        queue.add(key);
        return;
    }

    queue.forget(key);
    info!(key = %key, error = %err, "dropping from queue");
}
