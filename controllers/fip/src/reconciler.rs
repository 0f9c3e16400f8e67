//! Per-node reconciliation
//!
//! Drives one node from observed state to desired state: resolve the floating
//! network and subnet, locate the backing OpenStack server, obtain a floating
//! IP, record it on the node, and ensure it is attached to the server. Every
//! step is idempotent so the procedure is safe under re-execution.

use crate::error::ControllerError;
use crate::node_cache::NodeStore;
use k8s_openapi::api::core::v1::Node;
use openstack_client::{OpenStackClientTrait, Server};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Whether the fip controller should handle the node.
pub const LABEL_ENABLED: &str = "kube-fip-controller.ccloud.sap.com/enabled";

/// Stores the FIP assigned to the node.
pub const LABEL_EXTERNAL_IP: &str = "kube-fip-controller.ccloud.sap.com/externalIP";

/// Controls which floating network is used for the FIP.
pub const LABEL_FLOATING_NETWORK_NAME: &str =
    "kube-fip-controller.ccloud.sap.com/floating-network-name";

/// Controls which floating subnet is used for the FIP.
pub const LABEL_FLOATING_SUBNET_NAME: &str =
    "kube-fip-controller.ccloud.sap.com/floating-subnet-name";

/// Identifies the nodepool a node belongs to.
pub const LABEL_NODEPOOL_NAME: &str = "ccloud.sap.com/nodepool";

/// Indicates whether FIPs should be re-used within the nodepool.
pub const LABEL_REUSE_FIPS: &str = "kube-fip-controller.ccloud.sap.com/reuse-fips";

/// Reconciles a single node key against the cloud.
pub struct Reconciler {
    nodes: Arc<dyn NodeStore>,
    openstack: Box<dyn OpenStackClientTrait>,
    default_floating_network: String,
    default_floating_subnet: String,
}

impl Reconciler {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        openstack: Box<dyn OpenStackClientTrait>,
        default_floating_network: String,
        default_floating_subnet: String,
    ) -> Self {
        Self {
            nodes,
            openstack,
            default_floating_network,
            default_floating_subnet,
        }
    }

    /// Synchronizes one node key. A key whose node no longer exists, or whose
    /// node has not opted in, is a successful no-op.
    pub async fn sync(&self, key: &str) -> Result<(), ControllerError> {
        let Some(node) = self.nodes.get_by_key(key) else {
            debug!(key = %key, "node does not exist anymore");
            return Ok(());
        };

        if get_label(&node, LABEL_ENABLED) != Some("true") {
            debug!(node = %key, label = LABEL_ENABLED, "ignoring node as label not set");
            return Ok(());
        }

        let floating_network_name = get_label(&node, LABEL_FLOATING_NETWORK_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.default_floating_network.as_str());
        let floating_network_id = self
            .openstack
            .get_network_id_by_name(floating_network_name)
            .await?;

        let floating_subnet_name = get_label(&node, LABEL_FLOATING_SUBNET_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.default_floating_subnet.as_str());
        let floating_subnet_id = self
            .openstack
            .get_subnet_id_by_name(floating_subnet_name)
            .await?;

        let floating_ip = get_label(&node, LABEL_EXTERNAL_IP).unwrap_or_default();
        let server = self.get_server(&node, key).await?;
        let nodepool = get_label(&node, LABEL_NODEPOOL_NAME).unwrap_or_default();
        let reuse_fips = get_label(&node, LABEL_REUSE_FIPS) == Some("true");

        let fip = self
            .openstack
            .get_or_create_floating_ip(
                floating_ip,
                &floating_network_id,
                &floating_subnet_id,
                &server.tenant_id,
                nodepool,
                reuse_fips,
            )
            .await?;

        self.nodes
            .add_labels_to_node(
                key,
                BTreeMap::from([(
                    LABEL_EXTERNAL_IP.to_string(),
                    fip.floating_ip_address.clone(),
                )]),
            )
            .await?;

        self.openstack
            .ensure_associated_instance_and_fip(&server, &fip)
            .await?;
        Ok(())
    }

    /// Locates the server backing a node: by the instance ID carried in the
    /// provider ID when possible, falling back to a lookup by node name.
    async fn get_server(&self, node: &Node, name: &str) -> Result<Server, ControllerError> {
        if let Some(server_id) = server_id_from_provider_id(node) {
            if let Ok(server) = self.openstack.get_server_by_id(&server_id).await {
                return Ok(server);
            }
        }
        Ok(self.openstack.get_server_by_name(name).await?)
    }
}

/// Returns a node label value by key.
pub fn get_label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

/// Extracts the OpenStack instance ID from a node's provider ID, which has the
/// form `openstack:///<id>` or `openstack://<region>/<id>`.
pub fn server_id_from_provider_id(node: &Node) -> Option<String> {
    let provider_id = node.spec.as_ref()?.provider_id.as_deref()?;
    let rest = provider_id.strip_prefix("openstack://")?;
    rest.rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
