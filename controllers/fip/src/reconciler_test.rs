//! Unit tests for the reconciler, driven through an in-memory node store and
//! the mock OpenStack client.

use super::*;
use k8s_openapi::api::core::v1::NodeSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use openstack_client::{fip_description, FloatingIp, MockOpenStackClient};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory `NodeStore` recording every label patch it applies.
#[derive(Default)]
struct FakeNodes {
    nodes: Mutex<HashMap<String, Node>>,
    patches: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl FakeNodes {
    fn insert(&self, node: Node) {
        let name = node.metadata.name.clone().expect("test node needs a name");
        self.nodes.lock().unwrap().insert(name, node);
    }

    fn patches(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.patches.lock().unwrap().clone()
    }

    fn label_of(&self, name: &str, key: &str) -> Option<String> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(name)?
            .metadata
            .labels
            .as_ref()?
            .get(key)
            .cloned()
    }
}

#[async_trait::async_trait]
impl NodeStore for FakeNodes {
    fn get_by_key(&self, key: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(key).cloned()
    }

    fn list_keys(&self) -> Vec<String> {
        self.nodes.lock().unwrap().keys().cloned().collect()
    }

    async fn add_labels_to_node(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        self.patches
            .lock()
            .unwrap()
            .push((name.to_string(), labels.clone()));
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| ControllerError::Reconciliation(format!("no such node {}", name)))?;
        node.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);
        Ok(())
    }
}

fn make_node(name: &str, labels: &[(&str, &str)], provider_id: Option<&str>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: (!labels.is_empty()).then(|| {
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
            ..Default::default()
        },
        spec: provider_id.map(|id| NodeSpec {
            provider_id: Some(id.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn unattached_fip(address: &str, project: &str, description: &str) -> FloatingIp {
    FloatingIp {
        id: format!("fip-{}", address),
        floating_ip_address: address.to_string(),
        tenant_id: project.to_string(),
        project_id: project.to_string(),
        fixed_ip_address: None,
        port_id: None,
        description: description.to_string(),
        floating_network_id: "net-1".to_string(),
    }
}

struct Fixture {
    nodes: Arc<FakeNodes>,
    openstack: MockOpenStackClient,
    reconciler: Reconciler,
}

fn fixture() -> Fixture {
    let nodes = Arc::new(FakeNodes::default());
    let openstack = MockOpenStackClient::new();
    openstack.add_network("net-1", "default-net");
    openstack.add_subnet("sub-1", "default-sub");
    let reconciler = Reconciler::new(
        nodes.clone(),
        Box::new(openstack.clone()),
        "default-net".to_string(),
        "default-sub".to_string(),
    );
    Fixture {
        nodes,
        openstack,
        reconciler,
    }
}

#[tokio::test]
async fn missing_node_is_a_silent_success() {
    let f = fixture();
    f.reconciler.sync("gone").await.unwrap();
    assert_eq!(f.openstack.calls(), 0);
    assert!(f.nodes.patches().is_empty());
}

#[tokio::test]
async fn disabled_node_performs_no_cloud_calls() {
    let f = fixture();
    f.nodes.insert(make_node("n5", &[(LABEL_ENABLED, "false")], None));
    f.reconciler.sync("n5").await.unwrap();
    assert_eq!(f.openstack.calls(), 0);
    assert!(f.nodes.patches().is_empty());
}

#[tokio::test]
async fn node_without_enabled_label_is_skipped() {
    let f = fixture();
    f.nodes.insert(make_node("n5", &[("role", "worker")], None));
    f.reconciler.sync("n5").await.unwrap();
    assert_eq!(f.openstack.calls(), 0);
}

#[tokio::test]
async fn fresh_node_gets_a_new_fip() {
    let f = fixture();
    f.openstack.add_server("s1", "n1", "p1");
    f.openstack.set_next_address("10.0.0.5");
    f.nodes.insert(make_node("n1", &[(LABEL_ENABLED, "true")], None));

    f.reconciler.sync("n1").await.unwrap();

    assert_eq!(f.openstack.fip_creates(), 1);
    assert_eq!(f.openstack.fip_updates(), 1);
    assert_eq!(
        f.nodes.label_of("n1", LABEL_EXTERNAL_IP).as_deref(),
        Some("10.0.0.5")
    );
    assert_eq!(
        f.nodes.patches(),
        vec![(
            "n1".to_string(),
            BTreeMap::from([(LABEL_EXTERNAL_IP.to_string(), "10.0.0.5".to_string())]),
        )]
    );
}

#[tokio::test]
async fn reuse_within_nodepool_skips_creation() {
    let f = fixture();
    f.openstack.add_server("s2", "n2", "p1");
    f.openstack.add_floating_ip(unattached_fip(
        "10.0.0.6",
        "p1",
        &fip_description("poolA"),
    ));
    f.nodes.insert(make_node(
        "n2",
        &[
            (LABEL_ENABLED, "true"),
            (LABEL_NODEPOOL_NAME, "poolA"),
            (LABEL_REUSE_FIPS, "true"),
        ],
        None,
    ));

    f.reconciler.sync("n2").await.unwrap();

    assert_eq!(f.openstack.fip_creates(), 0);
    assert_eq!(f.openstack.fip_updates(), 1);
    assert_eq!(
        f.nodes.label_of("n2", LABEL_EXTERNAL_IP).as_deref(),
        Some("10.0.0.6")
    );
}

#[tokio::test]
async fn reuse_without_nodepool_creates_instead() {
    let f = fixture();
    f.openstack.add_server("s2", "n2", "p1");
    f.openstack.add_floating_ip(unattached_fip("10.0.0.9", "p1", &fip_description("")));
    f.openstack.set_next_address("10.0.0.10");
    f.nodes.insert(make_node(
        "n2",
        &[(LABEL_ENABLED, "true"), (LABEL_REUSE_FIPS, "true")],
        None,
    ));

    f.reconciler.sync("n2").await.unwrap();

    assert_eq!(f.openstack.fip_creates(), 1);
    assert_eq!(
        f.nodes.label_of("n2", LABEL_EXTERNAL_IP).as_deref(),
        Some("10.0.0.10")
    );
}

#[tokio::test]
async fn override_labels_select_network_and_subnet() {
    let nodes = Arc::new(FakeNodes::default());
    let openstack = MockOpenStackClient::new();
    // Only the overridden names exist; resolving the defaults would fail.
    openstack.add_network("net-x", "netX");
    openstack.add_subnet("sub-x", "subX");
    openstack.add_server("s3", "n3", "p1");
    let reconciler = Reconciler::new(
        nodes.clone(),
        Box::new(openstack.clone()),
        "default-net".to_string(),
        "default-sub".to_string(),
    );
    nodes.insert(make_node(
        "n3",
        &[
            (LABEL_ENABLED, "true"),
            (LABEL_FLOATING_NETWORK_NAME, "netX"),
            (LABEL_FLOATING_SUBNET_NAME, "subX"),
        ],
        None,
    ));

    reconciler.sync("n3").await.unwrap();
    assert_eq!(openstack.fip_creates(), 1);
}

#[tokio::test]
async fn already_associated_fip_is_left_alone() {
    let f = fixture();
    f.openstack.add_server("s4", "n4", "p1");
    f.openstack.add_port("port-a", "s4");
    let mut fip = unattached_fip("10.0.0.7", "p1", &fip_description(""));
    fip.port_id = Some("port-a".to_string());
    fip.fixed_ip_address = Some("192.168.0.7".to_string());
    f.openstack.add_floating_ip(fip);
    f.nodes.insert(make_node(
        "n4",
        &[(LABEL_ENABLED, "true"), (LABEL_EXTERNAL_IP, "10.0.0.7")],
        None,
    ));

    f.reconciler.sync("n4").await.unwrap();

    assert_eq!(f.openstack.fip_creates(), 0);
    assert_eq!(f.openstack.fip_updates(), 0);
}

#[tokio::test]
async fn fip_bound_to_another_server_is_a_conflict() {
    let f = fixture();
    f.openstack.add_server("s4", "n4", "p1");
    f.openstack.add_port("port-a", "some-other-server");
    let mut fip = unattached_fip("10.0.0.7", "p1", &fip_description(""));
    fip.port_id = Some("port-a".to_string());
    fip.fixed_ip_address = Some("192.168.0.7".to_string());
    f.openstack.add_floating_ip(fip);
    f.nodes.insert(make_node(
        "n4",
        &[(LABEL_ENABLED, "true"), (LABEL_EXTERNAL_IP, "10.0.0.7")],
        None,
    ));

    let err = f.reconciler.sync("n4").await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::OpenStack(openstack_client::OpenStackError::FipConflict(_))
    ));
    assert_eq!(f.openstack.fip_updates(), 0);
}

#[tokio::test]
async fn second_sync_is_idempotent() {
    let f = fixture();
    f.openstack.add_server("s1", "n1", "p1");
    f.openstack.set_next_address("10.0.0.5");
    f.nodes.insert(make_node("n1", &[(LABEL_ENABLED, "true")], None));

    f.reconciler.sync("n1").await.unwrap();
    f.reconciler.sync("n1").await.unwrap();

    // No new allocation and no re-association on the second pass.
    assert_eq!(f.openstack.fip_creates(), 1);
    assert_eq!(f.openstack.fip_updates(), 1);
    assert_eq!(
        f.nodes.label_of("n1", LABEL_EXTERNAL_IP).as_deref(),
        Some("10.0.0.5")
    );
}

#[tokio::test]
async fn provider_id_lookup_takes_precedence() {
    let f = fixture();
    // Registered under a name that does not match the node.
    f.openstack.add_server("uuid-1", "compute-host-name", "p1");
    f.nodes.insert(make_node(
        "n6",
        &[(LABEL_ENABLED, "true")],
        Some("openstack:///uuid-1"),
    ));

    f.reconciler.sync("n6").await.unwrap();
    assert_eq!(f.openstack.fip_creates(), 1);
}

#[tokio::test]
async fn stale_provider_id_falls_back_to_name_lookup() {
    let f = fixture();
    f.openstack.add_server("s7", "n7", "p1");
    f.nodes.insert(make_node(
        "n7",
        &[(LABEL_ENABLED, "true")],
        Some("openstack:///no-such-instance"),
    ));

    f.reconciler.sync("n7").await.unwrap();
    assert_eq!(f.openstack.fip_creates(), 1);
}

#[test]
fn provider_id_parsing() {
    let node = make_node("n1", &[], Some("openstack:///abc-123"));
    assert_eq!(server_id_from_provider_id(&node).as_deref(), Some("abc-123"));

    let node = make_node("n1", &[], Some("openstack://region-a/abc-123"));
    assert_eq!(server_id_from_provider_id(&node).as_deref(), Some("abc-123"));

    let node = make_node("n1", &[], Some("aws:///i-0abc"));
    assert_eq!(server_id_from_provider_id(&node), None);

    let node = make_node("n1", &[], Some("openstack://"));
    assert_eq!(server_id_from_provider_id(&node), None);

    let node = make_node("n1", &[], None);
    assert_eq!(server_id_from_provider_id(&node), None);
}

#[test]
fn get_label_reads_node_labels() {
    let node = make_node("n1", &[(LABEL_ENABLED, "true")], None);
    assert_eq!(get_label(&node, LABEL_ENABLED), Some("true"));
    assert_eq!(get_label(&node, LABEL_EXTERNAL_IP), None);
}
