//! Mock OpenStackClient for unit testing
//!
//! Provides an in-memory implementation of `OpenStackClientTrait` that can be
//! used in unit tests without a running cloud. The mock mirrors the selection
//! and association semantics of the real client and records how many mutating
//! calls were issued so tests can assert on side effects.

use crate::client::{fip_description, select_floating_ip};
use crate::error::OpenStackError;
use crate::models::{FloatingIp, Port, Server};
use crate::os_trait::OpenStackClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock OpenStack client for testing
#[derive(Clone, Default)]
pub struct MockOpenStackClient {
    servers: Arc<Mutex<Vec<Server>>>,
    networks: Arc<Mutex<Vec<(String, String)>>>,
    subnets: Arc<Mutex<Vec<(String, String)>>>,
    ports: Arc<Mutex<HashMap<String, Port>>>,
    fips: Arc<Mutex<Vec<FloatingIp>>>,
    /// Address handed out by the next create when none was requested.
    next_address: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<u32>>,
    fip_creates: Arc<Mutex<u32>>,
    fip_updates: Arc<Mutex<u32>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockOpenStackClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, id: &str, name: &str, tenant_id: &str) {
        self.servers.lock().unwrap().push(Server {
            id: id.to_string(),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
        });
    }

    pub fn add_network(&self, id: &str, name: &str) {
        self.networks
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
    }

    pub fn add_subnet(&self, id: &str, name: &str) {
        self.subnets
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
    }

    pub fn add_port(&self, id: &str, device_id: &str) {
        self.ports.lock().unwrap().insert(
            id.to_string(),
            Port {
                id: id.to_string(),
                device_id: device_id.to_string(),
            },
        );
    }

    pub fn add_floating_ip(&self, fip: FloatingIp) {
        self.fips.lock().unwrap().push(fip);
    }

    /// Configure the address the next parameterless create will allocate.
    pub fn set_next_address(&self, address: &str) {
        *self.next_address.lock().unwrap() = Some(address.to_string());
    }

    /// Total number of trait method invocations.
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    /// Number of floating IP create calls issued.
    pub fn fip_creates(&self) -> u32 {
        *self.fip_creates.lock().unwrap()
    }

    /// Number of floating IP association updates issued.
    pub fn fip_updates(&self) -> u32 {
        *self.fip_updates.lock().unwrap()
    }

    /// Snapshot of the stored floating IPs.
    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.fips.lock().unwrap().clone()
    }

    fn record_call(&self) {
        *self.calls.lock().unwrap() += 1;
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }
}

#[async_trait::async_trait]
impl OpenStackClientTrait for MockOpenStackClient {
    async fn get_server_by_id(&self, id: &str) -> Result<Server, OpenStackError> {
        self.record_call();
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|server| server.id == id)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("server {}", id)))
    }

    async fn get_server_by_name(&self, name: &str) -> Result<Server, OpenStackError> {
        self.record_call();
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|server| server.name == name)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("no server with name {} found", name)))
    }

    async fn get_network_id_by_name(&self, name: &str) -> Result<String, OpenStackError> {
        self.record_call();
        self.networks
            .lock()
            .unwrap()
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| OpenStackError::NotFound(format!("no network with name {} found", name)))
    }

    async fn get_subnet_id_by_name(&self, name: &str) -> Result<String, OpenStackError> {
        self.record_call();
        self.subnets
            .lock()
            .unwrap()
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| OpenStackError::NotFound(format!("no subnet with name {} found", name)))
    }

    async fn get_port_by_id(&self, id: &str) -> Result<Port, OpenStackError> {
        self.record_call();
        self.ports
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| OpenStackError::NotFound(format!("port {}", id)))
    }

    async fn get_or_create_floating_ip(
        &self,
        floating_ip: &str,
        floating_network_id: &str,
        subnet_id: &str,
        project_id: &str,
        nodepool: &str,
        reuse: bool,
    ) -> Result<FloatingIp, OpenStackError> {
        self.record_call();

        // Same listing filters as the real client.
        let description = fip_description(nodepool);
        let filter_description = reuse && floating_ip.is_empty() && !nodepool.is_empty();
        let listed: Vec<FloatingIp> = self
            .fips
            .lock()
            .unwrap()
            .iter()
            .filter(|fip| fip.project_id == project_id)
            .filter(|fip| floating_ip.is_empty() || fip.floating_ip_address == floating_ip)
            .filter(|fip| !filter_description || fip.description == description)
            .cloned()
            .collect();

        if let Some(fip) = select_floating_ip(listed, floating_ip, nodepool, reuse) {
            return Ok(fip);
        }

        *self.fip_creates.lock().unwrap() += 1;
        let address = if floating_ip.is_empty() {
            self.next_address
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| format!("172.24.4.{}", self.next_id()))
        } else {
            floating_ip.to_string()
        };
        let fip = FloatingIp {
            id: format!("fip-{}", self.next_id()),
            floating_ip_address: address,
            tenant_id: project_id.to_string(),
            project_id: project_id.to_string(),
            fixed_ip_address: None,
            port_id: None,
            description,
            floating_network_id: format!("{}/{}", floating_network_id, subnet_id),
        };
        self.fips.lock().unwrap().push(fip.clone());
        Ok(fip)
    }

    async fn ensure_associated_instance_and_fip(
        &self,
        server: &Server,
        fip: &FloatingIp,
    ) -> Result<(), OpenStackError> {
        self.record_call();

        let device_id = match fip.port_id.as_deref() {
            None | Some("") => String::new(),
            Some(port_id) => {
                self.ports
                    .lock()
                    .unwrap()
                    .get(port_id)
                    .cloned()
                    .ok_or_else(|| OpenStackError::NotFound(format!("port {}", port_id)))?
                    .device_id
            }
        };

        match device_id.as_str() {
            "" => {
                *self.fip_updates.lock().unwrap() += 1;
                let port_id = format!("port-{}", self.next_id());
                self.ports.lock().unwrap().insert(
                    port_id.clone(),
                    Port {
                        id: port_id.clone(),
                        device_id: server.id.clone(),
                    },
                );
                if let Some(stored) = self
                    .fips
                    .lock()
                    .unwrap()
                    .iter_mut()
                    .find(|stored| stored.id == fip.id)
                {
                    stored.port_id = Some(port_id);
                    stored.fixed_ip_address = Some(format!("192.168.0.{}", self.next_id()));
                }
                Ok(())
            }
            id if id == server.id => Ok(()),
            _ => Err(OpenStackError::FipConflict(server.name.clone())),
        }
    }
}
