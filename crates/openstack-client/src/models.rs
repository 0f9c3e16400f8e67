//! OpenStack API models
//!
//! These models match the Compute v2 (Nova) and Network v2 (Neutron) wire
//! representations, trimmed to the fields the controller consumes.

use serde::{Deserialize, Serialize};

/// Compute instance as returned by `GET /servers/{id}` and `GET /servers/detail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    /// Owning project. Nova still reports this under its legacy name.
    #[serde(default)]
    pub tenant_id: String,
}

/// Neutron network (from `GET /v2.0/networks`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// Neutron subnet (from `GET /v2.0/subnets`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
}

/// Neutron port. `device_id` is empty when the port is not bound to an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub device_id: String,
}

/// Neutron floating IP (layer-3 extension).
///
/// `fixed_ip_address` and `port_id` are null on the wire while the FIP is
/// unattached, hence `Option`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub project_id: String,
    pub fixed_ip_address: Option<String>,
    pub port_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub floating_network_id: String,
}

impl FloatingIp {
    /// Whether the FIP is currently bound to an instance address.
    pub fn is_attached(&self) -> bool {
        self.fixed_ip_address.as_deref().is_some_and(|ip| !ip.is_empty())
    }
}

/// Request body for `POST /v2.0/floatingips`.
#[derive(Debug, Clone, Serialize)]
pub struct FloatingIpCreateOpts {
    pub floating_network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Specific address to allocate; omitted to let Neutron pick one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floating_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub description: String,
}

// Response envelopes. Both services wrap every payload in a resource-named key.

#[derive(Debug, Deserialize)]
pub(crate) struct ServerResponse {
    pub server: Server,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerListResponse {
    pub servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NetworkListResponse {
    pub networks: Vec<Network>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubnetListResponse {
    pub subnets: Vec<Subnet>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortResponse {
    pub port: Port,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortListResponse {
    pub ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FloatingIpResponse {
    pub floatingip: FloatingIp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FloatingIpListResponse {
    pub floatingips: Vec<FloatingIp>,
}
