//! OpenStack API client
//!
//! Typed operations over the Compute v2 and Network v2 APIs used for floating
//! IP management: server lookup, network/subnet name resolution, and the
//! find-or-create/associate floating IP state machines.

use crate::auth::{AuthOptions, Session};
use crate::common::{build_query_string, ApiClient, Service};
use crate::error::OpenStackError;
use crate::models::*;
use crate::os_trait::OpenStackClientTrait;
use std::time::Duration;
use tracing::{debug, error, info};

const NETWORK_STATUS_ACTIVE: &str = "ACTIVE";

/// Description stamped on every floating IP this controller allocates.
pub const CREATE_FIP_DESCRIPTION: &str = "Floating IP allocated by kube-fip-controller";

/// Builds the allocation description, scoped to a nodepool when one is set.
pub fn fip_description(nodepool: &str) -> String {
    if nodepool.is_empty() {
        CREATE_FIP_DESCRIPTION.to_string()
    } else {
        format!("{} nodepool={}", CREATE_FIP_DESCRIPTION, nodepool)
    }
}

/// OpenStack API client
pub struct OpenStackClient {
    api: ApiClient,
}

impl OpenStackClient {
    /// Creates a client and performs the initial Keystone authentication,
    /// resolving the compute and network endpoints from the service catalog.
    pub async fn new(auth: AuthOptions) -> Result<Self, OpenStackError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(OpenStackError::Http)?;

        let session = Session::new(http.clone(), auth);
        session.authenticate().await?;

        Ok(Self {
            api: ApiClient::new(http, session),
        })
    }

    async fn list_floating_ips(
        &self,
        filters: &[(&str, &str)],
    ) -> Result<Vec<FloatingIp>, OpenStackError> {
        let path = format!("/v2.0/floatingips{}", build_query_string(filters));
        let response: FloatingIpListResponse = self.api.get(Service::Network, &path, false).await?;
        Ok(response.floatingips)
    }

    /// Searches for a floating IP matching the request, or returns the
    /// `FipNotFound` sentinel.
    async fn find_floating_ip(
        &self,
        floating_ip: &str,
        project_id: &str,
        nodepool: &str,
        reuse: bool,
    ) -> Result<FloatingIp, OpenStackError> {
        let description = fip_description(nodepool);
        let mut filters = vec![("project_id", project_id)];
        if !floating_ip.is_empty() {
            filters.push(("floating_ip_address", floating_ip));
        }
        if reuse && floating_ip.is_empty() && !nodepool.is_empty() {
            filters.push(("description", description.as_str()));
        }

        let fips = self.list_floating_ips(&filters).await?;
        select_floating_ip(fips, floating_ip, nodepool, reuse).ok_or(OpenStackError::FipNotFound)
    }

    async fn create_floating_ip(
        &self,
        floating_ip: &str,
        floating_network_id: &str,
        subnet_id: &str,
        project_id: &str,
        nodepool: &str,
    ) -> Result<FloatingIp, OpenStackError> {
        let opts = FloatingIpCreateOpts {
            floating_network_id: floating_network_id.to_string(),
            subnet_id: (!subnet_id.is_empty()).then(|| subnet_id.to_string()),
            floating_ip_address: (!floating_ip.is_empty()).then(|| floating_ip.to_string()),
            project_id: (!project_id.is_empty()).then(|| project_id.to_string()),
            description: fip_description(nodepool),
        };
        let body = serde_json::json!({ "floatingip": opts });

        let response: Result<FloatingIpResponse, _> =
            self.api.post(Service::Network, "/v2.0/floatingips", &body).await;
        match response {
            Ok(response) => {
                info!(
                    floating_ip = %response.floatingip.floating_ip_address,
                    id = %response.floatingip.id,
                    "created floating ip"
                );
                Ok(response.floatingip)
            }
            Err(err) => {
                error!(floating_ip = %floating_ip, error = %err, "error creating floating ip");
                Err(OpenStackError::CreateFip(err.to_string()))
            }
        }
    }

    /// Attaches the floating IP to the server's network port.
    async fn associate_instance_and_fip(
        &self,
        server: &Server,
        fip: &FloatingIp,
    ) -> Result<(), OpenStackError> {
        let path = format!(
            "/v2.0/ports{}",
            build_query_string(&[("device_id", server.id.as_str())])
        );
        let ports: PortListResponse = self.api.get(Service::Network, &path, false).await?;
        let port = ports.ports.into_iter().next().ok_or_else(|| {
            OpenStackError::AssociateFip(format!("no port found for server {}", server.id))
        })?;

        info!(fip = %fip.floating_ip_address, server_id = %server.id, "attaching FIP to instance");
        let body = serde_json::json!({ "floatingip": { "port_id": port.id } });
        let path = format!("/v2.0/floatingips/{}", fip.id);
        let updated: Result<FloatingIpResponse, _> =
            self.api.put(Service::Network, &path, &body).await;
        match updated {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    fip = %fip.floating_ip_address,
                    server_id = %server.id,
                    error = %err,
                    "error attaching FIP to instance"
                );
                Err(OpenStackError::AssociateFip(err.to_string()))
            }
        }
    }
}

/// Walks a floating IP listing and picks the first acceptable entry.
///
/// An entry is acceptable when its address equals the requested one exactly.
/// When reusing within a nodepool and no specific address was requested, an
/// entry not bound to any instance is also acceptable.
pub(crate) fn select_floating_ip(
    fips: Vec<FloatingIp>,
    floating_ip: &str,
    nodepool: &str,
    reuse: bool,
) -> Option<FloatingIp> {
    fips.into_iter().find(|fip| {
        if !floating_ip.is_empty() && fip.floating_ip_address == floating_ip {
            return true;
        }
        reuse && floating_ip.is_empty() && !nodepool.is_empty() && !fip.is_attached()
    })
}

#[async_trait::async_trait]
impl OpenStackClientTrait for OpenStackClient {
    async fn get_server_by_id(&self, id: &str) -> Result<Server, OpenStackError> {
        let path = format!("/servers/{}", id);
        let response: ServerResponse = self.api.get(Service::Compute, &path, false).await?;
        Ok(response.server)
    }

    async fn get_server_by_name(&self, name: &str) -> Result<Server, OpenStackError> {
        let path = format!(
            "/servers/detail{}",
            build_query_string(&[("name", name), ("all_tenants", "true")])
        );
        let response: ServerListResponse = self.api.get(Service::Compute, &path, false).await?;
        response
            .servers
            .into_iter()
            .find(|server| server.name == name)
            .ok_or_else(|| OpenStackError::NotFound(format!("no server with name {} found", name)))
    }

    async fn get_network_id_by_name(&self, name: &str) -> Result<String, OpenStackError> {
        let path = format!(
            "/v2.0/networks{}",
            build_query_string(&[("name", name), ("status", NETWORK_STATUS_ACTIVE)])
        );
        let response: NetworkListResponse = self.api.get(Service::Network, &path, true).await?;
        response
            .networks
            .into_iter()
            .find(|network| network.name == name)
            .map(|network| network.id)
            .ok_or_else(|| OpenStackError::NotFound(format!("no network with name {} found", name)))
    }

    async fn get_subnet_id_by_name(&self, name: &str) -> Result<String, OpenStackError> {
        let path = format!("/v2.0/subnets{}", build_query_string(&[("name", name)]));
        let response: SubnetListResponse = self.api.get(Service::Network, &path, false).await?;
        response
            .subnets
            .into_iter()
            .find(|subnet| subnet.name == name)
            .map(|subnet| subnet.id)
            .ok_or_else(|| OpenStackError::NotFound(format!("no subnet with name {} found", name)))
    }

    async fn get_port_by_id(&self, id: &str) -> Result<Port, OpenStackError> {
        let path = format!("/v2.0/ports/{}", id);
        let response: PortResponse = self.api.get(Service::Network, &path, false).await?;
        Ok(response.port)
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
        match self
            .find_floating_ip(floating_ip, project_id, nodepool, reuse)
            .await
        {
            Ok(fip) => Ok(fip),
            Err(err) if err.is_fip_not_found() => {
                self.create_floating_ip(
                    floating_ip,
                    floating_network_id,
                    subnet_id,
                    project_id,
                    nodepool,
                )
                .await
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_associated_instance_and_fip(
        &self,
        server: &Server,
        fip: &FloatingIp,
    ) -> Result<(), OpenStackError> {
        // A freshly created FIP has no port yet; there is nothing to fetch.
        let device_id = match fip.port_id.as_deref() {
            None | Some("") => String::new(),
            Some(port_id) => self.get_port_by_id(port_id).await?.device_id,
        };

        match device_id.as_str() {
            "" => self.associate_instance_and_fip(server, fip).await,
            id if id == server.id => {
                info!(fip = %fip.floating_ip_address, server_id = %server.id, "FIP already attached to instance");
                Ok(())
            }
            _ => {
                debug!(
                    fip = %fip.floating_ip_address,
                    device_id = %device_id,
                    "FIP port bound to a different instance"
                );
                Err(OpenStackError::FipConflict(server.name.clone()))
            }
        }
    }
}
