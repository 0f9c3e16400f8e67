//! OpenStackClient trait for mocking
//!
//! This trait abstracts the OpenStackClient to enable mocking in unit tests.
//! The concrete OpenStackClient implements this trait, and tests can use mock
//! implementations.

use crate::error::OpenStackError;
use crate::models::{FloatingIp, Port, Server};

/// Trait for OpenStack API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait OpenStackClientTrait: Send + Sync {
    /// Fetch a compute instance by ID.
    async fn get_server_by_id(&self, id: &str) -> Result<Server, OpenStackError>;

    /// Find a compute instance by exact name, searching across all projects.
    async fn get_server_by_name(&self, name: &str) -> Result<Server, OpenStackError>;

    /// Resolve an ACTIVE network name to its ID, searching across all projects.
    async fn get_network_id_by_name(&self, name: &str) -> Result<String, OpenStackError>;

    /// Resolve a subnet name to its ID.
    async fn get_subnet_id_by_name(&self, name: &str) -> Result<String, OpenStackError>;

    /// Fetch a network port by ID.
    async fn get_port_by_id(&self, id: &str) -> Result<Port, OpenStackError>;

    /// Return an existing floating IP matching the request, or allocate a new
    /// one on the given network/subnet. Issues at most one create call.
    async fn get_or_create_floating_ip(
        &self,
        floating_ip: &str,
        floating_network_id: &str,
        subnet_id: &str,
        project_id: &str,
        nodepool: &str,
        reuse: bool,
    ) -> Result<FloatingIp, OpenStackError>;

    /// Ensure the floating IP is attached to the given server. A FIP already
    /// attached to the server is a no-op; one attached elsewhere is an error.
    async fn ensure_associated_instance_and_fip(
        &self,
        server: &Server,
        fip: &FloatingIp,
    ) -> Result<(), OpenStackError>;
}
