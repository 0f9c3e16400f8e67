//! OpenStack API Client
//!
//! A Rust client library for the OpenStack Compute v2 and Network v2 APIs,
//! covering the operations a floating IP controller needs: server lookup,
//! network and subnet name resolution, floating IP search/allocation, and
//! instance association.
//!
//! # Example
//!
//! ```no_run
//! use openstack_client::{AuthOptions, OpenStackClient, OpenStackClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OpenStackClient::new(AuthOptions {
//!     auth_url: "https://keystone.example.com/v3".to_string(),
//!     username: "fip-controller".to_string(),
//!     password: "secret".to_string(),
//!     user_domain_name: "Default".to_string(),
//!     project_name: "cloud".to_string(),
//!     project_domain_name: "Default".to_string(),
//! })
//! .await?;
//!
//! let network_id = client.get_network_id_by_name("FloatingIP-external").await?;
//! let server = client.get_server_by_name("worker-0").await?;
//! let fip = client
//!     .get_or_create_floating_ip("", &network_id, "subnet-id", &server.tenant_id, "poolA", true)
//!     .await?;
//! client.ensure_associated_instance_and_fip(&server, &fip).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Keystone v3**: Password authentication with token caching and
//!   re-authentication on expiry
//! - **Cross-project visibility**: Network listings carry the
//!   `X-Auth-All-Projects` header; server listings use `all_tenants`
//! - **Floating IP reuse**: Nodepool-scoped reuse of unattached FIPs

pub mod auth;
pub mod client;
mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod os_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use auth::AuthOptions;
pub use client::{fip_description, OpenStackClient, CREATE_FIP_DESCRIPTION};
pub use error::OpenStackError;
pub use models::*;
pub use os_trait::OpenStackClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockOpenStackClient;
