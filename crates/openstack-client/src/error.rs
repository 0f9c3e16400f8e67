//! OpenStack client errors

use thiserror::Error;

/// Errors that can occur when interacting with the OpenStack APIs
#[derive(Debug, Error)]
pub enum OpenStackError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// OpenStack API returned an error
    #[error("OpenStack API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Keystone authentication failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No matching floating IP exists. Internal to `get_or_create_floating_ip`,
    /// where it drives the fallthrough to creation; callers never observe it.
    #[error("no matching floating IP found")]
    FipNotFound,

    /// Allocating a new floating IP failed
    #[error("Failed to create floating IP: {0}")]
    CreateFip(String),

    /// Attaching a floating IP to an instance failed
    #[error("Failed to associate floating IP: {0}")]
    AssociateFip(String),

    /// The floating IP is attached to a different instance
    #[error("FIP already associated with another server {0}")]
    FipConflict(String),
}

impl OpenStackError {
    /// Whether this is the internal floating-IP-not-found sentinel.
    pub fn is_fip_not_found(&self) -> bool {
        matches!(self, OpenStackError::FipNotFound)
    }
}
