//! Keystone v3 authentication
//!
//! Implements password authentication against the identity service and keeps
//! the issued token cached. A request that comes back 401 invalidates the
//! cached token so the next attempt re-authenticates, matching the
//! re-authentication behavior operators expect from long-lived controllers.

use crate::error::OpenStackError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

/// Credentials and scope for Keystone v3 password authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthOptions {
    /// Identity endpoint, with or without the `/v3` suffix.
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub user_domain_name: String,
    pub project_name: String,
    pub project_domain_name: String,
}

/// A scoped token together with the service endpoints resolved from the catalog.
#[derive(Debug, Clone)]
pub(crate) struct ScopedToken {
    pub token: String,
    pub compute_url: String,
    pub network_url: String,
}

/// Authenticated session shared by all API calls.
pub(crate) struct Session {
    http: Client,
    auth: AuthOptions,
    token: RwLock<Option<ScopedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    url: String,
}

impl Session {
    pub fn new(http: Client, auth: AuthOptions) -> Self {
        Self {
            http,
            auth,
            token: RwLock::new(None),
        }
    }

    /// Returns the cached scoped token, authenticating first if necessary.
    pub async fn token(&self) -> Result<ScopedToken, OpenStackError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.authenticate().await
    }

    /// Drops the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        self.token.write().await.take();
    }

    /// Performs password authentication and resolves the compute and network
    /// endpoints from the service catalog.
    pub async fn authenticate(&self) -> Result<ScopedToken, OpenStackError> {
        let url = format!("{}/auth/tokens", identity_base_url(&self.auth.auth_url));
        debug!(url = %url, username = %self.auth.username, "authenticating against keystone");

        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": self.auth.username,
                            "domain": { "name": self.auth.user_domain_name },
                            "password": self.auth.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": self.auth.project_name,
                        "domain": { "name": self.auth.project_domain_name },
                    }
                }
            }
        });

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Authentication(format!(
                "token request failed: {} - {}",
                status, text
            )));
        }

        let token = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                OpenStackError::Authentication("response carries no X-Subject-Token header".into())
            })?;

        let payload: TokenResponse = response.json().await?;
        let compute_url = endpoint_for(&payload.token.catalog, "compute")?;
        let network_url = endpoint_for(&payload.token.catalog, "network")?;

        let scoped = ScopedToken {
            token,
            compute_url,
            network_url,
        };
        *self.token.write().await = Some(scoped.clone());
        debug!("keystone authentication succeeded");
        Ok(scoped)
    }
}

/// Normalizes the identity endpoint to its `/v3` base.
fn identity_base_url(auth_url: &str) -> String {
    let trimmed = auth_url.trim_end_matches('/');
    if trimmed.ends_with("/v3") {
        trimmed.to_string()
    } else {
        format!("{}/v3", trimmed)
    }
}

/// Picks the public endpoint for a service type from the catalog.
fn endpoint_for(catalog: &[CatalogEntry], service_type: &str) -> Result<String, OpenStackError> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| ep.interface == "public")
        .map(|ep| ep.url.trim_end_matches('/').to_string())
        .ok_or_else(|| {
            OpenStackError::Authentication(format!(
                "catalog has no public {} endpoint",
                service_type
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_base_url_appends_v3() {
        assert_eq!(
            identity_base_url("https://keystone.example.com"),
            "https://keystone.example.com/v3"
        );
        assert_eq!(
            identity_base_url("https://keystone.example.com/"),
            "https://keystone.example.com/v3"
        );
    }

    #[test]
    fn identity_base_url_keeps_existing_v3() {
        assert_eq!(
            identity_base_url("https://keystone.example.com/v3"),
            "https://keystone.example.com/v3"
        );
        assert_eq!(
            identity_base_url("https://keystone.example.com/v3/"),
            "https://keystone.example.com/v3"
        );
    }

    #[test]
    fn endpoint_for_prefers_public_interface() {
        let catalog = vec![CatalogEntry {
            service_type: "network".to_string(),
            endpoints: vec![
                CatalogEndpoint {
                    interface: "internal".to_string(),
                    url: "http://internal:9696".to_string(),
                },
                CatalogEndpoint {
                    interface: "public".to_string(),
                    url: "https://neutron.example.com/".to_string(),
                },
            ],
        }];
        assert_eq!(
            endpoint_for(&catalog, "network").unwrap(),
            "https://neutron.example.com"
        );
    }

    #[test]
    fn endpoint_for_missing_service_is_an_error() {
        let err = endpoint_for(&[], "compute").unwrap_err();
        assert!(matches!(err, OpenStackError::Authentication(_)));
    }
}
