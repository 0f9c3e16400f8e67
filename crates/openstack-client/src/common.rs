//! Common HTTP plumbing for the OpenStack API modules
//!
//! Wraps the authenticated session with typed request helpers. Every request
//! carries the scoped token; a 401 response invalidates the cached token and
//! the request is retried once after re-authentication.

use crate::auth::Session;
use crate::error::OpenStackError;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

/// Which service endpoint from the catalog a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Service {
    Compute,
    Network,
}

/// Header granting cross-project visibility on network listings.
pub(crate) const ALL_PROJECTS_HEADER: &str = "X-Auth-All-Projects";

pub(crate) struct ApiClient {
    http: reqwest::Client,
    session: Session,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, session: Session) -> Self {
        Self { http, session }
    }

    /// Issues a request against a catalog endpoint, re-authenticating once on 401.
    async fn request(
        &self,
        method: Method,
        service: Service,
        path: &str,
        body: Option<&serde_json::Value>,
        all_projects: bool,
    ) -> Result<reqwest::Response, OpenStackError> {
        let mut reauthenticated = false;
        loop {
            let token = self.session.token().await?;
            let base = match service {
                Service::Compute => &token.compute_url,
                Service::Network => &token.network_url,
            };
            let url = format!("{}{}", base, path);

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("X-Auth-Token", &token.token)
                .header("Accept", "application/json");
            if all_projects {
                request = request.header(ALL_PROJECTS_HEADER, "true");
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && !reauthenticated {
                self.session.invalidate().await;
                reauthenticated = true;
                continue;
            }
            return Ok(response);
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        all_projects: bool,
    ) -> Result<T, OpenStackError> {
        let response = self
            .request(Method::GET, service, path, None, all_projects)
            .await?;
        decode(path, response).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, OpenStackError> {
        let response = self
            .request(Method::POST, service, path, Some(body), false)
            .await?;
        decode(path, response).await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, OpenStackError> {
        let response = self
            .request(Method::PUT, service, path, Some(body), false)
            .await?;
        decode(path, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, OpenStackError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::NotFound(format!("{} - {}", path, body)));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Api(format!(
            "{} failed: {} - {}",
            path, status, body
        )));
    }
    response.json().await.map_err(OpenStackError::Http)
}

/// Builds a query string from key/value filters, URL-encoding both sides.
pub(crate) fn build_query_string(filters: &[(&str, &str)]) -> String {
    if filters.is_empty() {
        String::new()
    } else {
        let query = filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("?{}", query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_query_string_empty() {
        assert_eq!(build_query_string(&[]), "");
    }

    #[test]
    fn build_query_string_encodes_values() {
        let query = build_query_string(&[
            ("name", "FloatingIP external"),
            ("status", "ACTIVE"),
        ]);
        assert_eq!(query, "?name=FloatingIP%20external&status=ACTIVE");
    }
}
