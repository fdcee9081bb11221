use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::{Client, IntoUrl, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Reads services from the Consul catalog HTTP API.
#[derive(Debug)]
pub struct ConsulCatalog {
    base_url: Url,
    client: Client,
}

impl ConsulCatalog {
    pub fn new<U: IntoUrl>(
        url: U,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ConsulError> {
        let base_url = url.into_url()?;
        if base_url.cannot_be_a_base() {
            return Err(ConsulError::BadBaseUrl);
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(token)?;
            value.set_sensitive(true);
            headers.insert(TOKEN_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ConsulError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConsulError::BadBaseUrl)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl super::Catalog for ConsulCatalog {
    type Error = ConsulError;

    #[tracing::instrument(skip(self))]
    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>, Self::Error> {
        let url = self.endpoint(&["v1", "catalog", "services"])?;
        let services = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<HashMap<String, Vec<String>>>()
            .await?;

        debug!("got {} services from Consul", services.len());
        Ok(services)
    }

    #[tracing::instrument(skip(self))]
    async fn first_instance_address(&self, service: &str) -> Result<String, Self::Error> {
        let url = self.endpoint(&["v1", "catalog", "service", service])?;
        let instances = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<CatalogInstance>>()
            .await?;

        instances
            .into_iter()
            .next()
            .map(|i| i.address)
            .ok_or_else(|| ConsulError::NoInstances(service.to_owned()))
    }
}

#[derive(Debug, Error)]
pub enum ConsulError {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error("bad base url")]
    BadBaseUrl,
    #[error("invalid Consul token: {0}")]
    InvalidToken(#[from] InvalidHeaderValue),
    #[error("service {0} has no registered instances")]
    NoInstances(String),
}

#[derive(Debug, Deserialize)]
struct CatalogInstance {
    #[serde(rename = "Address")]
    address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    fn catalog(server: &Server, token: Option<&str>) -> ConsulCatalog {
        ConsulCatalog::new(server.url_str("/"), token, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn lists_services_with_tags() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/catalog/services")).respond_with(
                json_encoded(json!({
                    "consul": [],
                    "web": ["wayfinder.domain=b.example.com", "http"],
                })),
            ),
        );

        let services = catalog(&server, None).list_services().await.unwrap();

        assert_eq!(services.len(), 2);
        assert_eq!(services["web"], ["wayfinder.domain=b.example.com", "http"]);
        assert!(services["consul"].is_empty());
    }

    #[tokio::test]
    async fn sends_acl_token() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v1/catalog/services"),
                request::headers(contains(key("x-consul-token"))),
            ])
            .respond_with(json_encoded(json!({}))),
        );

        let services = catalog(&server, Some("secret")).list_services().await.unwrap();
        assert!(services.is_empty());
    }

    #[tokio::test]
    async fn first_instance_address_uses_first_node() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/catalog/service/web"))
                .respond_with(json_encoded(json!([
                    { "Node": "n1", "Address": "10.0.0.5", "ServiceAddress": "" },
                    { "Node": "n2", "Address": "10.0.0.6", "ServiceAddress": "" },
                ]))),
        );

        let address = catalog(&server, None).first_instance_address("web").await.unwrap();
        assert_eq!(address, "10.0.0.5");
    }

    #[tokio::test]
    async fn service_without_instances_is_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/catalog/service/gone"))
                .respond_with(json_encoded(json!([]))),
        );

        let err = catalog(&server, None).first_instance_address("gone").await.unwrap_err();
        assert!(matches!(err, ConsulError::NoInstances(s) if s == "gone"));
    }

    #[tokio::test]
    async fn unreachable_catalog_is_an_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1/catalog/services"))
                .respond_with(status_code(500)),
        );

        let err = catalog(&server, None).list_services().await.unwrap_err();
        assert!(matches!(err, ConsulError::ReqwestError(_)));
    }

    #[test]
    fn rejects_non_base_url() {
        let timeout = Duration::from_secs(1);
        assert!(ConsulCatalog::new("mailto:ops@example.com", None, timeout).is_err());
    }
}
