use std::time::Duration;

use reqwest::{Client, IntoUrl, Url};
use tracing::{debug, warn};

pub const DEFAULT_ECHO_URL: &str = "https://icanhazip.com";

/// Looks up this host's public address from a plaintext IP echo service.
#[derive(Debug)]
pub struct PublicIpResolver {
    url: Url,
    client: Client,
}

impl PublicIpResolver {
    pub fn new<U: IntoUrl>(url: U, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into_url()?,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// Returns the trimmed body of the echo service, or an empty string when the lookup
    /// fails. An empty address is degraded but not fatal.
    #[tracing::instrument(skip(self), fields(url = %self.url))]
    pub async fn current_public_address(&self) -> String {
        match self.fetch().await {
            Ok(address) => {
                debug!(%address, "resolved public address");
                address
            }
            Err(e) => {
                warn!(error = %e, "public address lookup failed");
                String::new()
            }
        }
    }

    async fn fetch(&self) -> Result<String, reqwest::Error> {
        let body = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(body.trim().to_owned())
    }
}
