use std::collections::HashMap;
use std::net::{AddrParseError, Ipv4Addr};

use cloudflare::endpoints::dns::{
    CreateDnsRecord, CreateDnsRecordParams, DeleteDnsRecord, DnsContent, DnsRecord, ListDnsRecords,
    ListDnsRecordsParams,
};
use cloudflare::framework::async_api::{ApiClient, Client};
use cloudflare::framework::auth::Credentials;
use cloudflare::framework::response::ApiFailure;
use cloudflare::framework::{Environment, HttpApiClientConfig};
use thiserror::Error;
use tracing::debug;

use super::normalize_name;
use crate::record::{CurrentRecord, DesiredRecord, ADDRESS_RECORD_TYPE};

const PAGE_SIZE: u32 = 5000;

/// Token-scoped Cloudflare backend. Cloudflare has no upsert, so replacing a record is a
/// delete followed by a create.
pub struct CloudflareProvider {
    client: Client,
}

impl CloudflareProvider {
    pub fn new(creds: Credentials) -> Result<Self, CloudflareError> {
        Self::with_environment(creds, Environment::Production)
    }

    pub fn with_environment(
        creds: Credentials,
        environment: Environment,
    ) -> Result<Self, CloudflareError> {
        let client = Client::new(creds, HttpApiClientConfig::default(), environment)
            .map_err(|e| CloudflareError::NewClientError(e.into()))?;

        Ok(Self { client })
    }

    async fn list_page(
        &self,
        zone_id: &str,
        page: u32,
    ) -> Result<Vec<DnsRecord>, CloudflareError> {
        let request = ListDnsRecords {
            zone_identifier: zone_id,
            params: ListDnsRecordsParams {
                record_type: None,
                name: None,
                page: Some(page),
                per_page: Some(PAGE_SIZE),
                order: None,
                direction: None,
                search_match: None,
            },
        };
        Ok(self.client.request(&request).await?.result)
    }
}

#[async_trait::async_trait]
impl super::Provider for CloudflareProvider {
    type Error = CloudflareError;

    #[tracing::instrument(skip(self))]
    async fn list_records(
        &self,
        zone_id: &str,
    ) -> Result<HashMap<String, CurrentRecord>, Self::Error> {
        let mut records = HashMap::new();

        for page in 1.. {
            let batch = self.list_page(zone_id, page).await?;
            let last = batch.len() < PAGE_SIZE as usize;

            records.extend(batch.into_iter().filter_map(|r| {
                let DnsContent::A { content } = r.content else {
                    return None;
                };
                let name = normalize_name(&r.name).to_owned();
                Some((
                    name.clone(),
                    CurrentRecord {
                        id: r.id,
                        name,
                        record_type: ADDRESS_RECORD_TYPE.to_owned(),
                        ttl: r.ttl,
                        content: content.to_string(),
                    },
                ))
            }));

            if last {
                break;
            }
        }

        debug!("got {} address records from Cloudflare", records.len());
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn create_record(
        &self,
        zone_id: &str,
        record: &DesiredRecord,
    ) -> Result<String, Self::Error> {
        let address = record
            .content
            .parse::<Ipv4Addr>()
            .map_err(|source| CloudflareError::InvalidAddress {
                content: record.content.clone(),
                source,
            })?;

        let request = CreateDnsRecord {
            zone_identifier: zone_id,
            params: CreateDnsRecordParams {
                ttl: Some(record.ttl),
                priority: None,
                proxied: Some(record.proxied),
                name: &record.name,
                content: DnsContent::A { content: address },
            },
        };
        let created = self.client.request(&request).await?.result;

        Ok(created.id)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), Self::Error> {
        let request = DeleteDnsRecord {
            zone_identifier: zone_id,
            identifier: record_id,
        };
        self.client.request(&request).await?;

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CloudflareError {
    #[error("failed to build Cloudflare client: {0}")]
    NewClientError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    ApiError(#[from] ApiFailure),
    #[error("record content {content:?} is not an IPv4 address")]
    InvalidAddress {
        content: String,
        #[source]
        source: AddrParseError,
    },
}
