use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_route53::operation::change_resource_record_sets::ChangeResourceRecordSetsError;
use aws_sdk_route53::operation::get_change::GetChangeError;
use aws_sdk_route53::operation::list_resource_record_sets::ListResourceRecordSetsError;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ChangeStatus, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client;
use aws_smithy_http::result::SdkError;
use thiserror::Error;
use tokio::time;
use tracing::{debug, info};

use super::{normalize_name, Provider};
use crate::record::{CurrentRecord, DesiredRecord};

const CHANGE_COMMENT: &str = "Wayfinder Managed Domain";
const VALUE_SEPARATOR: &str = ", ";
const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Hosted-zone backend. Every mutation is a one-change batch; replacing a record is a
/// single `UPSERT`.
///
/// Route 53 has no record identifiers, so the fully qualified name stands in for one.
#[derive(Debug, Clone)]
pub struct Route53Provider {
    client: Client,

    sync_timeout: Option<Duration>,
}

impl Route53Provider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            sync_timeout: None,
        }
    }

    /// Waits up to `timeout` for each submitted change to reach `INSYNC`.
    pub fn wait_for_sync(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    async fn submit(
        &self,
        zone_id: &str,
        action: ChangeAction,
        set: ResourceRecordSet,
    ) -> Result<String, Route53Error> {
        let output = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(change_batch(action, set))
            .send()
            .await?;

        let change_id = output
            .change_info()
            .and_then(|c| c.id())
            .unwrap_or_default()
            .to_owned();
        info!(%change_id, "submitted Route 53 change");

        if let Some(timeout) = self.sync_timeout {
            time::timeout(timeout, self.await_insync(&change_id))
                .await
                .map_err(|_| Route53Error::SyncTimeout(change_id.clone()))??;
        }

        Ok(change_id)
    }

    async fn await_insync(&self, change_id: &str) -> Result<(), Route53Error> {
        let mut interval = time::interval(SYNC_POLL_INTERVAL);
        loop {
            interval.tick().await;

            let output = self.client.get_change().id(change_id).send().await?;
            let status = output.change_info().and_then(|c| c.status());
            if status == Some(&ChangeStatus::Insync) {
                return Ok(());
            }
            debug!(change_id, ?status, "change not yet in sync");
        }
    }
}

#[async_trait::async_trait]
impl Provider for Route53Provider {
    type Error = Route53Error;

    #[tracing::instrument(skip(self))]
    async fn list_records(
        &self,
        zone_id: &str,
    ) -> Result<HashMap<String, CurrentRecord>, Self::Error> {
        let mut records = HashMap::new();
        let mut start: Option<StartRecord> = None;

        loop {
            let mut request = self.client.list_resource_record_sets().hosted_zone_id(zone_id);
            if let Some(StartRecord { name, kind, identifier }) = start.take() {
                request = request
                    .start_record_name(name)
                    .start_record_type(kind)
                    .set_start_record_identifier(identifier);
            }
            let page = request.send().await?;

            records.extend(
                page.resource_record_sets()
                    .unwrap_or_default()
                    .iter()
                    .filter(|s| s.r#type() == Some(&RrType::A))
                    .filter_map(current_record)
                    .map(|r| (r.name.clone(), r)),
            );

            // Weighted and latency sets share a name and type, so the identifier is part of
            // the continuation too.
            match (page.is_truncated(), page.next_record_name(), page.next_record_type()) {
                (true, Some(name), Some(kind)) => {
                    start = Some(StartRecord {
                        name: name.to_owned(),
                        kind: kind.clone(),
                        identifier: page.next_record_identifier().map(str::to_owned),
                    })
                }
                _ => break,
            }
        }

        debug!("got {} address records from Route 53", records.len());
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn create_record(
        &self,
        zone_id: &str,
        record: &DesiredRecord,
    ) -> Result<String, Self::Error> {
        self.submit(zone_id, ChangeAction::Create, record_set(record)).await
    }

    #[tracing::instrument(skip(self, _current))]
    async fn upsert_record(
        &self,
        zone_id: &str,
        _current: Option<CurrentRecord>,
        desired: &DesiredRecord,
    ) -> Result<String, Self::Error> {
        self.submit(zone_id, ChangeAction::Upsert, record_set(desired)).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), Self::Error> {
        let page = self
            .client
            .list_resource_record_sets()
            .hosted_zone_id(zone_id)
            .start_record_name(record_id)
            .start_record_type(RrType::A)
            .send()
            .await?;

        // Deleting requires the exact set as Route 53 holds it.
        let set = page
            .resource_record_sets()
            .unwrap_or_default()
            .iter()
            .find(|s| {
                s.r#type() == Some(&RrType::A)
                    && s.name().map(normalize_name) == Some(normalize_name(record_id))
            })
            .ok_or(Route53Error::MissingRecord)?;

        self.submit(zone_id, ChangeAction::Delete, set.clone()).await?;

        Ok(())
    }
}

/// Where the next page of a record set listing starts.
struct StartRecord {
    name: String,
    kind: RrType,
    identifier: Option<String>,
}

fn current_record(set: &ResourceRecordSet) -> Option<CurrentRecord> {
    let fqdn = set.name()?;
    let content = set
        .resource_records()
        .unwrap_or_default()
        .iter()
        .filter_map(ResourceRecord::value)
        .collect::<Vec<_>>()
        .join(VALUE_SEPARATOR);

    Some(CurrentRecord {
        id: fqdn.to_owned(),
        name: unescape(normalize_name(fqdn)),
        record_type: RrType::A.as_str().to_owned(),
        ttl: set.ttl().and_then(|t| u32::try_from(t).ok()).unwrap_or_default(),
        content,
    })
}

fn record_set(record: &DesiredRecord) -> ResourceRecordSet {
    let values = record
        .content
        .split(VALUE_SEPARATOR)
        .map(|v| ResourceRecord::builder().value(v).build())
        .collect();

    ResourceRecordSet::builder()
        .name(&record.name)
        .r#type(RrType::from(record.record_type.as_str()))
        .ttl(i64::from(record.ttl))
        .set_resource_records(Some(values))
        .build()
}

fn change_batch(action: ChangeAction, set: ResourceRecordSet) -> ChangeBatch {
    ChangeBatch::builder()
        .changes(Change::builder().action(action).resource_record_set(set).build())
        .comment(CHANGE_COMMENT)
        .build()
}

/// Route 53 reports `*` in wildcard names as the octal escape `\052`.
fn unescape(name: &str) -> String {
    name.replace("\\052", "*")
}

#[derive(Debug, Error)]
pub enum Route53Error {
    #[error(transparent)]
    ChangeSetsError(#[from] SdkError<ChangeResourceRecordSetsError>),
    #[error(transparent)]
    ListSetsError(#[from] SdkError<ListResourceRecordSetsError>),
    #[error(transparent)]
    GetChangeError(#[from] SdkError<GetChangeError>),
    #[error("missing record")]
    MissingRecord,
    #[error("change {0} did not reach INSYNC in time")]
    SyncTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::Credentials;
    use aws_smithy_client::test_connection::TestConnection;
    use aws_smithy_http::body::SdkBody;
    use aws_types::region::Region;

    const LIST_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ResourceRecordSets>
    <ResourceRecordSet>
      <Name>\052.example.com.</Name>
      <Type>A</Type>
      <TTL>300</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>10.0.0.1</Value></ResourceRecord>
        <ResourceRecord><Value>10.0.0.2</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
    <ResourceRecordSet>
      <Name>b.example.com.</Name>
      <Type>A</Type>
      <TTL>1</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>10.0.0.9</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
    <ResourceRecordSet>
      <Name>example.com.</Name>
      <Type>NS</Type>
      <TTL>172800</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>ns-1.awsdns-00.com.</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
  </ResourceRecordSets>
  <IsTruncated>false</IsTruncated>
  <MaxItems>300</MaxItems>
</ListResourceRecordSetsResponse>"#;

    const TRUNCATED_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ResourceRecordSets>
    <ResourceRecordSet>
      <Name>a.example.com.</Name>
      <Type>A</Type>
      <TTL>1</TTL>
      <ResourceRecords>
        <ResourceRecord><Value>10.0.0.4</Value></ResourceRecord>
      </ResourceRecords>
    </ResourceRecordSet>
  </ResourceRecordSets>
  <IsTruncated>true</IsTruncated>
  <NextRecordName>b.example.com.</NextRecordName>
  <NextRecordType>A</NextRecordType>
  <NextRecordIdentifier>west</NextRecordIdentifier>
  <MaxItems>1</MaxItems>
</ListResourceRecordSetsResponse>"#;

    const CHANGE_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ChangeResourceRecordSetsResponse xmlns="https://route53.amazonaws.com/doc/2013-04-01/">
  <ChangeInfo>
    <Id>/change/C1</Id>
    <Status>PENDING</Status>
    <SubmittedAt>2023-01-01T00:00:00Z</SubmittedAt>
  </ChangeInfo>
</ChangeResourceRecordSetsResponse>"#;

    fn provider(responses: Vec<&'static str>) -> (Route53Provider, TestConnection<&'static str>) {
        let events = responses
            .into_iter()
            .map(|body| {
                (
                    http::Request::builder()
                        .uri("https://route53.amazonaws.com/")
                        .body(SdkBody::empty())
                        .unwrap(),
                    http::Response::builder().status(200).body(body).unwrap(),
                )
            })
            .collect();
        let conn = TestConnection::new(events);

        let config = aws_sdk_route53::Config::builder()
            .credentials_provider(Credentials::from_keys("akid", "secret", None))
            .region(Region::new("us-east-1"))
            .http_connector(conn.clone())
            .build();

        (Route53Provider::new(Client::from_conf(config)), conn)
    }

    fn body(conn: &TestConnection<&'static str>, index: usize) -> String {
        let requests = conn.requests();
        let bytes = requests[index].actual.body().bytes().unwrap_or_default();
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[tokio::test]
    async fn lists_normalized_address_records() {
        let (provider, _conn) = provider(vec![LIST_RESPONSE]);
        let records = provider.list_records("Z123").await.unwrap();

        assert_eq!(records.len(), 2);

        let current = &records["b.example.com"];
        assert_eq!(current.id, "b.example.com.");
        assert_eq!(current.content, "10.0.0.9");
        assert_eq!(current.ttl, 1);
        assert_eq!(current.record_type, "A");

        let wildcard = &records["*.example.com"];
        assert_eq!(wildcard.content, "10.0.0.1, 10.0.0.2");
        assert_eq!(wildcard.ttl, 300);
    }

    #[tokio::test]
    async fn follows_truncated_listings() {
        let (provider, conn) = provider(vec![TRUNCATED_RESPONSE, LIST_RESPONSE]);
        let records = provider.list_records("Z123").await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records["a.example.com"].content, "10.0.0.4");
        assert_eq!(records["b.example.com"].content, "10.0.0.9");

        let requests = conn.requests();
        assert_eq!(requests.len(), 2);
        let first = requests[0].actual.uri().query().unwrap_or_default();
        assert!(!first.contains("name="), "{first}");
        let next = requests[1].actual.uri().query().unwrap_or_default();
        assert!(next.contains("name=b.example.com."), "{next}");
        assert!(next.contains("type=A"), "{next}");
        assert!(next.contains("identifier=west"), "{next}");
    }

    #[tokio::test]
    async fn deletes_the_exact_set_held_by_the_zone() {
        let (provider, conn) = provider(vec![LIST_RESPONSE, CHANGE_RESPONSE]);

        provider.delete_record("Z123", "b.example.com.").await.unwrap();

        assert_eq!(conn.requests().len(), 2);
        let change = body(&conn, 1);
        assert!(change.contains("<Action>DELETE</Action>"), "{change}");
        assert!(change.contains("<Name>b.example.com.</Name>"), "{change}");
        assert!(change.contains("<Value>10.0.0.9</Value>"), "{change}");
        assert!(!change.contains("10.0.0.1"), "{change}");
    }

    #[tokio::test]
    async fn deleting_an_absent_set_submits_nothing() {
        let (provider, conn) = provider(vec![LIST_RESPONSE]);

        let err = provider.delete_record("Z123", "gone.example.com.").await.unwrap_err();

        assert!(matches!(err, Route53Error::MissingRecord));
        assert_eq!(conn.requests().len(), 1);
    }

    #[test]
    fn upsert_batch_carries_the_desired_set() {
        let desired = DesiredRecord {
            name: "b.example.com".into(),
            record_type: "A".into(),
            ttl: 1,
            content: "10.0.0.5, 10.0.0.6".into(),
            proxied: true,
        };

        let batch = change_batch(ChangeAction::Upsert, record_set(&desired));

        assert_eq!(batch.comment(), Some(CHANGE_COMMENT));
        let changes = batch.changes().unwrap_or_default();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action(), Some(&ChangeAction::Upsert));

        let set = changes[0].resource_record_set().unwrap();
        assert_eq!(set.name(), Some("b.example.com"));
        assert_eq!(set.r#type(), Some(&RrType::A));
        assert_eq!(set.ttl(), Some(1));
        let values: Vec<_> = set
            .resource_records()
            .unwrap_or_default()
            .iter()
            .filter_map(ResourceRecord::value)
            .collect();
        assert_eq!(values, ["10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn unescapes_wildcards() {
        assert_eq!(unescape("\\052.example.com"), "*.example.com");
        assert_eq!(unescape("b.example.com"), "b.example.com");
    }
}
