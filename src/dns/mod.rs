use std::collections::HashMap;

use crate::record::{CurrentRecord, DesiredRecord};

#[cfg(feature = "cf")]
pub mod cloudflare;
#[cfg(feature = "aws")]
pub mod route53;

/// A DNS backend holding the zone's address records.
///
/// Every backend reports records in the shape of [`CurrentRecord`], keyed by a name without
/// the trailing root dot so that keys compare equal to synthesized names.
#[cfg_attr(test, mockall::automock(type Error = std::io::Error;))]
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches every address record in the zone.
    async fn list_records(
        &self,
        zone_id: &str,
    ) -> Result<HashMap<String, CurrentRecord>, Self::Error>;

    /// Creates a record, returning the provider's reference for it.
    async fn create_record(
        &self,
        zone_id: &str,
        record: &DesiredRecord,
    ) -> Result<String, Self::Error>;

    /// Makes the zone hold `desired`, replacing `current` if there is one.
    ///
    /// Backends without a native upsert get delete-then-create. The delete is only issued
    /// when the current record carries an identifier.
    async fn upsert_record(
        &self,
        zone_id: &str,
        current: Option<CurrentRecord>,
        desired: &DesiredRecord,
    ) -> Result<String, Self::Error> {
        if let Some(current) = current.filter(|c| !c.id.is_empty()) {
            self.delete_record(zone_id, &current.id).await?;
        }
        self.create_record(zone_id, desired).await
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), Self::Error>;
}

/// Strips the trailing root-zone separator from a record name.
pub fn normalize_name(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}
