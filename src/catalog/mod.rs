use std::collections::HashMap;

pub mod consul;

/// A service-discovery registry that services register with, along with their tags.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every registered service with its tags. Each tag list keeps the order the
    /// service registered it in; the services themselves are unordered.
    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>, Self::Error>;

    /// Address of the first registered instance of `service`.
    async fn first_instance_address(&self, service: &str) -> Result<String, Self::Error>;
}
