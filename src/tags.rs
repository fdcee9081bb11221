/// Namespace every DNS-relevant catalog tag starts with.
pub const NAMESPACE: &str = "wayfinder.";

const DOMAIN_KEY: &str = "domain";
const PUBLIC_KEY: &str = "public";
const ADDRESS_KEY: &str = "address";

/// A catalog tag inside the `wayfinder.` namespace, e.g. `wayfinder.domain=a.example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTag(String);

/// A decoded instruction carried by a single [`ServiceTag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Domain(String),
    Public(bool),
    Address(String),
}

impl ServiceTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the tag on the first `=`, returning the key without its namespace.
    ///
    /// Tags without a `=` have no value and yield `None`.
    pub fn key_value(&self) -> Option<(&str, &str)> {
        let (key, value) = self.0.split_once('=')?;
        Some((key.strip_prefix(NAMESPACE).unwrap_or(key), value))
    }

    /// Decodes the tag into a [`Directive`], if its key is one we understand.
    pub fn directive(&self) -> Option<Directive> {
        let (key, value) = self.key_value()?;
        match key {
            DOMAIN_KEY => Some(Directive::Domain(value.to_owned())),
            PUBLIC_KEY => Some(Directive::Public(value.eq_ignore_ascii_case("true"))),
            ADDRESS_KEY => Some(Directive::Address(value.to_owned())),
            _ => None,
        }
    }
}

/// Keeps the tags inside the `wayfinder.` namespace, in catalog order.
pub fn parse<I, S>(tags: I) -> Vec<ServiceTag>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().to_owned())
        .filter(|t| t.starts_with(NAMESPACE))
        .map(ServiceTag)
        .collect()
}
