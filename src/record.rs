use crate::tags::{Directive, ServiceTag};

/// The only record type this crate manages.
pub const ADDRESS_RECORD_TYPE: &str = "A";

/// TTL written for every record. `1` means "automatic" to Cloudflare.
pub const DEFAULT_TTL: u32 = 1;

/// The record a catalog service should have at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRecord {
    pub name: String,
    pub record_type: String,
    pub ttl: u32,
    pub content: String,
    pub proxied: bool,
}

/// A record as it currently exists at the provider, normalized across backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentRecord {
    /// Provider-assigned identifier, empty if the provider has none.
    pub id: String,
    pub name: String,
    pub record_type: String,
    pub ttl: u32,
    pub content: String,
}

/// Builds the desired record for a service from its tags.
///
/// Tags are applied in order, so a later `address` or `public` directive overrides an
/// earlier one. When neither supplies content the catalog `fallback_address` is used and
/// the record is never proxied.
///
/// Returns `None` when no `domain` directive names the record.
pub fn synthesize(
    tags: &[ServiceTag],
    fallback_address: &str,
    public_ip: &str,
) -> Option<DesiredRecord> {
    let mut record = DesiredRecord {
        name: String::new(),
        record_type: ADDRESS_RECORD_TYPE.to_owned(),
        ttl: DEFAULT_TTL,
        content: String::new(),
        proxied: false,
    };

    for directive in tags.iter().filter_map(ServiceTag::directive) {
        match directive {
            Directive::Domain(name) => record.name = name,
            Directive::Public(true) => {
                record.content = public_ip.to_owned();
                record.proxied = true;
            }
            Directive::Public(false) => {}
            Directive::Address(address) => record.content = address,
        }
    }

    if record.name.is_empty() {
        return None;
    }

    if record.content.is_empty() {
        record.content = fallback_address.to_owned();
        record.proxied = false;
    }

    Some(record)
}

/// Whether the last content-setting directive asks for the public address.
pub fn requests_public(tags: &[ServiceTag]) -> bool {
    tags.iter()
        .filter_map(ServiceTag::directive)
        .filter(|d| matches!(d, Directive::Public(true) | Directive::Address(_)))
        .last()
        == Some(Directive::Public(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags;

    #[test]
    fn later_public_directive_wins_over_address() {
        let tags = tags::parse([
            "wayfinder.domain=a.example.com",
            "wayfinder.address=1.2.3.4",
            "wayfinder.public=true",
        ]);

        let record = synthesize(&tags, "10.0.0.5", "203.0.113.7").unwrap();
        assert_eq!(record.content, "203.0.113.7");
        assert!(record.proxied);
    }

    #[test]
    fn later_address_keeps_proxied_flag() {
        let tags = tags::parse([
            "wayfinder.domain=a.example.com",
            "wayfinder.public=true",
            "wayfinder.address=1.2.3.4",
        ]);

        let record = synthesize(&tags, "10.0.0.5", "203.0.113.7").unwrap();
        assert_eq!(record.content, "1.2.3.4");
        assert!(record.proxied);
    }

    #[test]
    fn falls_back_to_catalog_address() {
        let tags = tags::parse(["wayfinder.domain=b.example.com"]);

        let record = synthesize(&tags, "10.0.0.5", "203.0.113.7").unwrap();
        assert_eq!(
            record,
            DesiredRecord {
                name: "b.example.com".into(),
                record_type: "A".into(),
                ttl: 1,
                content: "10.0.0.5".into(),
                proxied: false,
            }
        );
    }

    #[test]
    fn last_domain_wins() {
        let tags = tags::parse([
            "wayfinder.domain=old.example.com",
            "wayfinder.domain=new.example.com",
        ]);
        assert_eq!(synthesize(&tags, "10.0.0.5", "").unwrap().name, "new.example.com");
    }

    #[test]
    fn no_domain_means_no_record() {
        let tags = tags::parse(["wayfinder.public=true"]);
        assert_eq!(synthesize(&tags, "10.0.0.5", "203.0.113.7"), None);
    }

    #[test]
    fn malformed_domain_tag_is_absent() {
        let tags = tags::parse(["wayfinder.domain"]);
        assert_eq!(synthesize(&tags, "10.0.0.5", "203.0.113.7"), None);

        let tags = tags::parse([
            "wayfinder.domain",
            "wayfinder.domain=c.example.com",
            "wayfinder.public",
        ]);
        let record = synthesize(&tags, "10.0.0.5", "203.0.113.7").unwrap();
        assert_eq!(record.content, "10.0.0.5");
        assert!(!record.proxied);
    }

    #[test]
    fn unresolved_public_ip_falls_back_to_catalog() {
        let tags = tags::parse(["wayfinder.domain=a.example.com", "wayfinder.public=true"]);
        let record = synthesize(&tags, "10.0.0.5", "").unwrap();
        assert_eq!(record.content, "10.0.0.5");
        assert!(!record.proxied);

        let record = synthesize(&tags, "", "").unwrap();
        assert_eq!(record.content, "");
    }

    #[test]
    fn public_request_follows_last_content_directive() {
        let public = |raw: [&str; 2]| requests_public(&tags::parse(raw));

        assert!(public(["wayfinder.address=1.2.3.4", "wayfinder.public=true"]));
        assert!(!public(["wayfinder.public=true", "wayfinder.address=1.2.3.4"]));
        assert!(!public(["wayfinder.domain=a.example.com", "wayfinder.public=false"]));
    }
}
