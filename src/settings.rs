use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::public_ip::DEFAULT_ECHO_URL;

const DEFAULT_CONSUL_URL: &str = "http://consul.service.consul:8500";
const DEFAULT_CONFIG_PATH: &str = "/etc/wayfinder/config.toml";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(300);

/// Keeps DNS records in step with services registered in Consul.
#[derive(Debug, Default, Parser)]
#[command(name = "wayfinder", version, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "WAYFINDER_CONFIG")]
    pub config: Option<String>,

    /// Zone to reconcile (Cloudflare zone id or Route 53 hosted zone id)
    #[arg(long, env = "CLOUDFLARE_ZONE_ID")]
    pub zone_id: Option<String>,

    /// Cloudflare API token; selects the Cloudflare backend when set
    #[arg(
        long = "cloudflare-api-key",
        env = "CLOUDFLARE_API_TOKEN",
        hide_env_values = true
    )]
    pub cloudflare_token: Option<String>,

    /// Cloudflare account e-mail, used with --cloudflare-global-key
    #[arg(long, env = "CLOUDFLARE_EMAIL")]
    pub cloudflare_email: Option<String>,

    /// Cloudflare global API key, used with --cloudflare-email
    #[arg(long, env = "CLOUDFLARE_API_KEY", hide_env_values = true)]
    pub cloudflare_global_key: Option<String>,

    /// AWS region for Route 53
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Wait for Route 53 changes to reach INSYNC
    #[arg(long)]
    pub wait_for_sync: bool,

    /// Consul HTTP API address
    #[arg(long, env = "CONSUL_URL")]
    pub consul_url: Option<String>,

    /// Consul ACL token
    #[arg(long, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// Plaintext public IP echo service
    #[arg(long)]
    pub public_ip_url: Option<String>,

    /// Report what would change without touching the zone
    #[arg(long)]
    pub dry_run: bool,

    /// Skip public records when the public address cannot be resolved
    #[arg(long)]
    pub skip_unresolved_public: bool,

    /// Reconcile repeatedly at this interval (e.g. "5m") instead of once
    #[arg(long)]
    pub interval: Option<String>,

    /// Timeout for catalog and public IP requests (e.g. "10s")
    #[arg(long)]
    pub http_timeout: Option<String>,

    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// One of trace, debug, info, warn, error
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    zone_id: Option<String>,
    dry_run: Option<bool>,
    skip_unresolved_public: Option<bool>,
    interval: Option<String>,
    http_timeout: Option<String>,
    public_ip_url: Option<String>,
    #[serde(default)]
    consul: ConsulFile,
    #[serde(default)]
    cloudflare: CloudflareFile,
    #[serde(default)]
    route53: Route53File,
    #[serde(default)]
    log: LogFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConsulFile {
    url: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CloudflareFile {
    token: Option<String>,
    email: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Route53File {
    region: Option<String>,
    wait_for_sync: Option<bool>,
    sync_timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogFile {
    format: Option<LogFormat>,
    level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudflareAuth {
    Token(String),
    GlobalKey { email: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route53Settings {
    pub region: Option<String>,
    /// How long to wait for each change to reach INSYNC, if at all.
    pub sync_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    Cloudflare(CloudflareAuth),
    Route53(Route53Settings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub url: Url,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: tracing::Level,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: tracing::Level::INFO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub zone_id: String,
    pub provider: ProviderSettings,
    pub catalog: CatalogSettings,
    pub public_ip_url: Url,
    pub dry_run: bool,
    pub skip_unresolved_public: bool,
    pub interval: Option<Duration>,
    pub http_timeout: Duration,
    pub log: LogSettings,
}

impl Settings {
    /// Resolves settings from the command line and environment, falling back to the
    /// configuration file and then to defaults.
    pub fn new(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                let path =
                    shellexpand::full(path).map_err(|e| ConfigError::BadPath(e.to_string()))?;
                read_file(Path::new(path.as_ref()))?
            }
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                read_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => FileSettings::default(),
        };

        Self::merge(cli, file, env::var("ZONE_ID").ok())
    }

    /// `fallback_zone_id` is the generic `ZONE_ID` variable, consulted after the flag and
    /// its Cloudflare-specific variable but before the file.
    fn merge(
        cli: Cli,
        file: FileSettings,
        fallback_zone_id: Option<String>,
    ) -> Result<Self, ConfigError> {
        let zone_id = cli
            .zone_id
            .or(fallback_zone_id)
            .or(file.zone_id)
            .filter(|z| !z.is_empty())
            .ok_or(ConfigError::MissingZoneId)?;

        let sync_timeout = match file.route53.sync_timeout {
            Some(s) => parse_duration("route53.sync_timeout", &s)?,
            None => DEFAULT_SYNC_TIMEOUT,
        };
        let provider = ensure_compiled(select_provider(
            cli.cloudflare_token.or(file.cloudflare.token),
            cli.cloudflare_email.or(file.cloudflare.email),
            cli.cloudflare_global_key.or(file.cloudflare.api_key),
            Route53Settings {
                region: cli.region.or(file.route53.region),
                sync_timeout: (cli.wait_for_sync || file.route53.wait_for_sync.unwrap_or(false))
                    .then_some(sync_timeout),
            },
        ))?;

        let catalog = CatalogSettings {
            url: parse_url(
                "consul url",
                cli.consul_url
                    .or(file.consul.url)
                    .as_deref()
                    .unwrap_or(DEFAULT_CONSUL_URL),
            )?,
            token: cli.consul_token.or(file.consul.token).filter(|t| !t.is_empty()),
        };

        let public_ip_url = parse_url(
            "public ip url",
            cli.public_ip_url
                .or(file.public_ip_url)
                .as_deref()
                .unwrap_or(DEFAULT_ECHO_URL),
        )?;

        let interval = cli
            .interval
            .or(file.interval)
            .map(|s| parse_duration("interval", &s))
            .transpose()?;
        let http_timeout = cli
            .http_timeout
            .or(file.http_timeout)
            .map(|s| parse_duration("http_timeout", &s))
            .transpose()?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        let level = match cli.log_level.or(file.log.level) {
            Some(level) => level.parse().map_err(|_| ConfigError::BadLogLevel(level))?,
            None => tracing::Level::INFO,
        };

        Ok(Self {
            zone_id,
            provider,
            catalog,
            public_ip_url,
            dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
            skip_unresolved_public: cli.skip_unresolved_public
                || file.skip_unresolved_public.unwrap_or(false),
            interval,
            http_timeout,
            log: LogSettings {
                format: cli.log_format.or(file.log.format).unwrap_or_default(),
                level,
            },
        })
    }
}

/// Picks the DNS backend from whichever credentials are present.
///
/// Cloudflare wins when a token, or an e-mail and global key pair, is given. Otherwise
/// Route 53 is used with the ambient AWS credentials.
pub fn select_provider(
    token: Option<String>,
    email: Option<String>,
    key: Option<String>,
    route53: Route53Settings,
) -> ProviderSettings {
    let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());

    match (non_empty(token), non_empty(email), non_empty(key)) {
        (Some(token), _, _) => ProviderSettings::Cloudflare(CloudflareAuth::Token(token)),
        (None, Some(email), Some(key)) => {
            ProviderSettings::Cloudflare(CloudflareAuth::GlobalKey { email, key })
        }
        _ => ProviderSettings::Route53(route53),
    }
}

/// Rejects a backend whose feature was left out of the build.
fn ensure_compiled(provider: ProviderSettings) -> Result<ProviderSettings, ConfigError> {
    match provider {
        ProviderSettings::Cloudflare(_) if !cfg!(feature = "cf") => {
            Err(ConfigError::ProviderUnavailable("cloudflare"))
        }
        ProviderSettings::Route53(_) if !cfg!(feature = "aws") => {
            Err(ConfigError::ProviderUnavailable("route53"))
        }
        provider => Ok(provider),
    }
}

fn read_file(path: &Path) -> Result<FileSettings, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
        path: path.to_owned(),
        source,
    })
}

fn parse_url(what: &'static str, s: &str) -> Result<Url, ConfigError> {
    Url::parse(s).map_err(|source| ConfigError::BadUrl { what, source })
}

fn parse_duration(what: &'static str, s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s).map_err(|source| ConfigError::BadDuration { what, source })
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a zone id is required (--zone-id, CLOUDFLARE_ZONE_ID or ZONE_ID)")]
    MissingZoneId,
    #[error("bad config path: {0}")]
    BadPath(String),
    #[error("failed to read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    ParseFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {what}: {source}")]
    BadUrl {
        what: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid {what}: {source}")]
    BadDuration {
        what: &'static str,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid log level {0:?}")]
    BadLogLevel(String),
    #[error("the {0} backend is not compiled in")]
    ProviderUnavailable(&'static str),
}
