use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::{
    catalog::{consul::ConsulCatalog, Catalog},
    dns::Provider,
    public_ip::PublicIpResolver,
    reconciler::{BoxError, ReconcileConfig, Reconciler},
    settings::{Cli, ConfigError, LogFormat, LogSettings, ProviderSettings, Settings},
};

mod catalog;
mod diff;
mod dns;
mod public_ip;
mod reconciler;
mod record;
mod settings;
mod tags;

build_info::build_info!(fn build_info);

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match Settings::new(Cli::parse()) {
        Ok(cfg) => cfg,
        Err(e) => {
            let _ = init_tracing(&LogSettings::default());
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(&cfg.log) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }
    info!(version = %build_info().crate_info.version, "starting wayfinder");

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "wayfinder failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log: &LogSettings) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let builder = tracing_subscriber::fmt().with_max_level(log.level);
    match log.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    }
}

async fn run(cfg: Settings) -> Result<(), RunError> {
    let catalog = ConsulCatalog::new(
        cfg.catalog.url.clone(),
        cfg.catalog.token.as_deref(),
        cfg.http_timeout,
    )
    .map_err(|e| RunError::Setup("consul client", e.into()))?;
    let resolver = PublicIpResolver::new(cfg.public_ip_url.clone(), cfg.http_timeout)
        .map_err(|e| RunError::Setup("public ip resolver", e.into()))?;

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current service");
            let _ = shutdown_tx.send(true);
        }
    });

    let config = ReconcileConfig {
        zone_id: cfg.zone_id.clone(),
        preview: cfg.dry_run,
        skip_unresolved_public: cfg.skip_unresolved_public,
    };
    if config.preview {
        info!("dry run, no changes will be made");
    }

    match &cfg.provider {
        #[cfg(feature = "aws")]
        ProviderSettings::Route53(r53) => {
            info!(zone_id = %config.zone_id, "using Route 53");
            let provider = route53_provider(r53).await;
            let reconciler = Reconciler::new(provider, config).with_shutdown(shutdown.clone());
            drive(reconciler, &catalog, &resolver, cfg.interval, shutdown).await
        }
        #[cfg(not(feature = "aws"))]
        ProviderSettings::Route53(_) => {
            Err(ConfigError::ProviderUnavailable("route53").into())
        }

        #[cfg(feature = "cf")]
        ProviderSettings::Cloudflare(auth) => {
            info!(zone_id = %config.zone_id, "using Cloudflare");
            let provider = cloudflare_provider(auth)
                .map_err(|e| RunError::Setup("cloudflare client", e.into()))?;
            let reconciler = Reconciler::new(provider, config).with_shutdown(shutdown.clone());
            drive(reconciler, &catalog, &resolver, cfg.interval, shutdown).await
        }
        #[cfg(not(feature = "cf"))]
        ProviderSettings::Cloudflare(_) => {
            Err(ConfigError::ProviderUnavailable("cloudflare").into())
        }
    }
}

#[cfg(feature = "aws")]
async fn route53_provider(settings: &settings::Route53Settings) -> dns::route53::Route53Provider {
    let mut loader = aws_config::from_env();
    if let Some(region) = &settings.region {
        loader = loader.region(aws_sdk_route53::config::Region::new(region.clone()));
    }
    let client = aws_sdk_route53::Client::new(&loader.load().await);

    let provider = dns::route53::Route53Provider::new(client);
    match settings.sync_timeout {
        Some(timeout) => provider.wait_for_sync(timeout),
        None => provider,
    }
}

#[cfg(feature = "cf")]
fn cloudflare_provider(
    auth: &settings::CloudflareAuth,
) -> Result<dns::cloudflare::CloudflareProvider, dns::cloudflare::CloudflareError> {
    use cloudflare::framework::auth::Credentials;

    let credentials = match auth.clone() {
        settings::CloudflareAuth::Token(token) => Credentials::UserAuthToken { token },
        settings::CloudflareAuth::GlobalKey { email, key } => {
            Credentials::UserAuthKey { email, key }
        }
    };
    dns::cloudflare::CloudflareProvider::new(credentials)
}

/// Runs a single pass, or keeps running passes every `interval` until shutdown.
///
/// A periodic pass that overruns its interval stops at the next service boundary and leaves
/// the remaining services to the next pass. A service is never abandoned half-applied.
async fn drive<P: Provider, C: Catalog>(
    reconciler: Reconciler<P>,
    catalog: &C,
    resolver: &PublicIpResolver,
    interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RunError> {
    let Some(period) = interval else {
        return pass(&reconciler, catalog, resolver, None).await;
    };

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            Ok(()) = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            info!("shutting down");
            return Ok(());
        }

        let deadline = Instant::now() + period;
        if let Err(e) = pass(&reconciler, catalog, resolver, Some(deadline)).await {
            error!(error = %e, "reconciliation pass failed");
        }
    }
}

#[tracing::instrument(skip_all)]
async fn pass<P: Provider, C: Catalog>(
    reconciler: &Reconciler<P>,
    catalog: &C,
    resolver: &PublicIpResolver,
    deadline: Option<Instant>,
) -> Result<(), RunError> {
    let public_ip = resolver.current_public_address().await;

    let services = catalog
        .list_services()
        .await
        .map_err(|e| RunError::Discovery(Box::new(e)))?;

    let report = reconciler
        .run(&services, &public_ip, catalog, deadline)
        .await
        .map_err(|e| RunError::Baseline(Box::new(e)))?;
    report.log_summary();

    match report.failures().count() {
        0 => Ok(()),
        failed => Err(RunError::ServicesFailed(failed)),
    }
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to set up {0}: {1}")]
    Setup(&'static str, #[source] BoxError),
    #[error("failed to list catalog services: {0}")]
    Discovery(#[source] BoxError),
    #[error("{0}")]
    Baseline(BoxError),
    #[error("{0} service(s) failed to reconcile")]
    ServicesFailed(usize),
}
