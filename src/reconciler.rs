use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::Catalog,
    diff::{self, Decision},
    dns::Provider,
    record::{self, CurrentRecord},
    tags::{self, ServiceTag},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub zone_id: String,
    /// Compute and report decisions without issuing mutating provider calls.
    pub preview: bool,
    /// Skip records that asked for the public address when it could not be resolved,
    /// instead of falling back to the catalog address.
    pub skip_unresolved_public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The service has no `wayfinder.` tags.
    Untagged,
    /// No `wayfinder.domain` directive names the record.
    NoDomain,
    UnresolvedPublicIp,
}

#[derive(Debug)]
pub enum Outcome {
    Skipped(SkipReason),
    Matched,
    WouldApply(Decision),
    Applied { decision: Decision, reference: String },
    Failed { decision: Option<Decision>, error: BoxError },
}

impl Outcome {
    /// The decision reached for the service, identical in preview and live mode.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Outcome::WouldApply(decision) | Outcome::Applied { decision, .. } => Some(decision),
            Outcome::Failed { decision, .. } => decision.as_ref(),
            Outcome::Skipped(_) | Outcome::Matched => None,
        }
    }
}

#[derive(Debug)]
pub struct ServiceOutcome {
    pub service: String,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<ServiceOutcome>,
    /// The pass was interrupted before every service was visited.
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub skipped: usize,
    pub matched: usize,
    pub would_apply: usize,
    pub applied: usize,
    pub failed: usize,
}

impl Report {
    pub fn failures(&self) -> impl Iterator<Item = &ServiceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
    }

    pub fn summary(&self) -> Summary {
        self.outcomes
            .iter()
            .fold(Summary::default(), |mut s, o| {
                match o.outcome {
                    Outcome::Skipped(_) => s.skipped += 1,
                    Outcome::Matched => s.matched += 1,
                    Outcome::WouldApply(_) => s.would_apply += 1,
                    Outcome::Applied { .. } => s.applied += 1,
                    Outcome::Failed { .. } => s.failed += 1,
                }
                s
            })
    }

    pub fn log_summary(&self) {
        for ServiceOutcome { service, outcome } in &self.outcomes {
            match outcome {
                Outcome::Skipped(reason) => debug!(%service, ?reason, "service skipped"),
                Outcome::Applied {
                    decision,
                    reference,
                } => info!(%service, %decision, %reference, "record applied"),
                Outcome::Failed { error, .. } => {
                    let decision = outcome.decision().map(ToString::to_string);
                    error!(%service, ?decision, %error, "service failed to reconcile");
                }
                Outcome::Matched | Outcome::WouldApply(_) => {}
            }
        }

        let Summary {
            skipped,
            matched,
            would_apply,
            applied,
            failed,
        } = self.summary();
        info!(
            skipped,
            matched,
            would_apply,
            applied,
            failed,
            cancelled = self.cancelled,
            "reconciliation finished"
        );
    }
}

/// Drives one provider towards the records the catalog asks for.
///
/// A pass takes a single snapshot of the zone and never re-reads it, so it does not react
/// to its own writes. Services are visited one at a time.
pub struct Reconciler<P: Provider> {
    provider: P,
    config: ReconcileConfig,

    shutdown: Option<watch::Receiver<bool>>,
}

impl<P: Provider> Reconciler<P> {
    pub fn new(provider: P, config: ReconcileConfig) -> Self {
        Self {
            provider,
            config,
            shutdown: None,
        }
    }

    /// Stops a pass at the next service boundary once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Runs a single pass over `services`.
    ///
    /// Fails only when the zone snapshot cannot be fetched, in which case nothing has been
    /// mutated. Per-service failures are recorded in the report.
    ///
    /// Once `deadline` has passed, no further service is started. A service already in
    /// flight always runs to completion.
    #[tracing::instrument(
        skip_all,
        fields(zone_id = %self.config.zone_id, preview = self.config.preview)
    )]
    pub async fn run<C: Catalog>(
        &self,
        services: &HashMap<String, Vec<String>>,
        public_ip: &str,
        catalog: &C,
        deadline: Option<Instant>,
    ) -> Result<Report, ReconcileError<P::Error>> {
        let current = self
            .provider
            .list_records(&self.config.zone_id)
            .await
            .map_err(ReconcileError::Baseline)?;
        info!(records = current.len(), services = services.len(), "fetched zone snapshot");

        let mut names: Vec<_> = services.keys().collect();
        names.sort();

        let mut report = Report::default();
        for service in names {
            if self.shutdown_requested() {
                warn!("shutdown requested, stopping reconciliation");
                report.cancelled = true;
                break;
            }
            if matches!(deadline, Some(deadline) if Instant::now() >= deadline) {
                warn!("pass deadline reached, leaving remaining services for the next pass");
                report.cancelled = true;
                break;
            }

            let outcome = self
                .reconcile_service(service, &services[service], public_ip, &current, catalog)
                .await;
            report.outcomes.push(ServiceOutcome {
                service: service.clone(),
                outcome,
            });
        }

        Ok(report)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map_or(false, |rx| *rx.borrow())
    }

    async fn reconcile_service<C: Catalog>(
        &self,
        service: &str,
        raw_tags: &[String],
        public_ip: &str,
        current: &HashMap<String, CurrentRecord>,
        catalog: &C,
    ) -> Outcome {
        let tags = tags::parse(raw_tags);
        if tags.is_empty() {
            return Outcome::Skipped(SkipReason::Untagged);
        }
        let raw: Vec<_> = tags.iter().map(ServiceTag::as_str).collect();
        debug!(service, tags = ?raw, "found wayfinder tags");

        let Some(mut desired) = record::synthesize(&tags, "", public_ip) else {
            debug!(service, "no domain directive, skipping");
            return Outcome::Skipped(SkipReason::NoDomain);
        };

        if desired.content.is_empty() {
            if self.config.skip_unresolved_public && record::requests_public(&tags) {
                warn!(service, name = %desired.name, "public address unresolved, skipping");
                return Outcome::Skipped(SkipReason::UnresolvedPublicIp);
            }

            match catalog.first_instance_address(service).await {
                Ok(address) => {
                    desired = record::synthesize(&tags, &address, public_ip).unwrap_or(desired)
                }
                Err(e) => {
                    return Outcome::Failed {
                        decision: None,
                        error: Box::new(e),
                    }
                }
            }
        }

        let decision = diff::decide(current.get(&desired.name), &desired);
        if !decision.is_change() {
            info!(service, name = %desired.name, "record matches, no update needed");
            return Outcome::Matched;
        }

        info!(
            service,
            %decision,
            name = %desired.name,
            content = %desired.content,
            proxied = desired.proxied,
            current = ?decision.current(),
            "record does not match",
        );

        if self.config.preview {
            return Outcome::WouldApply(decision);
        }

        match self
            .provider
            .upsert_record(&self.config.zone_id, decision.current().cloned(), &desired)
            .await
        {
            Ok(reference) => Outcome::Applied {
                decision,
                reference,
            },
            Err(e) => Outcome::Failed {
                decision: Some(decision),
                error: Box::new(e),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError<E: std::error::Error + 'static> {
    #[error("failed to fetch current zone records: {0}")]
    Baseline(#[source] E),
}
