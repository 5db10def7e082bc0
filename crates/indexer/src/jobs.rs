//! Orchestrator jobs.
//!
//! Each job fans out one network operation per item (publisher endpoint,
//! validator, domain), at most `fetch.concurrency` in flight. Per-item
//! failures are logged and counted in the [`JobReport`]; only persistence
//! failures abort a job, leaving the retry to the next scheduled run.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::DomainVerifier;
use crate::error::IngestError;
use crate::http::build_client;
use crate::manifests::ManifestProcessor;
use crate::reconcile::{ReconcileReport, TrustReconciler};
use crate::rippled::RippledManifestClient;
use crate::storage::Storage;
use crate::unl::{UnlFetcher, UnlSource};

/// Outcome of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Job name.
    pub job: &'static str,
    /// Items processed with an effect.
    pub succeeded: usize,
    /// Items that needed no change (stale or already current).
    pub skipped: usize,
    /// Items that failed, with the reason.
    pub failures: Vec<(String, String)>,
}

impl JobReport {
    fn new(job: &'static str) -> Self {
        Self {
            job,
            ..Default::default()
        }
    }

    fn fail(&mut self, item: impl Into<String>, err: &IngestError) {
        let item = item.into();
        warn!(job = self.job, item = %item, error = %err, "Item failed");
        self.failures.push((item, err.to_string()));
    }

    fn log(&self) {
        info!(
            job = self.job,
            succeeded = self.succeeded,
            skipped = self.skipped,
            failed = self.failures.len(),
            "Job finished"
        );
    }
}

/// Composes fetching, validation and reconciliation into scheduled jobs.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    storage: Storage,
    sources: Arc<Vec<UnlSource>>,
    processor: ManifestProcessor,
    fetcher: UnlFetcher,
    reconciler: TrustReconciler,
    rippled: RippledManifestClient,
    domains: Option<DomainVerifier>,
    concurrency: usize,
}

impl Orchestrator {
    /// Wire every component from `config`.
    pub fn from_config(config: &Config, storage: Storage) -> Result<Self> {
        let processor = ManifestProcessor::new(storage.clone());
        let max_bytes = config.fetch.max_response_bytes;

        let fetcher = UnlFetcher::new(
            build_client(config.fetch.timeout_secs, "unl")?,
            processor.clone(),
            max_bytes,
        );
        let rippled = RippledManifestClient::new(
            build_client(config.rippled.timeout_secs, "rippled")?,
            config.rippled.rpc_url.clone(),
            processor.clone(),
            max_bytes,
        );
        let domains = if config.domain_verification.enabled {
            Some(DomainVerifier::new(
                build_client(config.domain_verification.timeout_secs, "domain")?,
                storage.clone(),
                max_bytes,
            ))
        } else {
            None
        };

        Ok(Self {
            reconciler: TrustReconciler::new(storage.clone()),
            sources: Arc::new(config.unl_sources()?),
            storage,
            processor,
            fetcher,
            rippled,
            domains,
            concurrency: config.fetch.concurrency,
        })
    }

    /// Replace the domain verifier (e.g. to reach domains over another scheme).
    pub fn with_domain_verifier(mut self, verifier: Option<DomainVerifier>) -> Self {
        self.domains = verifier;
        self
    }

    /// Configured publisher endpoints.
    pub fn sources(&self) -> &[UnlSource] {
        &self.sources
    }

    /// Storage the jobs write to.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Fetch every configured list and reconcile attribution.
    pub async fn update_unls(&self) -> Result<JobReport> {
        let mut report = JobReport::new("update_unls");

        let results = self
            .fan_out(self.sources.iter(), |source| self.refresh_source(source))
            .await;

        for (source, result) in results {
            match result {
                Ok(_) => report.succeeded += 1,
                Err(IngestError::StaleSequence { candidate, current }) => {
                    debug!(url = %source.url, candidate, current, "Validator list unchanged");
                    report.skipped += 1;
                }
                Err(e) if e.is_persistence() => return Err(abort(report.job, e)),
                Err(e) => report.fail(&source.url, &e),
            }
        }

        report.log();
        Ok(report)
    }

    /// Fetch, verify and apply one publisher's list.
    pub async fn refresh_source(&self, source: &UnlSource) -> Result<ReconcileReport, IngestError> {
        let fetched = self.fetcher.fetch(source).await?;

        for manifest in &fetched.member_manifests {
            match self.processor.handle_manifest(manifest).await {
                Ok(_) => {}
                Err(e) if e.is_persistence() => return Err(e),
                Err(e) => warn!(
                    url = %source.url,
                    master_key = %manifest.master_key,
                    error = %e,
                    "Rejected embedded manifest"
                ),
            }
        }

        self.reconciler.reconcile(&fetched).await
    }

    /// Refresh manifests of validators currently on some list.
    pub async fn update_unl_manifests(&self) -> Result<JobReport> {
        let validators = self.storage.validators_on_any_unl().await?;
        self.resolve_all("update_unl_manifests", validators).await
    }

    /// Resolve validators known only by signing key.
    pub async fn update_manifests_from_rippled(&self) -> Result<JobReport> {
        let validators = self.storage.validators_without_master_key().await?;
        self.resolve_all("update_manifests_from_rippled", validators).await
    }

    async fn resolve_all(
        &self,
        job: &'static str,
        validators: Vec<crate::storage::ValidatorRecord>,
    ) -> Result<JobReport> {
        let mut report = JobReport::new(job);

        let results = self
            .fan_out(validators.iter(), |validator| self.rippled.resolve(validator))
            .await;

        for (validator, result) in results {
            match result {
                Ok(resolution) if resolution.outcome.is_accepted() => report.succeeded += 1,
                Ok(_) => report.skipped += 1,
                Err(e) if e.is_persistence() => return Err(abort(job, e)),
                Err(e) => report.fail(validator.lookup_key(), &e),
            }
        }

        report.log();
        Ok(report)
    }

    /// Check claimed domains that are not yet verified.
    pub async fn verify_domains(&self) -> Result<JobReport> {
        let mut report = JobReport::new("verify_domains");
        let Some(verifier) = &self.domains else {
            debug!("Domain verification disabled");
            return Ok(report);
        };

        let pending = self.storage.manifests_pending_domain_verification().await?;
        let results = self
            .fan_out(pending.iter(), |manifest| verifier.verify(manifest))
            .await;

        for (manifest, result) in results {
            match result {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.skipped += 1,
                Err(e) if e.is_persistence() => return Err(abort(report.job, e)),
                Err(e) => report.fail(&manifest.master_key, &e),
            }
        }

        report.log();
        Ok(report)
    }

    /// Both manifest jobs, in order.
    pub async fn update_manifests(&self) -> Result<Vec<JobReport>> {
        Ok(vec![
            self.update_manifests_from_rippled().await?,
            self.update_unl_manifests().await?,
        ])
    }

    /// Run `op` over `items` with bounded concurrency, pairing each result
    /// with its item.
    async fn fan_out<'a, T, I, F, Fut, R>(&self, items: I, op: F) -> Vec<(&'a T, R)>
    where
        T: 'a,
        I: IntoIterator<Item = &'a T>,
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = R>,
    {
        stream::iter(items)
            .map(|item| {
                let fut = op(item);
                async move { (item, fut.await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

fn abort(job: &str, err: IngestError) -> anyhow::Error {
    error!(job, error = %err, "Job aborted");
    anyhow::Error::new(err).context(format!("{job} aborted"))
}
