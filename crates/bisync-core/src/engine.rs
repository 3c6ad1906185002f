//! SyncEngine: runs one reconciliation pass per endpoint.
//!
//! A run works as follows:
//!
//! 1. Open the endpoint's sync baseline and its local baseline
//! 2. Prime both backends' hash caches from those baselines
//! 3. List local and remote concurrently; an uninitialized remote lists as empty
//! 4. Classify the two snapshots against the baselines into a plan
//! 5. Execute the plan and, if every action succeeded, commit both baselines
//!
//! Each endpoint keeps its own local baseline. A run against one endpoint
//! therefore never hides an unsynced local edit from the next endpoint.
//! Endpoints run one after another because they share the local tree.

use crate::backend::{Backend, BackendError};
use crate::baseline::{BaselineRegistry, BaselineStore};
use crate::classifier::{Action, PlanSummary, classify};
use crate::error::{Result, Side, SyncError};
use crate::events::{EventBus, SyncEvent, now_millis};
use crate::executor::{FailurePolicy, PlanExecutor};
use crate::fs::FileSystem;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A remote container plus where its two baselines are stored.
#[derive(Clone)]
pub struct Endpoint {
    pub name: String,
    pub backend: Arc<dyn Backend>,
    /// Remote state as of the last successful run.
    pub baseline_path: String,
    /// Local state as of the last successful run against this endpoint.
    pub local_baseline_path: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        let name = name.into();
        Self {
            baseline_path: Self::sync_baseline_file(&name),
            local_baseline_path: Self::local_baseline_file(&name),
            name,
            backend,
        }
    }

    /// `<name>.baseline.json`
    pub fn sync_baseline_file(name: &str) -> String {
        format!("{}.baseline.json", name)
    }

    /// `<name>.local.baseline.json`
    pub fn local_baseline_file(name: &str) -> String {
        format!("{}.local.baseline.json", name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub policy: FailurePolicy,
    /// Classify only; no action runs and no baseline is written.
    pub dry_run: bool,
}

/// Result of one run against one endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub endpoint: String,
    pub summary: PlanSummary,
    pub plan: Vec<Action>,
    /// Number of actions applied.
    pub applied: usize,
    pub committed: bool,
    pub dry_run: bool,
}

pub struct SyncEngine<F: FileSystem + Clone> {
    local: Arc<dyn Backend>,
    registry: Arc<BaselineRegistry<F>>,
    events: Arc<EventBus>,
    options: SyncOptions,
}

impl<F: FileSystem + Clone> SyncEngine<F> {
    pub fn new(local: Arc<dyn Backend>, registry: Arc<BaselineRegistry<F>>) -> Self {
        Self {
            local,
            registry,
            events: Arc::new(EventBus::new()),
            options: SyncOptions::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    async fn baselines(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(Arc<BaselineStore<F>>, Arc<BaselineStore<F>>)> {
        let sync_baseline = self.registry.get_or_create(&endpoint.baseline_path).await?;
        let local_baseline = self
            .registry
            .get_or_create(&endpoint.local_baseline_path)
            .await?;
        Ok((sync_baseline, local_baseline))
    }

    async fn build_plan(
        &self,
        endpoint: &Endpoint,
        sync_baseline: &BaselineStore<F>,
        local_baseline: &BaselineStore<F>,
    ) -> Result<Vec<Action>> {
        let sync_entries = sync_baseline.read();
        let local_entries = local_baseline.read();
        self.local.prime_hash_cache(&local_entries);
        endpoint.backend.prime_hash_cache(&sync_entries);

        let (local, remote) = futures::join!(self.local.list_files(), endpoint.backend.list_files());

        let local = local.map_err(|source| SyncError::Listing {
            side: Side::Local,
            source,
        })?;
        let remote = match remote {
            Ok(files) => files,
            Err(BackendError::Uninitialized(what)) => {
                info!("{} is not initialized yet; treating it as empty", what);
                Vec::new()
            }
            Err(source) => {
                return Err(SyncError::Listing {
                    side: Side::Remote,
                    source,
                });
            }
        };

        debug!(
            "[{}] {} local, {} remote records",
            endpoint.name,
            local.len(),
            remote.len()
        );

        let plan = classify(&local, &remote, &sync_entries, &local_entries);
        let summary = PlanSummary::of(&plan);
        self.events.emit(SyncEvent::PlanReady {
            endpoint: endpoint.name.clone(),
            counts: summary.counts.clone(),
            total: summary.total(),
            timestamp: now_millis(),
        });
        Ok(plan)
    }

    /// Classify without executing anything.
    pub async fn plan(&self, endpoint: &Endpoint) -> Result<Vec<Action>> {
        let (sync_baseline, local_baseline) = self.baselines(endpoint).await?;
        self.build_plan(endpoint, &sync_baseline, &local_baseline)
            .await
    }

    /// Run one full pass against `endpoint`.
    pub async fn run(&self, endpoint: &Endpoint) -> Result<SyncReport> {
        self.events.emit(SyncEvent::RunStarted {
            endpoint: endpoint.name.clone(),
            timestamp: now_millis(),
        });

        let result = self.run_inner(endpoint).await;

        let (committed, failures) = match &result {
            Ok(report) => (report.committed, 0),
            Err(e) => (false, e.failed_identities().len()),
        };
        self.events.emit(SyncEvent::RunFinished {
            endpoint: endpoint.name.clone(),
            committed,
            failures,
            timestamp: now_millis(),
        });
        result
    }

    async fn run_inner(&self, endpoint: &Endpoint) -> Result<SyncReport> {
        let (sync_baseline, local_baseline) = self.baselines(endpoint).await?;
        let plan = self
            .build_plan(endpoint, &sync_baseline, &local_baseline)
            .await?;
        let summary = PlanSummary::of(&plan);
        info!("[{}] plan: {}", endpoint.name, summary);

        if self.options.dry_run {
            return Ok(SyncReport {
                endpoint: endpoint.name.clone(),
                summary,
                plan,
                applied: 0,
                committed: false,
                dry_run: true,
            });
        }

        let executor = PlanExecutor::new(
            self.local.as_ref(),
            endpoint.backend.as_ref(),
            &sync_baseline,
            &local_baseline,
        )
        .with_events(Arc::clone(&self.events))
        .with_policy(self.options.policy);

        let report = executor.execute(plan).await?;
        info!(
            "[{}] synced: {} action(s) applied, baseline committed",
            endpoint.name,
            report.applied.len()
        );

        Ok(SyncReport {
            endpoint: endpoint.name.clone(),
            summary: report.summary,
            applied: report.applied.len(),
            plan: report.applied,
            committed: report.committed,
            dry_run: false,
        })
    }

    /// Run every endpoint in order. One endpoint failing does not stop the rest.
    pub async fn run_all(&self, endpoints: &[Endpoint]) -> Vec<(String, Result<SyncReport>)> {
        let mut results = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let result = self.run(endpoint).await;
            if let Err(e) = &result {
                warn!("[{}] sync failed: {}", endpoint.name, e);
            }
            results.push((endpoint.name.clone(), result));
        }
        results
    }
}
