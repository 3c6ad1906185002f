//! Wires a [`Config`] into a ready-to-run [`SyncEngine`].

use crate::config::{Config, ConfigError, EndpointConfig, EndpointKind};
use crate::native_fs::NativeFs;

use bisync_core::{
    Backend, BaselineRegistry, Endpoint, EventBus, FsBackend, Subscription, SyncEngine, SyncError,
    SyncEvent, SyncOptions, SyncReport,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Last committed state of one endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub name: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub entries: usize,
}

pub struct App {
    config: Config,
    engine: SyncEngine<NativeFs>,
    registry: Arc<BaselineRegistry<NativeFs>>,
    endpoints: Vec<Endpoint>,
}

impl App {
    pub fn new(config: Config, dry_run: bool) -> Self {
        let local: Arc<dyn Backend> = Arc::new(
            FsBackend::new(NativeFs::new(config.local_root.clone()), "local")
                .with_ignored(config.ignore.iter().cloned())
                .with_hash_concurrency(config.hash_concurrency),
        );
        let registry = Arc::new(BaselineRegistry::new(NativeFs::new(config.state_dir.clone())));
        let endpoints = config
            .endpoints
            .iter()
            .map(|endpoint| build_endpoint(endpoint, config.hash_concurrency))
            .collect();

        let engine = SyncEngine::new(local, Arc::clone(&registry)).with_options(SyncOptions {
            policy: config.failure_policy,
            dry_run,
        });

        Self {
            config,
            engine,
            registry,
            endpoints,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.engine.events()
    }

    /// Every endpoint, or only the named one.
    pub fn select(&self, name: Option<&str>) -> Result<Vec<Endpoint>, ConfigError> {
        match name {
            None => Ok(self.endpoints.clone()),
            Some(name) => self
                .endpoints
                .iter()
                .find(|e| e.name == name)
                .cloned()
                .map(|e| vec![e])
                .ok_or_else(|| ConfigError::UnknownEndpoint(name.to_string())),
        }
    }

    pub async fn sync(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<(String, Result<SyncReport, SyncError>)>, ConfigError> {
        let endpoints = self.select(name)?;
        Ok(self.engine.run_all(&endpoints).await)
    }

    pub async fn status(&self) -> Result<Vec<EndpointStatus>, SyncError> {
        let mut statuses = Vec::with_capacity(self.config.endpoints.len());
        for endpoint in &self.config.endpoints {
            let store = self.registry.get_or_create(&endpoint.baseline_file()).await?;
            statuses.push(EndpointStatus {
                name: endpoint.name.clone(),
                last_sync: store.last_sync(),
                entries: store.len(),
            });
        }
        Ok(statuses)
    }
}

fn build_endpoint(endpoint: &EndpointConfig, hash_concurrency: usize) -> Endpoint {
    let backend: Arc<dyn Backend> = match endpoint.kind {
        EndpointKind::Folder => Arc::new(
            FsBackend::new(NativeFs::new(endpoint.path.clone()), endpoint.name.clone())
                .with_prefix(&endpoint.prefix)
                .with_hash_concurrency(hash_concurrency),
        ),
    };
    Endpoint::new(endpoint.name.clone(), backend)
}

/// Forward sync events to the log. Hold the returned handle for as long as
/// events should be logged.
pub fn log_events(events: &Arc<EventBus>) -> Subscription {
    events.subscribe(|event| match event {
        SyncEvent::RunStarted { endpoint, .. } => info!("[{}] sync started", endpoint),
        SyncEvent::PlanReady {
            endpoint, total, ..
        } => debug!("[{}] {} action(s) planned", endpoint, total),
        SyncEvent::ActionProgress {
            kind,
            identity,
            completed,
            total,
            ..
        } => info!("{} {} ({}/{})", kind, identity, completed, total),
        SyncEvent::ActionFailed {
            kind,
            identity,
            error,
            ..
        } => error!("{} {} failed: {}", kind, identity, error),
        SyncEvent::BaselineCommitted { path, entries, .. } => {
            debug!("Wrote {} ({} entries)", path, entries)
        }
        SyncEvent::RunFinished {
            endpoint,
            committed,
            failures,
            ..
        } => {
            if committed {
                info!("[{}] sync finished", endpoint);
            } else if failures > 0 {
                error!(
                    "[{}] sync finished with {} failure(s); baseline left untouched",
                    endpoint, failures
                );
            } else {
                debug!("[{}] finished without commit", endpoint);
            }
        }
    })
}
