use anyhow::Context;
use bulkops_core::action::CommandAction;
use bulkops_core::catalog::YamlCatalog;
use bulkops_core::config::Config;
use bulkops_core::dispatch::TargetDispatcher;
use bulkops_core::engine::{BulkActionEngine, EngineSettings};
use bulkops_core::lock::LocalLockManager;
use bulkops_core::pool::WorkerPool;
use bulkops_core::report::{self, ReportSender};
use bulkops_core::run::RunIdGenerator;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::history::RunHistory;

/// Shared application state passed to all route handlers.
///
/// Construct inside a Tokio runtime: the inbound pool spawns its workers
/// immediately.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub config: Arc<Config>,
    pub catalog: Arc<YamlCatalog>,
    /// One engine per configured action, keyed by action name.
    pub engines: Arc<BTreeMap<String, Arc<BulkActionEngine>>>,
    /// Shared pool processing inbound frames for every session.
    pub inbound: Arc<WorkerPool>,
    pub runs: Arc<RunHistory>,
}

impl AppState {
    /// Load `.bulkops/config.yaml` and the catalog it points at.
    pub fn load(root: PathBuf) -> anyhow::Result<Self> {
        let config = Config::load(&root).context("failed to load config")?;
        let catalog_path = config.catalog_path(&root);
        let catalog = YamlCatalog::open(&catalog_path)
            .with_context(|| format!("failed to open catalog {}", catalog_path.display()))?;
        let sender = report::sender_for(config.report.as_ref())?;
        Ok(Self::from_parts(root, config, catalog, sender))
    }

    pub fn from_parts(
        root: PathBuf,
        config: Config,
        catalog: YamlCatalog,
        sender: Arc<dyn ReportSender>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let runs = Arc::new(RunHistory::default());
        let locks = Arc::new(LocalLockManager::new());
        let run_ids = Arc::new(RunIdGenerator::new());
        let settings = EngineSettings::from(&config);

        let engines = config
            .actions
            .iter()
            .map(|(name, action)| {
                let dispatcher = TargetDispatcher::new(CommandAction::new(name, &root, action));
                let engine = BulkActionEngine::new(
                    catalog.clone(),
                    Arc::new(dispatcher),
                    locks.clone(),
                    sender.clone(),
                )
                .with_settings(settings)
                .with_run_ids(run_ids.clone())
                .with_observer(runs.observer(name));
                (name.clone(), Arc::new(engine))
            })
            .collect();

        let inbound = WorkerPool::new("inbound", config.server.inbound_workers);

        Self {
            root,
            config: Arc::new(config),
            catalog,
            engines: Arc::new(engines),
            inbound: Arc::new(inbound),
            runs,
        }
    }

    pub fn engine(&self, action: &str) -> Option<Arc<BulkActionEngine>> {
        self.engines.get(action).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkops_core::catalog::EXAMPLE_CATALOG;
    use bulkops_core::report::LogReportSender;
    use tempfile::TempDir;

    #[tokio::test]
    async fn one_engine_per_action() {
        let dir = TempDir::new().unwrap();
        let state = AppState::from_parts(
            dir.path().to_path_buf(),
            Config::new(),
            YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap(),
            Arc::new(LogReportSender),
        );
        assert!(state.engine("cleanup").is_some());
        assert!(state.engine("refresh").is_some());
        assert!(state.engine("truncate").is_none());
        assert_eq!(state.inbound.size(), 16);
    }

    #[tokio::test]
    async fn load_fails_without_config() {
        let dir = TempDir::new().unwrap();
        assert!(AppState::load(dir.path().to_path_buf()).is_err());
    }
}
