use anyhow::Result;
use clap::Subcommand;
use lib_defi::{
    BackendApi, Collaborators, DatasetStore, FetchGuard, FetchOutcome, InMemoryDatasetStore,
    LogSink, Module, ModuleSelector, OrchestrationGraph, PurgeController, PurgeReport,
    PurgeTarget, RestBackend, Section, SessionSettings, Status, StatusRegistry, TaskRunner,
    purge_target,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::config::Settings;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Load the DeFi summary, then every per-protocol balance.
    Overview {
        #[arg(long)]
        refresh: bool,
    },
    /// Load lending balances, and lending history with premium.
    Lending {
        #[arg(long)]
        refresh: bool,
    },
    /// Load borrowing balances, and borrowing history with premium.
    Borrowing {
        #[arg(long)]
        refresh: bool,
    },
    /// Load claimable airdrops.
    Airdrops {
        #[arg(long)]
        refresh: bool,
    },
    /// Load any single section by name, e.g. defi_aave_history.
    Leaf {
        section: Section,
        #[arg(long)]
        refresh: bool,
    },
    /// Make the backend rebuild protocol history (aave, yearn_vaults, yearn_vaults_v2).
    ResetHistory {
        #[arg(required = true)]
        modules: Vec<Module>,
    },
    /// Drop cached data of one module, or `all`.
    ///
    /// Balancer and Sushiswap keep their state outside this loader and are
    /// not accepted here; `all` skips them.
    Purge {
        #[arg(value_parser = purge_selector)]
        selector: ModuleSelector,
    },
}

/// Parses a purge selector, refusing modules this loader holds no state for.
fn purge_selector(s: &str) -> Result<ModuleSelector, String> {
    let selector: ModuleSelector = s.parse().map_err(|e| format!("{e}"))?;
    match selector {
        ModuleSelector::One(module) if purge_target(module) == PurgeTarget::Independent => {
            Err(format!("{module} keeps its own state and cannot be purged by this loader"))
        }
        _ => Ok(selector),
    }
}

/// What a command did, printed as JSON.
#[derive(Debug, Serialize)]
pub struct Report {
    pub outcomes: Vec<(Section, FetchOutcome)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_reset: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge: Option<PurgeReport>,
    pub statuses: BTreeMap<Section, Status>,
    /// Datasets of every loaded leaf.
    pub datasets: Map<String, Value>,
}

pub struct Loader {
    registry: Arc<StatusRegistry>,
    store: Arc<InMemoryDatasetStore>,
    graph: OrchestrationGraph,
    purge: PurgeController,
}

impl Loader {
    /// Wires the orchestration core to the REST backend named in `settings`.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let backend = Arc::new(RestBackend::new(
            &settings.backend_url,
            settings.poll_interval,
            settings.task_timeout,
        )?);
        let session = SessionSettings::new(settings.premium, settings.modules.iter().copied());
        info!(
            url = %backend.api_root(),
            premium = settings.premium,
            modules = ?settings.modules,
            "backend configured"
        );
        Ok(Self::with_backend(Arc::new(session), backend.clone(), backend))
    }

    pub fn with_backend(
        session: Arc<SessionSettings>,
        backend: Arc<dyn BackendApi>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        let registry = Arc::new(StatusRegistry::new());
        let store = Arc::new(InMemoryDatasetStore::new());
        let guard = Arc::new(FetchGuard::new(
            Arc::clone(&registry),
            Collaborators {
                session,
                backend,
                runner,
                store: store.clone(),
                sink: Arc::new(LogSink),
            },
        ));
        Self {
            graph: OrchestrationGraph::new(guard),
            purge: PurgeController::new(Arc::clone(&registry), store.clone()),
            registry,
            store,
        }
    }

    pub async fn execute(&self, command: Command) -> Report {
        let mut history_reset = None;
        let mut purge = None;
        let outcomes = match command {
            Command::Overview { refresh } => {
                vec![(Section::DefiOverview, self.graph.fetch_overview(refresh).await)]
            }
            Command::Lending { refresh } => self.graph.fetch_lending(refresh).await,
            Command::Borrowing { refresh } => self.graph.fetch_borrowing(refresh).await,
            Command::Airdrops { refresh } => {
                vec![(Section::DefiAirdrops, self.graph.fetch_airdrops(refresh).await)]
            }
            Command::Leaf { section, refresh } if section.is_aggregate() => {
                self.graph.run_aggregate(section, refresh).await
            }
            Command::Leaf { section, refresh } => {
                vec![(section, self.graph.fetch_leaf(section, refresh).await)]
            }
            Command::ResetHistory { modules } => {
                history_reset = Some(self.graph.reset_history(&modules).await);
                Vec::new()
            }
            Command::Purge { selector } => {
                purge = Some(self.purge.purge_settled(selector).await);
                Vec::new()
            }
        };

        let statuses = self.registry.snapshot();
        let datasets = statuses
            .iter()
            .filter(|(section, status)| !section.is_aggregate() && **status == Status::Loaded)
            .map(|(section, _)| (section.as_str().to_string(), self.store.dataset(*section)))
            .collect();

        Report { outcomes, history_reset, purge, statuses, datasets }
    }
}
