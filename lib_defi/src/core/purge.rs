//! # Purge Controller
//!
//! Drops the cached datasets and statuses owned by one protocol module, or by
//! every module at once. Ownership comes from an exhaustive table, so adding a
//! module without deciding what purging it means does not compile.
//!
//! Aggregates are never touched. An aggregate left `Loaded` after a purge stays
//! stale until its next explicit fetch.
//!
//! A leaf whose fetch is in flight is not reset: its result would land after
//! the reset and resurrect the purged data under a `NotLoaded` status. Such a
//! leaf is reported as deferred instead. [`PurgeController::purge_settled`]
//! waits for deferred leaves and purges them once they settle.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::registry::StatusRegistry;
use crate::core::section::{Module, ModuleSelector, Section};
use crate::services::{DatasetStore, IndependentStore};

/// What purging a module affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeTarget {
    /// Leaf sections in the shared registry.
    Leaves(&'static [Section]),
    /// State kept by the module's own store.
    Independent,
}

/// The leaves or store each module owns.
pub fn purge_target(module: Module) -> PurgeTarget {
    match module {
        Module::MakerdaoDsr => {
            PurgeTarget::Leaves(&[Section::DefiDsrBalances, Section::DefiDsrHistory])
        }
        Module::MakerdaoVaults => PurgeTarget::Leaves(&[
            Section::DefiMakerdaoVaults,
            Section::DefiMakerdaoVaultDetails,
        ]),
        Module::Aave => {
            PurgeTarget::Leaves(&[Section::DefiAaveBalances, Section::DefiAaveHistory])
        }
        Module::Compound => PurgeTarget::Leaves(&[
            Section::DefiCompoundBalances,
            Section::DefiCompoundHistory,
        ]),
        Module::Yearn => PurgeTarget::Leaves(&[
            Section::DefiYearnVaultsBalances,
            Section::DefiYearnVaultsHistory,
        ]),
        Module::YearnV2 => PurgeTarget::Leaves(&[
            Section::DefiYearnVaultsV2Balances,
            Section::DefiYearnVaultsV2History,
        ]),
        Module::Uniswap => PurgeTarget::Leaves(&[
            Section::DefiUniswapBalances,
            Section::DefiUniswapTrades,
            Section::DefiUniswapEvents,
        ]),
        Module::Liquity => PurgeTarget::Leaves(&[
            Section::DefiLiquityBalances,
            Section::DefiLiquityEvents,
        ]),
        Module::Balancer | Module::Sushiswap => PurgeTarget::Independent,
    }
}

/// What a purge did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Leaves cleared and reset to `NotLoaded`.
    pub cleared: Vec<Section>,
    /// Leaves left alone because a fetch was in flight.
    pub deferred: Vec<Section>,
    /// Modules whose independent store was reset.
    pub reset_stores: Vec<Module>,
}

impl PurgeReport {
    /// `true` when nothing was deferred.
    pub fn is_complete(&self) -> bool {
        self.deferred.is_empty()
    }
}

/// Clears module data and resets leaf status back to `NotLoaded`.
///
/// Aggregate statuses are never touched; they catch up on the next refresh.
pub struct PurgeController {
    registry: Arc<StatusRegistry>,
    store: Arc<dyn DatasetStore>,
    independent: BTreeMap<Module, Arc<dyn IndependentStore>>,
}

impl PurgeController {
    /// Creates a controller with no independent stores registered.
    pub fn new(registry: Arc<StatusRegistry>, store: Arc<dyn DatasetStore>) -> Self {
        Self { registry, store, independent: BTreeMap::new() }
    }

    /// Registers the store a module with independent state is reset through.
    pub fn with_independent_store(
        mut self,
        module: Module,
        store: Arc<dyn IndependentStore>,
    ) -> Self {
        self.independent.insert(module, store);
        self
    }

    /// Purges every leaf the selected module(s) own, and resets their
    /// independent stores. In-flight leaves are deferred, not purged.
    pub fn purge(&self, selector: ModuleSelector) -> PurgeReport {
        let mut report = PurgeReport::default();
        for module in selected(selector) {
            match purge_target(module) {
                PurgeTarget::Leaves(leaves) => {
                    for leaf in leaves {
                        if self.clear_leaf(*leaf) {
                            report.cleared.push(*leaf);
                        } else {
                            warn!(section = %leaf, "fetch in flight, purge deferred");
                            report.deferred.push(*leaf);
                        }
                    }
                }
                PurgeTarget::Independent => match self.independent.get(&module) {
                    Some(store) => {
                        store.reset();
                        report.reset_stores.push(module);
                    }
                    None => debug!(%module, "no independent store registered"),
                },
            }
        }
        info!(
            ?selector,
            cleared = report.cleared.len(),
            deferred = report.deferred.len(),
            "purged"
        );
        report
    }

    /// Like [`PurgeController::purge`], but waits for deferred leaves to
    /// settle and purges them too.
    pub async fn purge_settled(&self, selector: ModuleSelector) -> PurgeReport {
        let mut report = self.purge(selector);
        let mut pending = std::mem::take(&mut report.deferred);
        while let Some(leaf) = pending.pop() {
            self.registry.wait_settled(leaf).await;
            if self.clear_leaf(leaf) {
                report.cleared.push(leaf);
            } else {
                pending.push(leaf);
            }
        }
        report
    }

    fn clear_leaf(&self, leaf: Section) -> bool {
        self.registry
            .reset_if_idle(leaf, || self.store.set_dataset(leaf, leaf.empty_dataset()))
    }
}

fn selected(selector: ModuleSelector) -> Vec<Module> {
    match selector {
        ModuleSelector::One(module) => vec![module],
        ModuleSelector::All => Module::ALL.to_vec(),
    }
}
