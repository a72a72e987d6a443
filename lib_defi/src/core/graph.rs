//! # Orchestration Graph
//!
//! Composes leaf fetches into aggregate sections. The dependency edges are
//! static; an aggregate's own status only ever reflects the progress of the
//! leaves it subsumes:
//!
//! -   `Loading`/`Refreshing` once the aggregate is claimed (same freshness
//!     rule as a leaf),
//! -   `PartiallyLoaded` as soon as the first leaf completes,
//! -   `Loaded` once every leaf has completed, failed leaves included.
//!
//! A leaf counts as complete when the guard has returned *and* the leaf's own
//! status has settled. A leaf already in flight from another caller is thus
//! awaited rather than counted as done the moment the guard skips it.
//!
//! The overview is a sequence rather than a fan-out: the cheap summary leaf
//! first, then every per-protocol balance at once.

use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info};

use crate::core::fetch_guard::{FetchGuard, FetchOutcome, SkipReason};
use crate::core::section::{Module, Section};
use crate::core::status::Status;
use crate::services::QueryOptions;

const OVERVIEW_PROTOCOLS: &[Section] = &[
    Section::DefiAaveBalances,
    Section::DefiDsrBalances,
    Section::DefiMakerdaoVaults,
    Section::DefiCompoundBalances,
    Section::DefiYearnVaultsBalances,
    Section::DefiYearnVaultsV2Balances,
    Section::DefiLiquityBalances,
];

const LENDING: &[Section] = &[
    Section::DefiDsrBalances,
    Section::DefiAaveBalances,
    Section::DefiCompoundBalances,
    Section::DefiYearnVaultsBalances,
    Section::DefiYearnVaultsV2Balances,
];

const LENDING_HISTORY: &[Section] = &[
    Section::DefiDsrHistory,
    Section::DefiAaveHistory,
    Section::DefiCompoundHistory,
    Section::DefiYearnVaultsHistory,
    Section::DefiYearnVaultsV2History,
];

const BORROWING: &[Section] = &[
    Section::DefiMakerdaoVaults,
    Section::DefiCompoundBalances,
    Section::DefiAaveBalances,
    Section::DefiLiquityBalances,
];

const BORROWING_HISTORY: &[Section] = &[
    Section::DefiMakerdaoVaultDetails,
    Section::DefiCompoundHistory,
    Section::DefiAaveHistory,
    Section::DefiLiquityEvents,
];

/// How an aggregate reaches its leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependencies {
    /// Every leaf at once.
    FanOut(&'static [Section]),
    /// `head` alone, then `rest` at once.
    Sequence {
        head: Section,
        rest: &'static [Section],
    },
}

impl Dependencies {
    /// Every leaf the aggregate subsumes.
    pub fn leaves(&self) -> Vec<Section> {
        match self {
            Dependencies::FanOut(leaves) => leaves.to_vec(),
            Dependencies::Sequence { head, rest } => {
                std::iter::once(*head).chain(rest.iter().copied()).collect()
            }
        }
    }
}

/// The static edge set of `aggregate`, or `None` for a leaf.
pub fn dependencies(aggregate: Section) -> Option<Dependencies> {
    let deps = match aggregate {
        Section::DefiOverview => Dependencies::Sequence {
            head: Section::DefiBalances,
            rest: OVERVIEW_PROTOCOLS,
        },
        Section::DefiLending => Dependencies::FanOut(LENDING),
        Section::DefiLendingHistory => Dependencies::FanOut(LENDING_HISTORY),
        Section::DefiBorrowing => Dependencies::FanOut(BORROWING),
        Section::DefiBorrowingHistory => Dependencies::FanOut(BORROWING_HISTORY),
        _ => return None,
    };
    Some(deps)
}

/// History leaves the backend can drop and rebuild on request.
fn resettable_history(module: Module) -> Option<Section> {
    match module {
        Module::Aave => Some(Section::DefiAaveHistory),
        Module::Yearn => Some(Section::DefiYearnVaultsHistory),
        Module::YearnV2 => Some(Section::DefiYearnVaultsV2History),
        _ => None,
    }
}

/// Drives aggregate sections through their leaves. Cheap to clone.
#[derive(Clone)]
pub struct OrchestrationGraph {
    guard: Arc<FetchGuard>,
}

impl OrchestrationGraph {
    /// Creates a graph whose leaf fetches all go through `guard`.
    pub fn new(guard: Arc<FetchGuard>) -> Self {
        Self { guard }
    }

    /// The guard leaf fetches go through.
    pub fn guard(&self) -> &Arc<FetchGuard> {
        &self.guard
    }

    /// Runs `aggregate` and then, if it has one, its premium variant.
    ///
    /// Returns the outcome of every tier that was considered, in order. A tier
    /// the session is not entitled to is reported as gated and left untouched.
    /// A leaf passed here is fetched like [`OrchestrationGraph::fetch_leaf`].
    pub async fn run_aggregate(
        &self,
        aggregate: Section,
        refresh: bool,
    ) -> Vec<(Section, FetchOutcome)> {
        let mut outcomes = vec![(aggregate, self.run_tier(aggregate, refresh).await)];
        if let Some(premium) = aggregate.premium_variant() {
            outcomes.push((premium, self.run_tier(premium, refresh).await));
        }
        outcomes
    }

    /// Loads the summary, then every per-protocol balance.
    pub async fn fetch_overview(&self, refresh: bool) -> FetchOutcome {
        self.run_tier(Section::DefiOverview, refresh).await
    }

    /// Lending balances, then lending history with premium.
    pub async fn fetch_lending(&self, refresh: bool) -> Vec<(Section, FetchOutcome)> {
        self.run_aggregate(Section::DefiLending, refresh).await
    }

    /// Borrowing balances, then borrowing history with premium.
    pub async fn fetch_borrowing(&self, refresh: bool) -> Vec<(Section, FetchOutcome)> {
        self.run_aggregate(Section::DefiBorrowing, refresh).await
    }

    /// Claimable airdrops; an ungated leaf.
    pub async fn fetch_airdrops(&self, refresh: bool) -> FetchOutcome {
        self.fetch_leaf(Section::DefiAirdrops, refresh).await
    }

    /// Fetches one leaf and waits until it has settled, even when another
    /// caller's fetch was already in flight.
    pub async fn fetch_leaf(&self, section: Section, refresh: bool) -> FetchOutcome {
        self.complete_leaf(section, QueryOptions::refresh(refresh)).await
    }

    /// Asks the backend to rebuild the history of the selected protocols.
    ///
    /// Premium only, and skipped while the lending history aggregate is in
    /// flight. Protocols without a resettable history are ignored. Returns
    /// whether anything ran.
    pub async fn reset_history(&self, modules: &[Module]) -> bool {
        if !self.guard.session().premium() {
            debug!("history reset needs premium, skipping");
            return false;
        }
        let registry = self.guard.registry();
        if !registry.claim(Section::DefiLendingHistory, Status::Refreshing) {
            debug!("lending history in flight, skipping reset");
            return false;
        }

        let options = QueryOptions { refresh: true, reset: true };
        let mut pending: FuturesUnordered<_> = modules
            .iter()
            .filter_map(|module| resettable_history(*module))
            .map(|section| self.complete_leaf(section, options))
            .collect();
        while pending.next().await.is_some() {}

        registry.set(Section::DefiLendingHistory, Status::Loaded);
        info!(?modules, "history reset complete");
        true
    }

    async fn run_tier(&self, aggregate: Section, refresh: bool) -> FetchOutcome {
        let Some(deps) = dependencies(aggregate) else {
            // A leaf has no tier of its own to drive.
            return self.fetch_leaf(aggregate, refresh).await;
        };
        if !aggregate.gate().permits(self.guard.session()) {
            debug!(%aggregate, "gated, skipping");
            return FetchOutcome::Skipped(SkipReason::Gated);
        }

        let registry = self.guard.registry();
        let Some(started) = registry.begin(aggregate, refresh) else {
            let reason = if registry.get(aggregate).is_loading() {
                SkipReason::InFlight
            } else {
                SkipReason::Fresh
            };
            debug!(%aggregate, ?reason, "skipping");
            return FetchOutcome::Skipped(reason);
        };
        info!(%aggregate, status = ?started, "aggregate started");

        let options = QueryOptions::refresh(refresh);
        match deps {
            Dependencies::FanOut(leaves) => {
                let mut pending: FuturesUnordered<_> = leaves
                    .iter()
                    .map(|leaf| self.complete_leaf(*leaf, options))
                    .collect();
                let mut done = 0;
                while pending.next().await.is_some() {
                    done += 1;
                    if done == 1 && !pending.is_empty() {
                        registry.set(aggregate, Status::PartiallyLoaded);
                        info!(%aggregate, "first leaf completed");
                    }
                }
            }
            Dependencies::Sequence { head, rest } => {
                self.complete_leaf(head, options).await;
                registry.set(aggregate, Status::PartiallyLoaded);
                info!(%aggregate, %head, "summary completed");

                let mut pending: FuturesUnordered<_> = rest
                    .iter()
                    .map(|leaf| self.complete_leaf(*leaf, options))
                    .collect();
                while pending.next().await.is_some() {}
            }
        }

        registry.set(aggregate, Status::Loaded);
        info!(%aggregate, "aggregate loaded");
        FetchOutcome::Loaded
    }

    async fn complete_leaf(&self, section: Section, options: QueryOptions) -> FetchOutcome {
        let outcome = self.guard.run(section, options).await;
        if outcome == FetchOutcome::Skipped(SkipReason::InFlight) {
            self.guard.registry().wait_settled(section).await;
        }
        outcome
    }
}
