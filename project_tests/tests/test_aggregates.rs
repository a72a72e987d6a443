//! # Aggregate Integration Tests
//!
//! Partial-completion semantics of the orchestration graph, degraded loads
//! and the interplay of aggregates sharing leaves.

use lib_defi::testing::{transitions_of, FakeBackend, Harness};
use lib_defi::{dependencies, DatasetStore, FetchOutcome, Module, Section, SkipReason, Status};

const WALK: [Status; 4] = [
    Status::NotLoaded,
    Status::Loading,
    Status::PartiallyLoaded,
    Status::Loaded,
];

#[tokio::test]
async fn every_aggregate_walks_through_partially_loaded() {
    let h = Harness::all_modules(true);
    let mut feed = h.registry.changes();

    h.graph.fetch_overview(false).await;
    h.graph.fetch_lending(false).await;
    h.graph.fetch_borrowing(false).await;

    let mut seen = Vec::new();
    while let Ok(change) = feed.try_recv() {
        seen.push(change);
    }
    for aggregate in Section::ALL.into_iter().filter(|s| s.is_aggregate()) {
        let walk: Vec<Status> = seen
            .iter()
            .filter(|c| c.section == aggregate)
            .enumerate()
            .flat_map(|(i, c)| if i == 0 { vec![c.from, c.to] } else { vec![c.to] })
            .collect();
        assert_eq!(walk, WALK, "{aggregate}");
    }
}

#[tokio::test]
async fn overview_with_two_failing_protocols_still_loads() {
    let h = Harness::new(
        false,
        &[
            Module::Aave,
            Module::MakerdaoDsr,
            Module::MakerdaoVaults,
            Module::Compound,
            Module::Yearn,
        ],
    );
    h.backend.fail(Section::DefiCompoundBalances);
    h.backend.fail(Section::DefiMakerdaoVaults);

    let outcome = h.graph.fetch_overview(false).await;

    assert_eq!(outcome, FetchOutcome::Loaded);
    assert_eq!(h.registry.get(Section::DefiOverview), Status::Loaded);
    for failed in [Section::DefiCompoundBalances, Section::DefiMakerdaoVaults] {
        assert_eq!(h.registry.get(failed), Status::Loaded, "{failed}");
        assert_eq!(h.store.dataset(failed), failed.empty_dataset(), "{failed}");
    }
    for loaded in [
        Section::DefiBalances,
        Section::DefiAaveBalances,
        Section::DefiDsrBalances,
        Section::DefiYearnVaultsBalances,
    ] {
        assert_eq!(h.store.dataset(loaded), FakeBackend::payload(loaded), "{loaded}");
    }
    assert_eq!(h.sink.notifications().len(), 2);
    // Inactive protocols were never asked for.
    assert_eq!(h.backend.submissions(Section::DefiLiquityBalances), 0);
}

#[tokio::test]
async fn overlapping_aggregates_share_leaf_fetches() {
    let h = Harness::all_modules(false);

    let (lending, borrowing) =
        tokio::join!(h.graph.fetch_lending(false), h.graph.fetch_borrowing(false));

    assert_eq!(lending[0], (Section::DefiLending, FetchOutcome::Loaded));
    assert_eq!(borrowing[0], (Section::DefiBorrowing, FetchOutcome::Loaded));
    for shared in [Section::DefiAaveBalances, Section::DefiCompoundBalances] {
        assert_eq!(h.backend.submissions(shared), 1, "{shared}");
        assert_eq!(h.registry.get(shared), Status::Loaded, "{shared}");
    }
}

#[tokio::test]
async fn concurrent_runs_of_one_aggregate_collapse() {
    let h = Harness::all_modules(false);

    let (first, second) =
        tokio::join!(h.graph.fetch_overview(false), h.graph.fetch_overview(false));

    assert_eq!(first, FetchOutcome::Loaded);
    assert_eq!(second, FetchOutcome::Skipped(SkipReason::InFlight));
    for leaf in dependencies(Section::DefiOverview).unwrap().leaves() {
        assert_eq!(h.backend.submissions(leaf), 1, "{leaf}");
    }
}

#[tokio::test]
async fn refreshed_overview_refetches_every_active_leaf() {
    let h = Harness::new(false, &[Module::Aave, Module::Liquity]);
    h.graph.fetch_overview(false).await;

    let mut feed = h.registry.changes();
    h.graph.fetch_overview(true).await;

    assert_eq!(
        transitions_of(&mut feed, Section::DefiOverview),
        vec![Status::Loaded, Status::Refreshing, Status::PartiallyLoaded, Status::Loaded]
    );
    for leaf in [Section::DefiBalances, Section::DefiAaveBalances, Section::DefiLiquityBalances] {
        assert_eq!(h.backend.submissions(leaf), 2, "{leaf}");
    }
}

#[tokio::test]
async fn history_tiers_need_premium() {
    let h = Harness::all_modules(false);
    let lending = h.graph.fetch_lending(false).await;

    assert_eq!(
        lending[1],
        (Section::DefiLendingHistory, FetchOutcome::Skipped(SkipReason::Gated))
    );
    assert_eq!(h.registry.get(Section::DefiLendingHistory), Status::NotLoaded);

    h.session.set_premium(true);
    let lending = h.graph.fetch_lending(false).await;
    assert_eq!(lending[0].1, FetchOutcome::Skipped(SkipReason::Fresh));
    assert_eq!(lending[1], (Section::DefiLendingHistory, FetchOutcome::Loaded));
    assert_eq!(h.registry.get(Section::DefiAaveHistory), Status::Loaded);
}

#[tokio::test]
async fn history_reset_sends_the_reset_flag() {
    let h = Harness::all_modules(true);
    h.graph.fetch_lending(false).await;
    let before = h.backend.queries().len();

    assert!(h.graph.reset_history(&[Module::Yearn]).await);

    let queries = h.backend.queries();
    let (section, options) = queries[before];
    assert_eq!(queries.len(), before + 1);
    assert_eq!(section, Section::DefiYearnVaultsHistory);
    assert!(options.refresh && options.reset);
    assert_eq!(h.registry.get(Section::DefiYearnVaultsHistory), Status::Loaded);
}
