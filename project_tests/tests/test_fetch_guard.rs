//! # Fetch Guard Integration Tests
//!
//! Dedup, freshness, gating and settlement of single leaf fetches, driven
//! through the public API with the in-memory backend.

use std::sync::Arc;

use futures_util::future::join_all;
use lib_defi::testing::{transitions_of, FakeBackend, Harness};
use lib_defi::{DatasetStore, FetchOutcome, Module, QueryOptions, Section, SkipReason, Status};
use tokio::sync::Barrier;

#[tokio::test]
async fn many_concurrent_callers_issue_one_submission() {
    let h = Harness::new(false, &[Module::Aave]);
    let section = Section::DefiAaveBalances;

    let outcomes = join_all((0..8).map(|_| h.guard.run(section, QueryOptions::default()))).await;

    assert_eq!(outcomes.iter().filter(|o| **o == FetchOutcome::Loaded).count(), 1);
    assert!(outcomes
        .iter()
        .filter(|o| **o != FetchOutcome::Loaded)
        .all(|o| *o == FetchOutcome::Skipped(SkipReason::InFlight)));
    assert_eq!(h.backend.submissions(section), 1);
    assert_eq!(h.registry.get(section), Status::Loaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_worker_threads_claim_a_section_once() {
    const TASKS: usize = 16;
    let section = Section::DefiAaveBalances;

    for round in 0..50 {
        let h = Harness::new(false, &[Module::Aave]);
        let barrier = Arc::new(Barrier::new(TASKS));
        let handles = (0..TASKS).map(|_| {
            let guard = Arc::clone(&h.guard);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                guard.run(section, QueryOptions::default()).await
            })
        });
        let outcomes: Vec<FetchOutcome> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let loaded = outcomes.iter().filter(|o| **o == FetchOutcome::Loaded).count();
        assert_eq!(loaded, 1, "round {round}: {outcomes:?}");
        // Latecomers arriving after the winner settled see a fresh section.
        assert!(
            outcomes.iter().all(|o| matches!(
                o,
                FetchOutcome::Loaded
                    | FetchOutcome::Skipped(SkipReason::InFlight | SkipReason::Fresh)
            )),
            "round {round}: {outcomes:?}"
        );
        assert_eq!(h.backend.submissions(section), 1, "round {round}");
        assert_eq!(h.registry.get(section), Status::Loaded);
    }
}

#[tokio::test]
async fn fresh_section_without_refresh_is_left_alone() {
    let h = Harness::new(false, &[Module::Compound]);
    let section = Section::DefiCompoundBalances;
    h.graph.fetch_leaf(section, false).await;
    let dataset = h.store.dataset(section);

    let mut feed = h.registry.changes();
    let outcome = h.guard.run(section, QueryOptions::default()).await;

    assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::Fresh));
    assert_eq!(h.backend.submissions(section), 1);
    assert_eq!(h.store.dataset(section), dataset);
    assert!(transitions_of(&mut feed, section).is_empty());
}

#[tokio::test]
async fn every_invocation_that_runs_ends_loaded() {
    let h = Harness::all_modules(true);
    h.backend.fail(Section::DefiLiquityEvents);
    h.backend.fail(Section::DefiDsrHistory);

    for section in Section::leaves() {
        let outcome = h.guard.run(section, QueryOptions::default()).await;
        assert!(outcome.ran(), "{section} was skipped");
        assert_eq!(h.registry.get(section), Status::Loaded, "{section}");
    }
    assert_eq!(h.sink.notifications().len(), 2);
}

#[tokio::test]
async fn inactive_dsr_module_is_never_queried() {
    let h = Harness::new(true, &[Module::Aave]);

    let outcome = h.graph.fetch_leaf(Section::DefiDsrBalances, false).await;

    assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::Gated));
    assert_eq!(h.registry.get(Section::DefiDsrBalances), Status::NotLoaded);
    assert_eq!(h.backend.submissions(Section::DefiDsrBalances), 0);
    assert!(h.sink.notifications().is_empty());
}

#[tokio::test]
async fn refreshing_aave_balances_passes_through_refreshing() {
    let h = Harness::new(false, &[Module::Aave]);
    let section = Section::DefiAaveBalances;
    h.graph.fetch_leaf(section, false).await;
    let before = h.backend.submissions(section);

    let mut feed = h.registry.changes();
    let outcome = h.graph.fetch_leaf(section, true).await;

    assert_eq!(outcome, FetchOutcome::Loaded);
    assert_eq!(
        transitions_of(&mut feed, section),
        vec![Status::Loaded, Status::Refreshing, Status::Loaded]
    );
    assert_eq!(h.backend.submissions(section) - before, 1);
}

#[tokio::test]
async fn toggling_a_module_applies_on_the_next_call() {
    let h = Harness::new(false, &[]);
    let section = Section::DefiLiquityBalances;
    assert_eq!(
        h.guard.run(section, QueryOptions::default()).await,
        FetchOutcome::Skipped(SkipReason::Gated)
    );

    h.session.set_active(Module::Liquity, true);
    assert_eq!(h.guard.run(section, QueryOptions::default()).await, FetchOutcome::Loaded);
    assert_eq!(h.store.dataset(section), FakeBackend::payload(section));
}

#[tokio::test]
async fn failure_notification_names_the_section_and_error() {
    let h = Harness::new(true, &[Module::Uniswap]);
    h.backend.fail(Section::DefiUniswapTrades);

    let outcome = h.guard.run(Section::DefiUniswapTrades, QueryOptions::default()).await;

    assert_eq!(outcome, FetchOutcome::Failed);
    let notes = h.sink.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Uniswap trades query failed");
    assert!(notes[0].message.starts_with("Failed to fetch Uniswap trades:"));
    assert!(notes[0].message.contains("exploded"));
}
