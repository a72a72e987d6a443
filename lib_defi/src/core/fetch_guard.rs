//! # Fetch Guard
//!
//! Runs one leaf fetch at most once per need. Every call goes through the same
//! gauntlet:
//!
//! 1.  **Gate**: an inactive module or missing entitlement is a silent no-op.
//! 2.  **Dedup / freshness**: a single atomic compare-and-set on the registry
//!     either claims the section (`Loading`, or `Refreshing` when a loaded
//!     section is refreshed) or reports why the call is skipped. Concurrent
//!     callers therefore collapse into one in-flight fetch; the losers return
//!     immediately without waiting for the winner.
//! 3.  **Work**: the backend query is submitted and its task awaited.
//! 4.  **Settle**: success commits the dataset, failure is reported to the
//!     notification sink. Either way the section ends `Loaded`; a failed load
//!     shows nothing rather than spinning forever, and is not retried.
//!
//! Callers that need the data rather than just the trigger should follow up
//! with [`StatusRegistry::wait_settled`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::registry::StatusRegistry;
use crate::core::section::{Gate, Section};
use crate::core::status::Status;
use crate::error::FetchError;
use crate::services::{
    BackendApi, DatasetStore, Notification, NotificationSink, QueryOptions, SessionSource,
    TaskMeta, TaskRunner,
};

/// Why a guarded fetch did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Module inactive or premium missing.
    Gated,
    /// Another caller's fetch is already in flight.
    InFlight,
    /// Already loaded and no refresh was requested.
    Fresh,
}

/// What a guarded fetch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Nothing happened; status untouched.
    Skipped(SkipReason),
    /// Work succeeded and the dataset was committed.
    Loaded,
    /// Work failed; the failure was reported and the section still settled.
    Failed,
}

impl FetchOutcome {
    /// `true` unless the guard skipped the call.
    pub fn ran(&self) -> bool {
        !matches!(self, FetchOutcome::Skipped(_))
    }
}

/// Everything outside the registry a fetch touches.
#[derive(Clone)]
pub struct Collaborators {
    /// Entitlement and active modules.
    pub session: Arc<dyn SessionSource>,
    /// Submits queries.
    pub backend: Arc<dyn BackendApi>,
    /// Awaits submitted tasks.
    pub runner: Arc<dyn TaskRunner>,
    /// Receives committed datasets.
    pub store: Arc<dyn DatasetStore>,
    /// Receives failure reports.
    pub sink: Arc<dyn NotificationSink>,
}

/// # Fetch Guard
///
/// See the module documentation for the guard sequence.
pub struct FetchGuard {
    registry: Arc<StatusRegistry>,
    collaborators: Collaborators,
}

impl FetchGuard {
    /// Creates a guard over `registry`.
    pub fn new(registry: Arc<StatusRegistry>, collaborators: Collaborators) -> Self {
        Self { registry, collaborators }
    }

    /// The registry this guard transitions.
    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.registry
    }

    /// The session source gates are evaluated against.
    pub fn session(&self) -> &dyn SessionSource {
        self.collaborators.session.as_ref()
    }

    /// The dataset store fetches commit to.
    pub fn store(&self) -> &Arc<dyn DatasetStore> {
        &self.collaborators.store
    }

    /// Fetches a leaf section from the backend under its own gate.
    pub async fn run(&self, section: Section, options: QueryOptions) -> FetchOutcome {
        let backend = Arc::clone(&self.collaborators.backend);
        let runner = Arc::clone(&self.collaborators.runner);
        // Nothing is submitted until the guard polls this future.
        let work = async move {
            let task_id = backend.query(section, options).await?;
            debug!(%section, %task_id, "query submitted");
            runner.await_task(task_id, TaskMeta::for_section(section)).await
        };
        self.run_with(section, section.gate(), options.refresh, work).await
    }

    /// The guard itself: gate, claim, run `work`, settle.
    ///
    /// `work` is only polled if the guard claims the section, so a skipped call
    /// issues no backend submission.
    pub async fn run_with<F>(
        &self,
        section: Section,
        gate: Gate,
        refresh: bool,
        work: F,
    ) -> FetchOutcome
    where
        F: Future<Output = Result<Value, FetchError>>,
    {
        debug_assert!(!section.is_aggregate(), "{section} is not a leaf");

        if !gate.permits(self.session()) {
            debug!(%section, "gated, skipping");
            return FetchOutcome::Skipped(SkipReason::Gated);
        }

        let Some(started) = self.registry.begin(section, refresh) else {
            let reason = if self.registry.get(section).is_loading() {
                SkipReason::InFlight
            } else {
                SkipReason::Fresh
            };
            debug!(%section, ?reason, "skipping");
            return FetchOutcome::Skipped(reason);
        };
        debug!(%section, status = ?started, "fetch started");

        let outcome = match work.await {
            Ok(value) => {
                self.collaborators.store.set_dataset(section, value);
                FetchOutcome::Loaded
            }
            Err(e) => {
                warn!(%section, error = %e, "fetch failed");
                self.report_failure(section, &e);
                FetchOutcome::Failed
            }
        };

        self.registry.set(section, Status::Loaded);
        outcome
    }

    fn report_failure(&self, section: Section, error: &FetchError) {
        self.collaborators.sink.notify(Notification {
            title: format!("{} query failed", section.label()),
            message: format!("Failed to fetch {}: {}", section.label(), error),
            display: true,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::section::Module;
    use crate::testing::Harness;

    #[tokio::test]
    async fn inactive_module_is_a_silent_no_op() {
        let h = Harness::new(true, &[]);
        let outcome = h.guard.run(Section::DefiDsrBalances, QueryOptions::default()).await;

        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::Gated));
        assert_eq!(h.registry.get(Section::DefiDsrBalances), Status::NotLoaded);
        assert_eq!(h.backend.submissions(Section::DefiDsrBalances), 0);
    }

    #[tokio::test]
    async fn history_needs_premium() {
        let h = Harness::new(false, &[Module::Aave]);
        let outcome = h.guard.run(Section::DefiAaveHistory, QueryOptions::default()).await;
        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::Gated));
        assert_eq!(h.backend.submissions(Section::DefiAaveHistory), 0);
    }

    #[tokio::test]
    async fn loaded_section_is_not_fetched_again_without_refresh() {
        let h = Harness::new(false, &[Module::Aave]);
        let section = Section::DefiAaveBalances;
        assert_eq!(h.guard.run(section, QueryOptions::default()).await, FetchOutcome::Loaded);
        assert_eq!(
            h.guard.run(section, QueryOptions::default()).await,
            FetchOutcome::Skipped(SkipReason::Fresh)
        );
        assert_eq!(h.backend.submissions(section), 1);
        assert_eq!(h.registry.get(section), Status::Loaded);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_submission() {
        let h = Harness::new(false, &[Module::Compound]);
        let section = Section::DefiCompoundBalances;
        let (a, b) = tokio::join!(
            h.guard.run(section, QueryOptions::default()),
            h.guard.run(section, QueryOptions::default()),
        );

        assert_eq!(a, FetchOutcome::Loaded);
        assert_eq!(b, FetchOutcome::Skipped(SkipReason::InFlight));
        assert_eq!(h.backend.submissions(section), 1);
    }

    #[tokio::test]
    async fn failure_still_settles_loaded_and_notifies() {
        let h = Harness::new(false, &[Module::MakerdaoVaults]);
        let section = Section::DefiMakerdaoVaults;
        h.backend.fail(section);

        assert_eq!(h.guard.run(section, QueryOptions::default()).await, FetchOutcome::Failed);
        assert_eq!(h.registry.get(section), Status::Loaded);
        assert_eq!(h.store.dataset(section), section.empty_dataset());

        let notes = h.sink.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "MakerDAO vaults query failed");
        assert!(notes[0].display);
    }

    #[tokio::test]
    async fn custom_work_is_not_polled_when_skipped() {
        let h = Harness::new(false, &[]);
        let polled = std::sync::atomic::AtomicBool::new(false);
        let outcome = h
            .guard
            .run_with(Section::DefiUniswapBalances, Section::DefiUniswapBalances.gate(), false, async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(Value::Null)
            })
            .await;

        assert_eq!(outcome, FetchOutcome::Skipped(SkipReason::Gated));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }
}
