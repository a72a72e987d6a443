//! # Status Registry
//!
//! Holds the load status of every [`Section`]. Each section owns its own
//! `watch` channel, so a write to one key is atomic, never blocks readers of
//! another key, and can be awaited by tasks that need to know when an in-flight
//! fetch has settled. Every effective transition is also published on a
//! broadcast channel so observers (UIs, tests) see the full sequence rather
//! than only the latest value.
//!
//! The key set is fixed at construction: every section starts `NotLoaded` and
//! no entry is ever removed.

use std::collections::BTreeMap;

use tokio::sync::{broadcast, watch};

use crate::core::section::Section;
use crate::core::status::{Status, StatusChange};

/// Capacity of the change feed. Lagging observers lose the oldest events.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// Load status of every section, shared between the guard, the graph and
/// the purge controller.
pub struct StatusRegistry {
    // Indexed by `Section::index`
    entries: Vec<watch::Sender<Status>>,
    changes: broadcast::Sender<StatusChange>,
}

impl StatusRegistry {
    /// Creates a registry with every section `NotLoaded`.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: Section::ALL
                .iter()
                .map(|_| watch::Sender::new(Status::NotLoaded))
                .collect(),
            changes,
        }
    }

    fn entry(&self, section: Section) -> &watch::Sender<Status> {
        &self.entries[section.index()]
    }

    /// Current status of `section`.
    pub fn get(&self, section: Section) -> Status {
        *self.entry(section).borrow()
    }

    /// Overwrites the status of `section`.
    pub fn set(&self, section: Section, status: Status) {
        debug_assert!(
            section.is_aggregate() || status != Status::PartiallyLoaded,
            "{section} is a leaf and cannot be partially loaded"
        );
        self.transition(section, |_| Some(status));
    }

    /// Atomically applies the fetch guard's start rule to `section`.
    ///
    /// Returns the status that was written (`Loading` or `Refreshing`) when the
    /// caller has won the right to fetch, or `None` when something is already
    /// in flight or the section is loaded and `refresh` is false.
    pub fn begin(&self, section: Section, refresh: bool) -> Option<Status> {
        self.transition(section, |current| {
            current
                .should_start(refresh)
                .then(|| current.started(refresh))
        })
    }

    /// Writes `status` unless a fetch for `section` is in flight. Returns
    /// whether the write happened.
    pub fn claim(&self, section: Section, status: Status) -> bool {
        self.transition(section, |current| (!current.is_loading()).then_some(status))
            .is_some()
    }

    /// Runs `clear` and resets `section` to `NotLoaded`, unless a fetch for it
    /// is in flight, in which case nothing happens and `false` is returned.
    ///
    /// `clear` runs while the entry is locked, so no fetch can start between
    /// the idle check and the reset.
    pub fn reset_if_idle(&self, section: Section, clear: impl FnOnce()) -> bool {
        self.transition(section, |current| {
            if current.is_loading() {
                None
            } else {
                clear();
                Some(Status::NotLoaded)
            }
        })
        .is_some()
    }

    /// Suspends until `section` is neither loading nor refreshing and returns
    /// the settled status. Returns immediately when nothing is in flight.
    pub async fn wait_settled(&self, section: Section) -> Status {
        let mut rx = self.entry(section).subscribe();
        // Bound to a local so the borrow of `rx` ends before `rx` is dropped.
        let settled = match rx.wait_for(|status| !status.is_loading()).await {
            Ok(status) => *status,
            // The sender lives in `self`; unreachable while we hold `&self`.
            Err(_) => self.get(section),
        };
        settled
    }

    /// A receiver for the latest status of one section.
    pub fn subscribe(&self, section: Section) -> watch::Receiver<Status> {
        self.entry(section).subscribe()
    }

    /// The feed of every effective transition, across all sections.
    pub fn changes(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Point-in-time copy of every status. Not a consistent cut across keys.
    pub fn snapshot(&self) -> BTreeMap<Section, Status> {
        Section::ALL.into_iter().map(|s| (s, self.get(s))).collect()
    }

    // Applies `decide` to the current value under the entry's lock. Only a
    // changed value notifies watchers and lands on the change feed.
    fn transition(
        &self,
        section: Section,
        decide: impl FnOnce(Status) -> Option<Status>,
    ) -> Option<Status> {
        let mut written = None;
        self.entry(section).send_if_modified(|current| {
            let from = *current;
            let Some(to) = decide(from) else {
                return false;
            };
            *current = to;
            written = Some(to);
            if from == to {
                return false;
            }
            // No receivers is fine; the feed is best effort.
            let _ = self.changes.send(StatusChange { section, from, to });
            true
        });
        written
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
