//! Load status of a section and the change events the registry publishes.

use serde::{Deserialize, Serialize};

use crate::core::section::Section;

/// # Status
///
/// Where a section is in its load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Initial state, and the state a purge returns a leaf to.
    #[default]
    NotLoaded,
    /// First fetch in progress.
    Loading,
    /// Re-fetch in progress after a completed load.
    Refreshing,
    /// Aggregates only: some, but not all, subsumed leaves have completed.
    PartiallyLoaded,
    /// Done until the next refresh.
    Loaded,
}

impl Status {
    /// `true` while a fetch is in flight. An aggregate sitting at
    /// `PartiallyLoaded` is still mid fan-out, so it counts too.
    pub fn is_loading(&self) -> bool {
        matches!(self, Status::Loading | Status::Refreshing | Status::PartiallyLoaded)
    }

    /// The status a fetch should announce when it starts from `self`.
    pub fn started(&self, refresh: bool) -> Status {
        if refresh && *self == Status::Loaded {
            Status::Refreshing
        } else {
            Status::Loading
        }
    }

    /// The freshness rule shared by leaves and aggregates: nothing in flight,
    /// and either not loaded yet or an explicit refresh.
    pub fn should_start(&self, refresh: bool) -> bool {
        !self.is_loading() && (*self != Status::Loaded || refresh)
    }
}

/// One effective status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    /// The section that changed.
    pub section: Section,
    /// Status before the write.
    pub from: Status,
    /// Status after the write.
    pub to: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_only_announces_refreshing_after_a_load() {
        assert_eq!(Status::Loaded.started(true), Status::Refreshing);
        assert_eq!(Status::Loaded.started(false), Status::Loading);
        assert_eq!(Status::NotLoaded.started(true), Status::Loading);
    }

    #[test]
    fn freshness_rule() {
        assert!(Status::NotLoaded.should_start(false));
        assert!(!Status::Loaded.should_start(false));
        assert!(Status::Loaded.should_start(true));
        assert!(!Status::Loading.should_start(true));
        assert!(!Status::Refreshing.should_start(true));
        assert!(!Status::PartiallyLoaded.should_start(true));
    }
}
