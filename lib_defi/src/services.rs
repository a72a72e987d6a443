//! # Collaborator Interfaces
//!
//! The orchestration core talks to the outside world only through the traits
//! in this module: a backend that accepts queries and hands back task ids, a
//! task runner that awaits those ids, a dataset store, a notification sink,
//! the session (entitlement and active modules) and the independent stores of
//! protocols that keep their own state.
//!
//! Simple in-process implementations live here as well: [`SessionSettings`],
//! [`InMemoryDatasetStore`] and [`LogSink`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::section::{Module, Section};
use crate::error::FetchError;

/// Identifier of one unit of backend work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-query flags forwarded to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Re-fetch despite a completed load.
    pub refresh: bool,
    /// Ask the backend to drop its own cached history before querying.
    /// Only history sections honour it.
    pub reset: bool,
}

impl QueryOptions {
    /// Plain load, or refresh when `refresh` is set.
    pub fn refresh(refresh: bool) -> Self {
        Self { refresh, reset: false }
    }
}

/// Metadata attached to a task while it is awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMeta {
    /// The section whose dataset the task produces.
    pub section: Section,
    /// Display title of the task.
    pub title: String,
}

impl TaskMeta {
    /// Metadata for the task fetching `section`.
    pub fn for_section(section: Section) -> Self {
        Self { section, title: format!("Fetching {}", section.label()) }
    }
}

/// # Backend API
///
/// Exposes one query per leaf section. A query only submits work; the data
/// arrives through the [`TaskRunner`].
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Submits the query producing `section`'s dataset.
    async fn query(&self, section: Section, options: QueryOptions) -> Result<TaskId, FetchError>;
}

/// # Task Runner
///
/// Suspends until a submitted task completes. Timeouts are the runner's
/// business and surface as ordinary errors.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Awaits the outcome of task `id`.
    async fn await_task(&self, id: TaskId, meta: TaskMeta) -> Result<Value, FetchError>;
}

/// # Dataset Store
///
/// Where completed fetches are committed.
pub trait DatasetStore: Send + Sync {
    /// Replaces the dataset of `section`.
    fn set_dataset(&self, section: Section, value: Value);
    /// The current dataset of `section`, or its empty default.
    fn dataset(&self, section: Section) -> Value;
}

/// A user-facing message about a failed fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Short title.
    pub title: String,
    /// Full description, including the error.
    pub message: String,
    /// Whether the message should be shown immediately.
    pub display: bool,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

/// # Notification Sink
///
/// Purely observational; never influences control flow.
pub trait NotificationSink: Send + Sync {
    /// Records one notification.
    fn notify(&self, notification: Notification);
}

/// # Session Source
///
/// Read on every gate evaluation, never cached, so toggling a module takes
/// effect on the next call.
pub trait SessionSource: Send + Sync {
    /// Whether the user has premium entitlement.
    fn premium(&self) -> bool;
    /// Whether `module` is currently enabled.
    fn is_active(&self, module: Module) -> bool;
}

/// # Independent Store
///
/// A protocol integration that keeps its state outside the shared registry.
/// Purging its module resets it wholesale.
pub trait IndependentStore: Send + Sync {
    /// Drops every cached dataset and status the store owns.
    fn reset(&self);
}

/// # Session Settings
///
/// In-process [`SessionSource`] whose values can change at runtime.
#[derive(Debug, Default)]
pub struct SessionSettings {
    inner: RwLock<SessionState>,
}

/// Serializable view of [`SessionSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Premium entitlement.
    #[serde(default)]
    pub premium: bool,
    /// Enabled protocol modules.
    #[serde(default)]
    pub active_modules: BTreeSet<Module>,
}

impl SessionSettings {
    /// Creates a session with the given entitlement and modules.
    pub fn new(premium: bool, active_modules: impl IntoIterator<Item = Module>) -> Self {
        Self::from_state(SessionState {
            premium,
            active_modules: active_modules.into_iter().collect(),
        })
    }

    /// Creates a session from a deserialized state.
    pub fn from_state(state: SessionState) -> Self {
        Self { inner: RwLock::new(state) }
    }

    /// Copy of the current state.
    pub fn state(&self) -> SessionState {
        self.read().clone()
    }

    /// Grants or revokes premium.
    pub fn set_premium(&self, premium: bool) {
        self.write().premium = premium;
    }

    /// Enables or disables one module.
    pub fn set_active(&self, module: Module, active: bool) {
        let mut state = self.write();
        if active {
            state.active_modules.insert(module);
        } else {
            state.active_modules.remove(&module);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        // A poisoned lock still holds a usable plain-data state.
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionSource for SessionSettings {
    fn premium(&self) -> bool {
        self.read().premium
    }

    fn is_active(&self, module: Module) -> bool {
        self.read().active_modules.contains(&module)
    }
}

/// Dataset store backed by a map. Sections never written read as their
/// empty default.
#[derive(Debug, Default)]
pub struct InMemoryDatasetStore {
    datasets: RwLock<HashMap<Section, Value>>,
}

impl InMemoryDatasetStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every leaf dataset, defaults included.
    pub fn dump(&self) -> serde_json::Map<String, Value> {
        Section::leaves()
            .map(|section| (section.as_str().to_string(), self.dataset(section)))
            .collect()
    }
}

impl DatasetStore for InMemoryDatasetStore {
    fn set_dataset(&self, section: Section, value: Value) {
        self.datasets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(section, value);
    }

    fn dataset(&self, section: Section) -> Value {
        self.datasets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&section)
            .cloned()
            .unwrap_or_else(|| section.empty_dataset())
    }
}

/// Notification sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        tracing::error!(title = %notification.title, "{}", notification.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_changes_are_visible_immediately() {
        let session = SessionSettings::new(false, [Module::MakerdaoDsr]);
        assert!(session.is_active(Module::MakerdaoDsr));
        session.set_active(Module::MakerdaoDsr, false);
        assert!(!session.is_active(Module::MakerdaoDsr));
        session.set_active(Module::Liquity, true);
        assert!(session.is_active(Module::Liquity));
    }

    #[test]
    fn session_state_reads_backend_module_names() {
        let state: SessionState = serde_json::from_str(
            r#"{ "premium": true, "active_modules": ["aave", "yearn_vaults_v2"] }"#,
        )
        .unwrap();
        assert!(state.premium);
        assert!(state.active_modules.contains(&Module::YearnV2));
    }

    #[test]
    fn unwritten_datasets_read_as_defaults() {
        let store = InMemoryDatasetStore::new();
        assert_eq!(store.dataset(Section::DefiMakerdaoVaults), serde_json::json!([]));
        store.set_dataset(Section::DefiMakerdaoVaults, serde_json::json!([{ "id": 1 }]));
        assert_eq!(store.dataset(Section::DefiMakerdaoVaults), serde_json::json!([{ "id": 1 }]));
        assert_eq!(store.dump().len(), Section::leaves().count());
    }
}
