//! # Test Doubles
//!
//! In-memory collaborators for exercising the orchestration core without a
//! backend. Compiled for this crate's own tests and, through the `testing`
//! feature, for the rest of the workspace.
//!
//! - [`FakeBackend`] is both the backend API and the task runner. It counts
//!   submissions per section, fails sections on request and can hold a
//!   section's task open until released.
//! - [`RecordingSink`] keeps every notification.
//! - [`CountingStore`] is an independent store that counts resets.
//! - [`Harness`] wires all of it to a fresh registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};

use crate::core::fetch_guard::{Collaborators, FetchGuard};
use crate::core::graph::OrchestrationGraph;
use crate::core::purge::PurgeController;
use crate::core::registry::StatusRegistry;
use crate::core::section::{Module, Section};
use crate::core::status::{Status, StatusChange};
use crate::error::FetchError;
use crate::services::{
    BackendApi, IndependentStore, InMemoryDatasetStore, Notification, NotificationSink,
    QueryOptions, SessionSettings, TaskId, TaskMeta, TaskRunner,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Backend and task runner in one, driven entirely from the test.
#[derive(Default)]
pub struct FakeBackend {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, (Section, QueryOptions)>>,
    submissions: Mutex<HashMap<Section, usize>>,
    queries: Mutex<Vec<(Section, QueryOptions)>>,
    failing: Mutex<HashSet<Section>>,
    held: Mutex<HashSet<Section>>,
    released: Notify,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dataset the fake produces for `section`.
    pub fn payload(section: Section) -> Value {
        json!({ "section": section.as_str(), "source": "fake" })
    }

    /// Makes every future task for `section` fail.
    pub fn fail(&self, section: Section) {
        lock(&self.failing).insert(section);
    }

    /// Keeps tasks for `section` pending until [`FakeBackend::release`].
    pub fn hold(&self, section: Section) {
        lock(&self.held).insert(section);
    }

    /// Lets held tasks for `section` complete.
    pub fn release(&self, section: Section) {
        lock(&self.held).remove(&section);
        self.released.notify_waiters();
    }

    /// Number of queries submitted for `section`.
    pub fn submissions(&self, section: Section) -> usize {
        lock(&self.submissions).get(&section).copied().unwrap_or(0)
    }

    /// Total queries submitted.
    pub fn total_submissions(&self) -> usize {
        lock(&self.submissions).values().sum()
    }

    /// Every query in submission order.
    pub fn queries(&self) -> Vec<(Section, QueryOptions)> {
        lock(&self.queries).clone()
    }

    fn is_held(&self, section: Section) -> bool {
        lock(&self.held).contains(&section)
    }
}

#[async_trait]
impl BackendApi for FakeBackend {
    async fn query(&self, section: Section, options: QueryOptions) -> Result<TaskId, FetchError> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.tasks).insert(id, (section, options));
        *lock(&self.submissions).entry(section).or_insert(0) += 1;
        lock(&self.queries).push((section, options));
        Ok(id)
    }
}

#[async_trait]
impl TaskRunner for FakeBackend {
    async fn await_task(&self, id: TaskId, _meta: TaskMeta) -> Result<Value, FetchError> {
        let (section, _) = lock(&self.tasks)
            .get(&id)
            .copied()
            .ok_or(FetchError::TaskNotFound(id))?;

        // Always suspend at least once, like a real task would.
        tokio::task::yield_now().await;
        loop {
            let released = self.released.notified();
            if !self.is_held(section) {
                break;
            }
            released.await;
        }

        if lock(&self.failing).contains(&section) {
            return Err(FetchError::Task(id, format!("{} exploded", section.label())));
        }
        Ok(Self::payload(section))
    }
}

/// Notification sink that remembers everything it was given.
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        lock(&self.notifications).push(notification);
    }
}

/// Independent store that only counts resets.
#[derive(Default)]
pub struct CountingStore {
    resets: AtomicUsize,
}

impl CountingStore {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl IndependentStore for CountingStore {
    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// A fully wired loader over fakes.
pub struct Harness {
    pub registry: Arc<StatusRegistry>,
    pub session: Arc<SessionSettings>,
    pub backend: Arc<FakeBackend>,
    pub store: Arc<InMemoryDatasetStore>,
    pub sink: Arc<RecordingSink>,
    pub balancer: Arc<CountingStore>,
    pub sushiswap: Arc<CountingStore>,
    pub guard: Arc<FetchGuard>,
    pub graph: OrchestrationGraph,
    pub purge: PurgeController,
}

impl Harness {
    pub fn new(premium: bool, modules: &[Module]) -> Self {
        let registry = Arc::new(StatusRegistry::new());
        let session = Arc::new(SessionSettings::new(premium, modules.iter().copied()));
        let backend = Arc::new(FakeBackend::new());
        let store = Arc::new(InMemoryDatasetStore::new());
        let sink = Arc::new(RecordingSink::default());
        let balancer = Arc::new(CountingStore::default());
        let sushiswap = Arc::new(CountingStore::default());

        let guard = Arc::new(FetchGuard::new(
            Arc::clone(&registry),
            Collaborators {
                session: session.clone(),
                backend: backend.clone(),
                runner: backend.clone(),
                store: store.clone(),
                sink: sink.clone(),
            },
        ));
        let graph = OrchestrationGraph::new(Arc::clone(&guard));
        let purge = PurgeController::new(Arc::clone(&registry), store.clone())
            .with_independent_store(Module::Balancer, balancer.clone())
            .with_independent_store(Module::Sushiswap, sushiswap.clone());

        Self {
            registry,
            session,
            backend,
            store,
            sink,
            balancer,
            sushiswap,
            guard,
            graph,
            purge,
        }
    }

    /// Every module active.
    pub fn all_modules(premium: bool) -> Self {
        Self::new(premium, &Module::ALL)
    }

    /// Yields until `section` reaches `status`, or panics after a second.
    pub async fn until_status(&self, section: Section, status: Status) {
        let mut rx = self.registry.subscribe(section);
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == status))
            .await
            .unwrap_or_else(|_| panic!("{section} never reached {status:?}"))
            .unwrap_or_else(|_| panic!("registry dropped"));
    }
}

/// Drains every change for `section` currently buffered in `feed`.
pub fn transitions_of(
    feed: &mut broadcast::Receiver<StatusChange>,
    section: Section,
) -> Vec<Status> {
    let mut seen = Vec::new();
    while let Ok(change) = feed.try_recv() {
        if change.section == section {
            if seen.is_empty() {
                seen.push(change.from);
            }
            seen.push(change.to);
        }
    }
    seen
}
