//! # Orchestration Core
//!
//! The status-gated fetch orchestration for DeFi datasets. Everything else in
//! the crate (the REST adapter, the in-memory stores) is plumbing around the
//! components declared here.
//!
//! ## Core Components:
//!
//! - **`section`**: The closed set of loadable sections, the protocol modules
//!   that own them and the gate each section is fetched behind.
//!
//! - **`status`**: The load lifecycle of a section and the change events
//!   emitted on every effective transition.
//!
//! - **`registry`**: Per-section status with atomic compare-and-set, awaitable
//!   settlement and a change feed.
//!
//! - **`fetch_guard`**: Decides whether a leaf fetch proceeds and always
//!   settles it, turning failures into notifications.
//!
//! - **`graph`**: Fans leaf fetches out under aggregate sections and derives the
//!   aggregate's status from their completion.
//!
//! - **`purge`**: Drops the datasets and statuses of disabled modules.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Sections, modules and gates.
pub mod section;
/// Load status and status change events.
pub mod status;
/// Keyed, awaitable status storage.
pub mod registry;
/// The per-leaf dedup and freshness guard.
pub mod fetch_guard;
/// Aggregate composition over static dependency edges.
pub mod graph;
/// Module-indexed teardown.
pub mod purge;

// --- Public API Re-exports ---
pub use fetch_guard::{Collaborators, FetchGuard, FetchOutcome, SkipReason};
pub use graph::{dependencies, Dependencies, OrchestrationGraph};
pub use purge::{purge_target, PurgeController, PurgeReport, PurgeTarget};
pub use registry::StatusRegistry;
pub use section::{Gate, Module, ModuleSelector, ParseNameError, Section};
pub use status::{Status, StatusChange};
