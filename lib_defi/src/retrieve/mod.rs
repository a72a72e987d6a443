//! # Data Retrieval Module
//!
//! The HTTP side of the loader. The orchestration core only knows the
//! [`BackendApi`](crate::services::BackendApi) and
//! [`TaskRunner`](crate::services::TaskRunner) traits; this module implements
//! both against a backend that answers every DeFi query with a task id and
//! reports task outcomes on a separate endpoint.
//!
//! ## Contained Modules:
//!
//! - **`rest_api`**: [`RestBackend`](rest_api::RestBackend), built on
//!   `reqwest` and `reqwest-middleware` with exponential backoff retries for
//!   transient transport failures. Polls submitted tasks until they complete
//!   or time out.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Task-based REST client for the DeFi backend.
pub mod rest_api;
