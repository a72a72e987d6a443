// Declare the modules to re-export
pub mod core;
pub mod error;
pub mod services;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export everything
pub use crate::core::*;
pub use error::FetchError;
pub use services::*;

#[cfg(feature = "retrieve")]
pub use retrieve::rest_api::RestBackend;
