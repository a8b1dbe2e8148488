//! Harvest common library
//!
//! Shared types, canonical hashing, error handling and logging for the
//! harvest workspace:
//!
//! - **Error handling**: the fetch-level and system-level error taxonomies
//! - **Canonical hashing**: deterministic content digests for integrity and
//!   change detection
//! - **Types**: source, record, fingerprint, snapshot and change-event types
//! - **Logging**: tracing bootstrap shared by the core and the CLI

pub mod canonical;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{FetchError, HarvestError, Result};
