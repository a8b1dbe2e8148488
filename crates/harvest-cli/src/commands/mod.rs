//! CLI command implementations
//!
//! Each command opens the store from the environment configuration, calls
//! into the core and prints one JSON document on stdout.

pub mod changes;
pub mod detect;
pub mod register;
pub mod resume;
pub mod status;
pub mod task;
pub mod verify;

use harvest_core::{Harvest, HarvestConfig};

/// Open the core against the configured database.
pub(crate) async fn open() -> harvest_common::Result<Harvest> {
    Harvest::open(HarvestConfig::load()).await
}

/// Print a command result as pretty JSON.
pub(crate) fn emit<T: serde::Serialize>(value: &T) -> harvest_common::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
