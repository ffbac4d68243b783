//! CLI command handlers.

mod config;
mod control;
mod run;

pub use config::run_config;
pub use control::run_control;
pub use run::{run_manifest, RunOverrides};
