pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::{CliConfig, Command};

pub use adapters::process::ProcessRunner;
pub use config::toml_config::BootstrapConfig;
pub use core::{marker::Marker, prepare::LabPreparer, sequencer::BootstrapSequencer};
pub use utils::error::{BootstrapError, Result};
