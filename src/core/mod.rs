pub mod marker;
pub mod prepare;
pub mod readiness;
pub mod reset;
pub mod sequencer;

pub use crate::domain::model::{ExitOutcome, InitOutcome, SequenceReport};
pub use crate::domain::ports::{BackgroundService, ReadinessProbe, ServiceRunner};
pub use crate::utils::error::Result;
