use crate::domain::model::ExitOutcome;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Invokes the service binary. `args` never include the binary itself.
#[async_trait]
pub trait ServiceRunner: Send + Sync {
    /// Runs a subcommand to completion, feeding `stdin` from a file when given.
    async fn run_command(&self, args: &[String], stdin: Option<&Path>) -> Result<ExitOutcome>;

    async fn spawn_background(&self, args: &[String]) -> Result<Box<dyn BackgroundService>>;

    async fn run_foreground(&self, args: &[String]) -> Result<ExitOutcome>;
}

/// A provisional service instance started during the first run.
#[async_trait]
pub trait BackgroundService: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> Result<Option<ExitOutcome>>;

    /// Asks the instance to stop, escalating to a hard kill after `grace`.
    async fn terminate(&mut self, grace: Duration) -> Result<ExitOutcome>;
}

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    fn describe(&self) -> String;

    /// `Ok(())` once the service answers.
    async fn check(&self) -> Result<()>;
}
