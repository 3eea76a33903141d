use crate::config::toml_config::BootstrapConfig;
use crate::core::marker::{BootstrapLock, Marker};
use crate::core::readiness::ReadinessGate;
use crate::domain::model::{InitOutcome, SequenceReport};
use crate::domain::ports::{BackgroundService, ServiceRunner};
use crate::utils::error::{BootstrapError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Commands and paths for the one-time initialization.
#[derive(Debug, Clone)]
pub struct FirstRunPlan {
    pub credential_args: Vec<String>,
    pub credentials_idempotent: bool,
    pub import_args: Vec<String>,
    pub seed_file: PathBuf,
    pub shutdown_grace: Duration,
}

impl From<&BootstrapConfig> for FirstRunPlan {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            credential_args: config.credentials.command_args(),
            credentials_idempotent: config.credentials.idempotent,
            import_args: config.import.command_args(),
            seed_file: config.import.seed_file.clone(),
            shutdown_grace: Duration::from_secs(config.shutdown.grace_period_secs),
        }
    }
}

/// Brings the service from a fresh container to a running foreground process,
/// performing the first-run initialization at most once.
pub struct BootstrapSequencer<R: ServiceRunner> {
    runner: R,
    marker: Marker,
    credentials_marker: Marker,
    lock_path: Option<PathBuf>,
    gate: ReadinessGate,
    plan: FirstRunPlan,
}

impl<R: ServiceRunner> BootstrapSequencer<R> {
    pub fn new(
        runner: R,
        marker: Marker,
        credentials_marker: Marker,
        gate: ReadinessGate,
        plan: FirstRunPlan,
    ) -> Self {
        Self {
            runner,
            marker,
            credentials_marker,
            lock_path: None,
            gate,
            plan,
        }
    }

    pub fn from_config(runner: R, config: &BootstrapConfig) -> Result<Self> {
        let sequencer = Self::new(
            runner,
            Marker::new(config.marker_path()),
            Marker::new(config.credentials_marker_path()),
            ReadinessGate::from_config(&config.readiness)?,
            FirstRunPlan::from(config),
        );

        Ok(match config.lock_path() {
            Some(path) => sequencer.with_lock(path),
            None => sequencer,
        })
    }

    pub fn with_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    /// First-run initialization when needed, then the foreground service.
    pub async fn run(&self, service_args: &[String]) -> Result<SequenceReport> {
        let init = self.initialize_if_needed(service_args).await?;

        tracing::info!("🚀 Starting service in the foreground");
        let exit = self.runner.run_foreground(service_args).await?;
        tracing::info!("Service exited with {}", exit);

        Ok(SequenceReport { init, exit })
    }

    pub async fn initialize_if_needed(&self, service_args: &[String]) -> Result<InitOutcome> {
        if self.marker.exists() {
            tracing::info!("Already initialized ({})", self.marker.path().display());
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let _lock = match &self.lock_path {
            Some(path) => {
                tracing::debug!("Acquiring bootstrap lock {}", path.display());
                Some(BootstrapLock::acquire(path).await?)
            }
            None => None,
        };

        // Another instance may have finished while we waited for the lock.
        if self.marker.exists() {
            tracing::info!("Initialized by another instance while waiting for the lock");
            return Ok(InitOutcome::AlreadyInitialized);
        }

        self.first_run(service_args).await?;
        Ok(InitOutcome::Initialized)
    }

    async fn first_run(&self, service_args: &[String]) -> Result<()> {
        tracing::info!("🔧 First run: initializing service");

        self.register_credentials().await?;

        let mut background = self.runner.spawn_background(service_args).await?;
        tracing::info!(pid = ?background.pid(), "Started provisional background instance");

        let result = self.initialize_background(background.as_mut()).await;
        let stopped = self.stop_background(background.as_mut()).await;

        // The initialization error wins over a failed shutdown.
        result?;
        stopped?;

        tracing::info!("✅ First-run initialization complete");
        Ok(())
    }

    async fn register_credentials(&self) -> Result<()> {
        if !self.plan.credentials_idempotent && self.credentials_marker.exists() {
            tracing::info!("Credentials already registered, skipping non-idempotent registration");
            return Ok(());
        }

        tracing::info!("🔑 Registering service credentials");
        let outcome = self.runner.run_command(&self.plan.credential_args, None).await?;
        if !outcome.success() {
            return Err(BootstrapError::CommandFailed {
                step: "credential registration".to_string(),
                outcome,
            });
        }

        if !self.plan.credentials_idempotent {
            self.credentials_marker
                .create()
                .map_err(|source| BootstrapError::CredentialsRecordFailed {
                    path: self.credentials_marker.path().to_path_buf(),
                    source,
                })?;
            tracing::debug!(
                "Recorded credential registration in {}",
                self.credentials_marker.path().display()
            );
        }
        Ok(())
    }

    async fn initialize_background(&self, background: &mut dyn BackgroundService) -> Result<()> {
        self.gate.wait(background).await?;

        tracing::info!("📥 Importing seed data from {}", self.plan.seed_file.display());
        let outcome = self
            .runner
            .run_command(&self.plan.import_args, Some(self.plan.seed_file.as_path()))
            .await?;
        if !outcome.success() {
            return Err(BootstrapError::CommandFailed {
                step: "import".to_string(),
                outcome,
            });
        }

        self.marker
            .create()
            .map_err(|source| BootstrapError::MarkerWriteFailed {
                path: self.marker.path().to_path_buf(),
                source,
            })?;
        tracing::info!("Wrote initialization marker {}", self.marker.path().display());
        Ok(())
    }

    async fn stop_background(&self, background: &mut dyn BackgroundService) -> Result<()> {
        tracing::info!(pid = ?background.pid(), "Stopping provisional background instance");
        let outcome = background.terminate(self.plan.shutdown_grace).await?;
        tracing::debug!("Background instance ended with {}", outcome);
        Ok(())
    }
}
