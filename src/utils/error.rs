use crate::domain::model::ExitOutcome;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Signal delivery failed: {0}")]
    SignalError(#[from] nix::errno::Errno),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("{step} command failed ({outcome})")]
    CommandFailed { step: String, outcome: ExitOutcome },

    #[error("Failed to start '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Service not ready after {attempts} attempts ({elapsed:?})")]
    ReadinessTimeout { attempts: u32, elapsed: Duration },

    #[error("Readiness probe failed: {message}")]
    ProbeFailed { message: String },

    #[error("Background service exited before bootstrap finished ({outcome})")]
    BackgroundExited { outcome: ExitOutcome },

    #[error("Failed to write initialization marker {path:?}: {source}")]
    MarkerWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to record credential registration {path:?}: {source}")]
    CredentialsRecordFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to terminate background service (pid {pid}): {message}")]
    TerminationFailed { pid: u32, message: String },

    #[error("Failed to acquire bootstrap lock {path:?}: {message}")]
    LockFailed { path: PathBuf, message: String },

    #[error("Installer bundle error: {message}")]
    BundleError { message: String },

    #[error("Cannot link {link:?}: {message}")]
    LinkError { link: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Process,
    Readiness,
    Filesystem,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient; the next container start is expected to succeed.
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl BootstrapError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BootstrapError::ConfigError { .. }
            | BootstrapError::ConfigValidationError { .. }
            | BootstrapError::InvalidConfigValueError { .. }
            | BootstrapError::MissingConfigError { .. }
            | BootstrapError::SerializationError(_) => ErrorCategory::Configuration,
            BootstrapError::CommandFailed { .. }
            | BootstrapError::SpawnFailed { .. }
            | BootstrapError::BackgroundExited { .. }
            | BootstrapError::TerminationFailed { .. }
            | BootstrapError::SignalError(_) => ErrorCategory::Process,
            BootstrapError::ReadinessTimeout { .. } | BootstrapError::ProbeFailed { .. } => {
                ErrorCategory::Readiness
            }
            BootstrapError::HttpError(_) => ErrorCategory::Network,
            BootstrapError::IoError(_)
            | BootstrapError::ZipError(_)
            | BootstrapError::MarkerWriteFailed { .. }
            | BootstrapError::CredentialsRecordFailed { .. }
            | BootstrapError::LockFailed { .. }
            | BootstrapError::BundleError { .. }
            | BootstrapError::LinkError { .. } => ErrorCategory::Filesystem,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BootstrapError::ReadinessTimeout { .. }
            | BootstrapError::ProbeFailed { .. }
            | BootstrapError::BackgroundExited { .. }
            | BootstrapError::CommandFailed { .. }
            | BootstrapError::HttpError(_) => ErrorSeverity::Medium,
            BootstrapError::MarkerWriteFailed { .. }
            | BootstrapError::CredentialsRecordFailed { .. }
            | BootstrapError::TerminationFailed { .. }
            | BootstrapError::LockFailed { .. }
            | BootstrapError::SignalError(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.severity() == ErrorSeverity::Medium
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BootstrapError::ConfigError { .. }
            | BootstrapError::ConfigValidationError { .. }
            | BootstrapError::InvalidConfigValueError { .. }
            | BootstrapError::MissingConfigError { .. }
            | BootstrapError::SerializationError(_) => {
                "Check the bootstrap configuration file and the environment variables it references"
            }
            BootstrapError::CommandFailed { .. } => {
                "Inspect the service output above; the first-run sequence is retried on the next start"
            }
            BootstrapError::SpawnFailed { .. } => {
                "Make sure the service binary is installed and on PATH"
            }
            BootstrapError::ReadinessTimeout { .. } | BootstrapError::ProbeFailed { .. } => {
                "Raise readiness.max_attempts or check that the probe address matches the service listener"
            }
            BootstrapError::BackgroundExited { .. } => {
                "The service crashed during initialization; check its logs and database connectivity"
            }
            BootstrapError::MarkerWriteFailed { .. } | BootstrapError::CredentialsRecordFailed { .. } => {
                "Make sure the service configuration directory is writable and backed by a persistent volume"
            }
            BootstrapError::TerminationFailed { .. } | BootstrapError::SignalError(_) => {
                "A stray service process may still be running; restart the container"
            }
            BootstrapError::LockFailed { .. } => {
                "Check permissions on the configuration directory or disable [lock]"
            }
            BootstrapError::HttpError(_) => "Check the readiness URL and TLS settings",
            BootstrapError::ZipError(_) | BootstrapError::BundleError { .. } => {
                "Re-download the installer bundle and try again"
            }
            BootstrapError::LinkError { .. } => {
                "Make sure the compose files and master config directories exist under the preparation root"
            }
            BootstrapError::IoError(_) => "Check file permissions and free disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BootstrapError::CommandFailed { step, outcome } => {
                format!("The {} step failed ({})", step, outcome)
            }
            BootstrapError::ReadinessTimeout { attempts, elapsed } => format!(
                "The service did not become ready after {} checks over {:.0?}",
                attempts, elapsed
            ),
            BootstrapError::SpawnFailed { program, .. } => {
                format!("Could not start '{}'", program)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
