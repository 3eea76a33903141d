use serde::{Deserialize, Serialize};
use std::fmt;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Code(i32),
    Signaled(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    /// Shell-style exit code: signals map to `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Code(code) => *code,
            ExitOutcome::Signaled(signal) => 128 + signal,
        }
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitOutcome::Code(code),
            (None, Some(signal)) => ExitOutcome::Signaled(signal),
            (None, None) => ExitOutcome::Code(1),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "exit code {}", code),
            ExitOutcome::Signaled(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    AlreadyInitialized,
    Initialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub init: InitOutcome,
    pub exit: ExitOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForegroundMode {
    /// Spawn the service, forward signals, and propagate its exit status.
    #[default]
    Supervise,
    /// Replace the current process image with the service.
    Exec,
}

/// Which lab flavour `prepare` sets up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum PrepareMode {
    /// Open-source Salt only, no installer bundle.
    #[default]
    Oss,
    /// Installer bundle, artifact placement and database credentials.
    Enterprise,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code_from_status() {
        let exited = ExitOutcome::from(std::process::ExitStatus::from_raw(3 << 8));
        assert_eq!(exited, ExitOutcome::Code(3));
        assert!(!exited.success());

        let killed = ExitOutcome::from(std::process::ExitStatus::from_raw(15));
        assert_eq!(killed, ExitOutcome::Signaled(15));
        assert_eq!(killed.exit_code(), 143);
    }
}
