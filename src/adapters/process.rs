use crate::config::toml_config::BootstrapConfig;
use crate::domain::model::{ExitOutcome, ForegroundMode};
use crate::domain::ports::{BackgroundService, ServiceRunner};
use crate::utils::error::{BootstrapError, Result};
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal as unix_signal, SignalKind};

/// Signals relayed from the sequencer to the supervised foreground service.
fn forwarded_signals() -> [(SignalKind, Signal); 6] {
    [
        (SignalKind::terminate(), Signal::SIGTERM),
        (SignalKind::interrupt(), Signal::SIGINT),
        (SignalKind::hangup(), Signal::SIGHUP),
        (SignalKind::quit(), Signal::SIGQUIT),
        (SignalKind::user_defined1(), Signal::SIGUSR1),
        (SignalKind::user_defined2(), Signal::SIGUSR2),
    ]
}

/// Runs the real service binary as child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    binary: PathBuf,
    foreground_mode: ForegroundMode,
    sweep_by_name: bool,
}

impl ProcessRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            foreground_mode: ForegroundMode::Supervise,
            sweep_by_name: false,
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::new(&config.service.binary)
            .with_foreground_mode(config.foreground.mode)
            .with_sweep_by_name(config.shutdown.sweep_by_name)
    }

    pub fn with_foreground_mode(mut self, mode: ForegroundMode) -> Self {
        self.foreground_mode = mode;
        self
    }

    pub fn with_sweep_by_name(mut self, enabled: bool) -> Self {
        self.sweep_by_name = enabled;
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command
    }

    fn spawn_failed(&self, source: std::io::Error) -> BootstrapError {
        BootstrapError::SpawnFailed {
            program: self.binary.display().to_string(),
            source,
        }
    }

    fn binary_name(&self) -> Option<String> {
        self.binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    async fn supervise(&self, args: &[String]) -> Result<ExitOutcome> {
        // Handlers are in place before the child exists.
        let mut relay = SignalRelay::install()?;

        let mut child = self
            .command(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.spawn_failed(e))?;

        let pid = child.id();
        tracing::debug!(pid = ?pid, "Supervising foreground service");

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                Some(forwarded) = relay.received.recv() => {
                    if let Some(pid) = pid {
                        tracing::info!(pid, signal = ?forwarded, "Forwarding signal to service");
                        if let Err(e) = send_signal(pid, forwarded) {
                            tracing::warn!(pid, signal = ?forwarded, "Signal forwarding failed: {}", e);
                        }
                    }
                }
            }
        };

        Ok(ExitOutcome::from(status))
    }

    fn exec(&self, args: &[String]) -> Result<ExitOutcome> {
        use std::os::unix::process::CommandExt;

        tracing::debug!("Replacing process image with {}", self.binary.display());
        let error = std::process::Command::new(&self.binary).args(args).exec();
        Err(self.spawn_failed(error))
    }
}

/// Collects the forwarded signals this process receives. Listeners stop on drop.
struct SignalRelay {
    listeners: Vec<tokio::task::JoinHandle<()>>,
    received: tokio::sync::mpsc::UnboundedReceiver<Signal>,
}

impl SignalRelay {
    fn install() -> Result<Self> {
        let (relay_tx, received) = tokio::sync::mpsc::unbounded_channel::<Signal>();
        let mut relay = Self {
            listeners: Vec::new(),
            received,
        };

        for (kind, forwarded) in forwarded_signals() {
            let mut stream = unix_signal(kind)?;
            let tx = relay_tx.clone();
            relay.listeners.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(forwarded).is_err() {
                        break;
                    }
                }
            }));
        }

        Ok(relay)
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

/// Delivers `signal`; a process that is already gone counts as delivered.
fn send_signal(pid: u32, signal: Signal) -> Result<bool> {
    match signal::kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Signals every process named `name` except this one, like `pkill`.
fn sweep_processes_named(name: &str) -> usize {
    use sysinfo::{ProcessesToUpdate, System};

    let own_pid = sysinfo::get_current_pid().ok();
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut signalled = 0;
    for process in system.processes_by_exact_name(std::ffi::OsStr::new(name)) {
        if Some(process.pid()) == own_pid {
            continue;
        }
        if process.kill_with(sysinfo::Signal::Term).unwrap_or(false) {
            tracing::debug!(pid = %process.pid(), "Signalled leftover '{}' process", name);
            signalled += 1;
        }
    }
    signalled
}

#[async_trait]
impl ServiceRunner for ProcessRunner {
    async fn run_command(&self, args: &[String], stdin: Option<&Path>) -> Result<ExitOutcome> {
        let mut command = self.command(args);
        command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        match stdin {
            Some(path) => command.stdin(Stdio::from(std::fs::File::open(path)?)),
            None => command.stdin(Stdio::null()),
        };

        tracing::debug!("Running {} {}", self.binary.display(), args.join(" "));
        let status = command
            .spawn()
            .map_err(|e| self.spawn_failed(e))?
            .wait()
            .await?;

        Ok(ExitOutcome::from(status))
    }

    async fn spawn_background(&self, args: &[String]) -> Result<Box<dyn BackgroundService>> {
        let child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_failed(e))?;

        let sweep_name = if self.sweep_by_name {
            self.binary_name()
        } else {
            None
        };

        Ok(Box::new(ChildService {
            pid: child.id(),
            child,
            sweep_name,
        }))
    }

    async fn run_foreground(&self, args: &[String]) -> Result<ExitOutcome> {
        match self.foreground_mode {
            ForegroundMode::Supervise => self.supervise(args).await,
            ForegroundMode::Exec => self.exec(args),
        }
    }
}

pub struct ChildService {
    child: Child,
    pid: Option<u32>,
    sweep_name: Option<String>,
}

#[async_trait]
impl BackgroundService for ChildService {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit(&mut self) -> Result<Option<ExitOutcome>> {
        Ok(self.child.try_wait()?.map(ExitOutcome::from))
    }

    async fn terminate(&mut self, grace: Duration) -> Result<ExitOutcome> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(ExitOutcome::from(status));
        }

        let pid = self.pid.ok_or_else(|| BootstrapError::TerminationFailed {
            pid: 0,
            message: "background process has no pid".to_string(),
        })?;

        send_signal(pid, Signal::SIGTERM)?;

        let status = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(pid, "Service ignored SIGTERM for {:?}, killing", grace);
                self.child
                    .kill()
                    .await
                    .map_err(|e| BootstrapError::TerminationFailed {
                        pid,
                        message: e.to_string(),
                    })?;
                self.child.wait().await?
            }
        };

        if let Some(name) = &self.sweep_name {
            let swept = sweep_processes_named(name);
            if swept > 0 {
                tracing::info!("Signalled {} leftover '{}' processes", swept, name);
            }
        }

        Ok(ExitOutcome::from(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> ProcessRunner {
        ProcessRunner::new("/bin/sh")
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_command_reports_exit_code() {
        let outcome = sh().run_command(&args(&["-c", "exit 7"]), None).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Code(7));
    }

    #[tokio::test]
    async fn test_run_command_feeds_stdin_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let seed = dir.path().join("seed.raas");
        std::fs::write(&seed, "expected-payload").unwrap();

        let script = r#"read line; [ "$line" = "expected-payload" ]"#;
        let outcome = sh()
            .run_command(&args(&["-c", script]), Some(seed.as_path()))
            .await
            .unwrap();
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let runner = ProcessRunner::new("/nonexistent/service-binary");
        let err = runner.run_command(&[], None).await.unwrap_err();
        assert!(matches!(err, BootstrapError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_background_terminates_with_sigterm() {
        let mut service = sh()
            .spawn_background(&args(&["-c", "sleep 30"]))
            .await
            .unwrap();
        assert!(service.pid().is_some());
        assert!(service.try_exit().unwrap().is_none());

        let outcome = service.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Signaled(15));
    }

    #[tokio::test]
    async fn test_background_escalates_to_kill() {
        let mut service = sh()
            .spawn_background(&args(&["-c", "trap '' TERM; sleep 30 & wait"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = service.terminate(Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Signaled(9));
    }

    #[tokio::test]
    async fn test_exec_mode_reports_missing_binary() {
        let runner = ProcessRunner::new("/nonexistent/service-binary")
            .with_foreground_mode(ForegroundMode::Exec);
        let err = runner.run_foreground(&args(&["serve"])).await.unwrap_err();
        assert!(matches!(err, BootstrapError::SpawnFailed { ref program, .. } if program == "/nonexistent/service-binary"));
    }

    #[tokio::test]
    async fn test_supervise_reports_missing_binary() {
        let runner = ProcessRunner::new("/nonexistent/service-binary");
        let err = runner.run_foreground(&[]).await.unwrap_err();
        assert!(matches!(err, BootstrapError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_supervised_foreground_propagates_exit_code() {
        let outcome = sh()
            .run_foreground(&args(&["-c", "exit 42"]))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), 42);
    }
}
