//! Runs in its own test binary: it signals the whole test process.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use service_bootstrap::core::{ExitOutcome, ServiceRunner};
use service_bootstrap::ProcessRunner;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_supervised_service_receives_forwarded_sigterm() {
    let dir = TempDir::new().unwrap();
    let ready = dir.path().join("ready");
    let script = format!(
        r#"trap 'exit 7' TERM; touch "{}"; while :; do sleep 0.05; done"#,
        ready.display()
    );

    let runner = ProcessRunner::new("/bin/sh");
    let args = vec!["-c".to_string(), script];
    let supervisor = tokio::spawn(async move { runner.run_foreground(&args).await });

    let deadline = Instant::now() + Duration::from_secs(10);
    while !ready.exists() {
        assert!(Instant::now() < deadline, "service never installed its trap");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    kill(Pid::this(), Signal::SIGTERM).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ExitOutcome::Code(7));
}
