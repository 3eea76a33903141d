use httpmock::prelude::*;
use service_bootstrap::config::toml_config::BootstrapConfig;
use service_bootstrap::core::readiness::{HttpProbe, ReadinessGate};
use service_bootstrap::core::{BackgroundService, ExitOutcome, ReadinessProbe};
use service_bootstrap::{BootstrapError, Result};
use std::time::Duration;

struct IdleService;

#[async_trait::async_trait]
impl BackgroundService for IdleService {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn try_exit(&mut self) -> Result<Option<ExitOutcome>> {
        Ok(None)
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<ExitOutcome> {
        Ok(ExitOutcome::Code(0))
    }
}

#[tokio::test]
async fn test_http_probe_ready_on_success_status() {
    let server = MockServer::start();
    let version_mock = server.mock(|when, then| {
        when.method(GET).path("/version");
        then.status(200).json_body(serde_json::json!({"version": "8.16.0"}));
    });

    let probe = HttpProbe::new(server.url("/version"), Duration::from_secs(2), false).unwrap();
    assert!(probe.check().await.is_ok());
    version_mock.assert();
}

#[tokio::test]
async fn test_http_probe_not_ready_on_error_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/version");
        then.status(503);
    });

    let probe = HttpProbe::new(server.url("/version"), Duration::from_secs(2), false).unwrap();
    let err = probe.check().await.unwrap_err();
    assert!(matches!(err, BootstrapError::ProbeFailed { .. }));
}

#[tokio::test]
async fn test_http_gate_from_config_times_out() {
    let server = MockServer::start();
    let unavailable = server.mock(|when, then| {
        when.method(GET).path("/version");
        then.status(503);
    });

    let toml_content = format!(
        r#"
[readiness]
probe = "http"
url = "{}"
max_attempts = 3
initial_interval_ms = 10
max_interval_ms = 20
"#,
        server.url("/version")
    );
    let config = BootstrapConfig::from_toml_str(&toml_content).unwrap();
    let gate = ReadinessGate::from_config(&config.readiness).unwrap();

    let err = gate.wait(&mut IdleService).await.unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::ReadinessTimeout { attempts: 3, .. }
    ));
    unavailable.assert_hits(3);
}
