use crate::config::toml_config::{ProbeKind, ReadinessConfig};
use crate::domain::ports::{BackgroundService, ReadinessProbe};
use crate::utils::error::{BootstrapError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }

    async fn check(&self) -> Result<()> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(BootstrapError::ProbeFailed {
                message: format!("connect to {} failed: {}", self.address, e),
            }),
            Err(_) => Err(BootstrapError::ProbeFailed {
                message: format!("connect to {} timed out", self.address),
            }),
        }
    }
}

pub struct HttpProbe {
    url: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, accept_invalid_certs: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn check(&self) -> Result<()> {
        let response = self.client.get(&self.url).send().await?;
        tracing::debug!("Readiness response status: {}", response.status());

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BootstrapError::ProbeFailed {
                message: format!("{} answered {}", self.url, response.status()),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub factor: f64,
}

impl BackoffPolicy {
    /// Pause after the `attempt`-th failed probe (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_interval.as_secs_f64() * self.factor.powi(attempt as i32);
        if !scaled.is_finite() || scaled >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

impl From<&ReadinessConfig> for BackoffPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            factor: config.backoff_factor,
        }
    }
}

/// Decides when the provisional background instance may receive the import.
pub enum ReadinessGate {
    FixedDelay(Duration),
    Poll {
        probe: Box<dyn ReadinessProbe>,
        policy: BackoffPolicy,
    },
}

impl ReadinessGate {
    pub fn from_config(config: &ReadinessConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let probe: Box<dyn ReadinessProbe> = match config.probe {
            ProbeKind::Delay => return Ok(Self::FixedDelay(Duration::from_secs(config.delay_secs))),
            ProbeKind::Tcp => Box::new(TcpProbe::new(config.address.clone(), timeout)),
            ProbeKind::Http => {
                let url = config
                    .url
                    .clone()
                    .ok_or_else(|| BootstrapError::MissingConfigError {
                        field: "readiness.url".to_string(),
                    })?;
                Box::new(HttpProbe::new(url, timeout, config.accept_invalid_certs)?)
            }
        };

        Ok(Self::Poll {
            probe,
            policy: BackoffPolicy::from(config),
        })
    }

    /// Waits until the service answers, failing early when `service` exits.
    pub async fn wait(&self, service: &mut dyn BackgroundService) -> Result<()> {
        match self {
            Self::FixedDelay(delay) => {
                tracing::info!("⏳ Waiting {:?} for the service to initialize", delay);
                tokio::time::sleep(*delay).await;
                Self::ensure_running(service)
            }
            Self::Poll { probe, policy } => Self::poll(probe.as_ref(), policy, service).await,
        }
    }

    async fn poll(
        probe: &dyn ReadinessProbe,
        policy: &BackoffPolicy,
        service: &mut dyn BackgroundService,
    ) -> Result<()> {
        let started = Instant::now();
        tracing::info!(
            "⏳ Waiting for {} (up to {} attempts)",
            probe.describe(),
            policy.max_attempts
        );

        for attempt in 0..policy.max_attempts {
            Self::ensure_running(service)?;

            match probe.check().await {
                Ok(()) => {
                    tracing::info!(
                        attempts = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "✅ Service is ready"
                    );
                    return Ok(());
                }
                Err(e) => tracing::debug!(attempt = attempt + 1, "Service not ready yet: {}", e),
            }

            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }

        Err(BootstrapError::ReadinessTimeout {
            attempts: policy.max_attempts,
            elapsed: started.elapsed(),
        })
    }

    fn ensure_running(service: &mut dyn BackgroundService) -> Result<()> {
        match service.try_exit()? {
            Some(outcome) => Err(BootstrapError::BackgroundExited { outcome }),
            None => Ok(()),
        }
    }
}
