use crate::domain::model::{ForegroundMode, PrepareMode};
use crate::utils::error::{BootstrapError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/service-bootstrap.toml";
pub const CREDENTIALS_MARKER_FILE: &str = ".credentials-registered";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub service: ServiceConfig,
    pub credentials: CredentialsConfig,
    pub import: ImportConfig,
    pub readiness: ReadinessConfig,
    pub shutdown: ShutdownConfig,
    pub foreground: ForegroundConfig,
    pub lock: LockConfig,
    pub prepare: PrepareConfig,
    pub reset: ResetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub binary: String,
    pub config_dir: PathBuf,
    pub marker_file: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            binary: "raas".to_string(),
            config_dir: PathBuf::from("/etc/raas"),
            marker_file: "initialized".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub name: String,
    /// JSON object handed to the service verbatim.
    pub payload: String,
}

impl CredentialEntry {
    fn new(name: &str, payload: &str) -> Self {
        Self {
            name: name.to_string(),
            payload: payload.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub subcommand: String,
    /// Whether re-running the registration on a retried first run is safe.
    pub idempotent: bool,
    /// Passed to the service in declaration order.
    pub entries: Vec<CredentialEntry>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            subcommand: "save_creds".to_string(),
            idempotent: true,
            entries: vec![
                CredentialEntry::new(
                    "postgres",
                    r#"{"username":"salteapi","password":"abc123"}"#,
                ),
                CredentialEntry::new("redis", r#"{"password":"def456"}"#),
            ],
        }
    }
}

impl CredentialsConfig {
    /// `save_creds postgres={...} redis={...}`
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand.clone()];
        args.extend(
            self.entries
                .iter()
                .map(|entry| format!("{}={}", entry.name, entry.payload)),
        );
        args
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub subcommand: String,
    pub args: Vec<String>,
    pub seed_file: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            subcommand: "dump".to_string(),
            args: [
                "--insecure",
                "--server",
                "https://localhost",
                "--auth",
                "root:salt",
                "--mode",
                "import",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            seed_file: PathBuf::from("/sample-resource-types.raas"),
        }
    }
}

impl ImportConfig {
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand.clone()];
        args.extend(self.args.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp,
    Http,
    /// Fixed sleep, no verification.
    Delay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub probe: ProbeKind,
    pub address: String,
    pub url: Option<String>,
    pub accept_invalid_certs: bool,
    pub delay_secs: u64,
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    pub request_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe: ProbeKind::Tcp,
            address: "127.0.0.1:443".to_string(),
            url: None,
            accept_invalid_certs: true,
            delay_secs: 60,
            max_attempts: 30,
            initial_interval_ms: 1000,
            max_interval_ms: 10_000,
            backoff_factor: 2.0,
            request_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_secs: u64,
    /// Also signal leftover processes named like the service binary.
    pub sweep_by_name: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
            sweep_by_name: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForegroundConfig {
    pub mode: ForegroundMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub enabled: bool,
    pub file: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: ".bootstrap.lock".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Where a lab link points in each mode, relative to the preparation root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTargets {
    pub oss: PathBuf,
    pub enterprise: PathBuf,
}

impl LinkTargets {
    pub fn for_mode(&self, mode: PrepareMode) -> &Path {
        match mode {
            PrepareMode::Oss => &self.oss,
            PrepareMode::Enterprise => &self.enterprise,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    pub mode: PrepareMode,
    /// Looked up in the preparation root when no bundle is given.
    pub bundle_pattern: String,
    pub build_dir: PathBuf,
    pub env_file: PathBuf,
    pub artifacts: Vec<ArtifactConfig>,
    /// Variable name -> `dir/pattern*` relative to the build dir.
    pub discover: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    /// Written in enterprise mode only. `${VAR}` is resolved at prepare time.
    pub credentials: BTreeMap<String, String>,
    /// Link path -> per-mode target, both relative to the preparation root.
    pub links: BTreeMap<String, LinkTargets>,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        let artifacts = vec![
            ArtifactConfig {
                from: PathBuf::from("sse-installer/salt/sse/eapi_service"),
                to: PathBuf::from("raas/eapi_service"),
            },
            ArtifactConfig {
                from: PathBuf::from("sse-installer/salt/sse/eapi_plugin"),
                to: PathBuf::from("salt-master/eapi_plugin"),
            },
        ];

        let mut discover = BTreeMap::new();
        discover.insert(
            "RAAS_RPM_NAME".to_string(),
            "raas/eapi_service/files/raas*.rpm".to_string(),
        );
        discover.insert(
            "MASTER_PLUGIN_NAME".to_string(),
            "salt-master/eapi_plugin/files/SSEAPE*.whl".to_string(),
        );

        let mut env = BTreeMap::new();
        env.insert("SALT_VERSION".to_string(), "3006.9".to_string());

        let mut credentials = BTreeMap::new();
        credentials.insert("POSTGRES_USER".to_string(), "salteapi".to_string());
        credentials.insert("POSTGRES_PASS".to_string(), "${POSTGRES_PASS}".to_string());
        credentials.insert("REDIS_PASSWORD".to_string(), "${REDIS_PASSWORD}".to_string());

        let mut links = BTreeMap::new();
        links.insert(
            "compose.yaml".to_string(),
            LinkTargets {
                oss: PathBuf::from("oss-compose.yaml"),
                enterprise: PathBuf::from("aria-compose.yaml"),
            },
        );
        links.insert(
            "data/master.d".to_string(),
            LinkTargets {
                oss: PathBuf::from("data/oss-master"),
                enterprise: PathBuf::from("data/ent-master"),
            },
        );

        Self {
            mode: PrepareMode::Oss,
            bundle_pattern: "vRA_SaltStack_Config*.tar.gz".to_string(),
            build_dir: PathBuf::from("build"),
            env_file: PathBuf::from(".env"),
            artifacts,
            discover,
            env,
            credentials,
            links,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Service state removed by `reset`; relative paths resolve against the reset root.
    pub paths: Vec<PathBuf>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            paths: [
                "data/postgres",
                "data/raas/pki",
                "data/master/pki",
                "data/redis",
                "data/raas/raas.secconf",
                "data/raas/initialized",
                "data/redis/redis.conf",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

impl BootstrapConfig {
    /// Loads `path`, or the default location when none is given.
    /// A missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => {
                tracing::debug!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
                Ok(Self::default())
            }
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BootstrapError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BootstrapError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay literal.
    pub(crate) fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| BootstrapError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn marker_path(&self) -> PathBuf {
        self.service.config_dir.join(&self.service.marker_file)
    }

    pub fn credentials_marker_path(&self) -> PathBuf {
        self.service.config_dir.join(CREDENTIALS_MARKER_FILE)
    }

    pub fn lock_path(&self) -> Option<PathBuf> {
        self.lock
            .enabled
            .then(|| self.service.config_dir.join(&self.lock.file))
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("service.binary", &self.service.binary)?;
        validation::validate_path(
            "service.config_dir",
            &self.service.config_dir.to_string_lossy(),
        )?;
        validation::validate_file_name("service.marker_file", &self.service.marker_file)?;

        validation::validate_non_empty_string("credentials.subcommand", &self.credentials.subcommand)?;
        let mut seen = HashSet::new();
        for CredentialEntry { name, payload } in &self.credentials.entries {
            if name.trim().is_empty() || name.contains('=') {
                return Err(BootstrapError::InvalidConfigValueError {
                    field: "credentials.entries".to_string(),
                    value: name.clone(),
                    reason: "Entry names must be non-empty and must not contain '='".to_string(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(BootstrapError::InvalidConfigValueError {
                    field: "credentials.entries".to_string(),
                    value: name.clone(),
                    reason: "Duplicate credential entry".to_string(),
                });
            }
            let value: serde_json::Value = serde_json::from_str(payload)?;
            if !value.is_object() {
                return Err(BootstrapError::InvalidConfigValueError {
                    field: format!("credentials.entries.{}", name),
                    value: payload.clone(),
                    reason: "Credential payload must be a JSON object".to_string(),
                });
            }
        }

        validation::validate_non_empty_string("import.subcommand", &self.import.subcommand)?;
        validation::validate_path("import.seed_file", &self.import.seed_file.to_string_lossy())?;

        self.validate_readiness()?;

        validation::validate_range(
            "shutdown.grace_period_secs",
            self.shutdown.grace_period_secs,
            0,
            300,
        )?;

        if self.lock.enabled {
            validation::validate_file_name("lock.file", &self.lock.file)?;
        }

        validation::validate_non_empty_string("prepare.bundle_pattern", &self.prepare.bundle_pattern)?;
        validation::validate_path("prepare.env_file", &self.prepare.env_file.to_string_lossy())?;
        for name in self
            .prepare
            .env
            .keys()
            .chain(self.prepare.discover.keys())
            .chain(self.prepare.credentials.keys())
        {
            validation::validate_env_key("prepare.env", name)?;
        }
        for (link, targets) in &self.prepare.links {
            validation::validate_path("prepare.links", link)?;
            validation::validate_path("prepare.links", &targets.oss.to_string_lossy())?;
            validation::validate_path("prepare.links", &targets.enterprise.to_string_lossy())?;
        }

        Ok(())
    }

    fn validate_readiness(&self) -> Result<()> {
        let readiness = &self.readiness;
        match readiness.probe {
            ProbeKind::Tcp => {
                validation::validate_socket_address("readiness.address", &readiness.address)?
            }
            ProbeKind::Http => {
                let url = validation::validate_required_field("readiness.url", &readiness.url)?;
                validation::validate_url("readiness.url", url)?;
            }
            ProbeKind::Delay => {
                validation::validate_range("readiness.delay_secs", readiness.delay_secs, 0, 3600)?
            }
        }

        validation::validate_positive_number(
            "readiness.max_attempts",
            readiness.max_attempts as usize,
            1,
        )?;
        validation::validate_positive_number(
            "readiness.initial_interval_ms",
            readiness.initial_interval_ms as usize,
            1,
        )?;
        validation::validate_positive_number(
            "readiness.request_timeout_ms",
            readiness.request_timeout_ms as usize,
            1,
        )?;
        validation::validate_range("readiness.backoff_factor", readiness.backoff_factor, 1.0, 10.0)?;
        if readiness.max_interval_ms < readiness.initial_interval_ms {
            return Err(BootstrapError::InvalidConfigValueError {
                field: "readiness.max_interval_ms".to_string(),
                value: readiness.max_interval_ms.to_string(),
                reason: "Must not be smaller than readiness.initial_interval_ms".to_string(),
            });
        }

        Ok(())
    }
}

impl Validate for BootstrapConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BootstrapConfig::from_toml_str("").unwrap();

        assert_eq!(config.service.binary, "raas");
        assert_eq!(config.marker_path(), PathBuf::from("/etc/raas/initialized"));
        assert_eq!(config.readiness.probe, ProbeKind::Tcp);
        assert_eq!(config.foreground.mode, ForegroundMode::Supervise);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_command_args() {
        let config = BootstrapConfig::default();

        assert_eq!(
            config.credentials.command_args(),
            vec![
                "save_creds".to_string(),
                r#"postgres={"username":"salteapi","password":"abc123"}"#.to_string(),
                r#"redis={"password":"def456"}"#.to_string(),
            ]
        );
        assert_eq!(
            config.import.command_args().join(" "),
            "dump --insecure --server https://localhost --auth root:salt --mode import"
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
[service]
binary = "/usr/bin/raas"
config_dir = "/srv/raas"

[readiness]
probe = "http"
url = "https://localhost/version"
max_attempts = 5

[foreground]
mode = "exec"

[lock]
enabled = false
"#;

        let config = BootstrapConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.service.binary, "/usr/bin/raas");
        assert_eq!(config.service.marker_file, "initialized");
        assert_eq!(config.readiness.probe, ProbeKind::Http);
        assert_eq!(config.readiness.max_attempts, 5);
        assert_eq!(config.readiness.initial_interval_ms, 1000);
        assert_eq!(config.foreground.mode, ForegroundMode::Exec);
        assert!(config.lock_path().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BOOTSTRAP_TEST_PG_PASSWORD", "s3cret");

        let toml_content = r#"
[[credentials.entries]]
name = "postgres"
payload = '{"username":"salteapi","password":"${BOOTSTRAP_TEST_PG_PASSWORD}"}'

[[credentials.entries]]
name = "redis"
payload = '{"password":"${BOOTSTRAP_TEST_UNSET_VARIABLE}"}'
"#;

        let config = BootstrapConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(
            config.credentials.entries[0].payload,
            r#"{"username":"salteapi","password":"s3cret"}"#
        );
        assert_eq!(
            config.credentials.entries[1].payload,
            r#"{"password":"${BOOTSTRAP_TEST_UNSET_VARIABLE}"}"#
        );

        std::env::remove_var("BOOTSTRAP_TEST_PG_PASSWORD");
    }

    #[test]
    fn test_http_probe_requires_url() {
        let config = BootstrapConfig::from_toml_str("[readiness]\nprobe = \"http\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(BootstrapError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_credential_payload_must_be_object() {
        let toml_content = r#"
[[credentials.entries]]
name = "postgres"
payload = '"just a string"'
"#;
        let config = BootstrapConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let broken = BootstrapConfig::from_toml_str(
            "[[credentials.entries]]\nname = \"redis\"\npayload = '{oops'\n",
        )
        .unwrap();
        assert!(matches!(
            broken.validate(),
            Err(BootstrapError::SerializationError(_))
        ));
    }

    #[test]
    fn test_credential_entries_keep_declared_order() {
        let toml_content = r#"
[[credentials.entries]]
name = "redis"
payload = '{"password":"def456"}'

[[credentials.entries]]
name = "postgres"
payload = '{"username":"salteapi","password":"abc123"}'
"#;
        let config = BootstrapConfig::from_toml_str(toml_content).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(
            config.credentials.command_args(),
            vec![
                "save_creds".to_string(),
                r#"redis={"password":"def456"}"#.to_string(),
                r#"postgres={"username":"salteapi","password":"abc123"}"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_duplicate_credential_entries_rejected() {
        let mut config = BootstrapConfig::default();
        let first = config.credentials.entries[0].clone();
        config.credentials.entries.push(first);

        assert!(matches!(
            config.validate(),
            Err(BootstrapError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_prepare_defaults_match_lab_layout() {
        let prepare = PrepareConfig::default();

        assert_eq!(prepare.mode, PrepareMode::Oss);
        assert_eq!(
            prepare.links["compose.yaml"].for_mode(PrepareMode::Enterprise),
            Path::new("aria-compose.yaml")
        );
        assert_eq!(
            prepare.links["data/master.d"].for_mode(PrepareMode::Oss),
            Path::new("data/oss-master")
        );
        assert_eq!(prepare.credentials["POSTGRES_USER"], "salteapi");
        assert!(ResetConfig::default()
            .paths
            .contains(&PathBuf::from("data/raas/raas.secconf")));
    }

    #[test]
    fn test_interval_bounds_validation() {
        let toml_content = r#"
[readiness]
initial_interval_ms = 5000
max_interval_ms = 100
"#;
        let config = BootstrapConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let config = BootstrapConfig::from_toml_str(include_str!("../../bootstrap.toml")).unwrap();
        let defaults = BootstrapConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.marker_path(), defaults.marker_path());
        assert_eq!(config.credentials.command_args(), defaults.credentials.command_args());
        assert_eq!(config.import.command_args(), defaults.import.command_args());
        assert_eq!(config.prepare.artifacts, defaults.prepare.artifacts);
        assert_eq!(config.prepare.discover, defaults.prepare.discover);
        assert!(config
            .prepare
            .credentials
            .keys()
            .eq(defaults.prepare.credentials.keys()));
        assert_eq!(config.prepare.links, defaults.prepare.links);
        assert_eq!(config.prepare.mode, defaults.prepare.mode);
        assert_eq!(config.reset.paths, defaults.reset.paths);
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[service]\nbinary = \"my-service\"\n")
            .unwrap();

        let config = BootstrapConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.service.binary, "my-service");

        let loaded = BootstrapConfig::load(Some(temp_file.path())).unwrap();
        assert_eq!(loaded.service.binary, "my-service");
    }
}
