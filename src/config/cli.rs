use crate::domain::model::PrepareMode;
use crate::utils::logger::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "service-bootstrap")]
#[command(about = "Container entry point that initializes a service once, then runs it")]
pub struct CliConfig {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "BOOTSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value = "compact")]
    pub log_format: LogFormat,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Initialize on first start, then run the service in the foreground
    Run {
        /// Arguments forwarded verbatim to the service binary
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        service_args: Vec<String>,
    },
    /// Report whether first-run initialization has completed
    Status,
    /// Set up a lab checkout: env file, links and, in enterprise mode, the installer bundle
    Prepare {
        /// Installer bundle (.tar.gz, .tgz or .zip); searched in the root when omitted
        #[arg(short, long)]
        bundle: Option<PathBuf>,

        /// Overrides prepare.mode
        #[arg(short, long, value_enum)]
        mode: Option<PrepareMode>,

        /// Overrides SALT_VERSION in the env file
        #[arg(short, long)]
        salt_version: Option<String>,

        /// Directory the prepare paths are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
    /// Delete the initialization marker, configured state and lab build output
    Reset {
        /// Directory relative reset paths resolve against
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_forwards_hyphenated_args() {
        let cli = CliConfig::parse_from([
            "service-bootstrap",
            "-v",
            "run",
            "--",
            "-l",
            "debug",
            "--foreground",
            "extra",
        ]);

        assert!(cli.verbose);
        match cli.command {
            Command::Run { service_args } => {
                assert_eq!(service_args, vec!["-l", "debug", "--foreground", "extra"])
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_run_without_args() {
        let cli = CliConfig::parse_from(["service-bootstrap", "run"]);
        assert!(matches!(cli.command, Command::Run { service_args } if service_args.is_empty()));
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = CliConfig::parse_from([
            "service-bootstrap",
            "status",
            "--config",
            "/tmp/bootstrap.toml",
            "--log-format",
            "json",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bootstrap.toml")));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.log_file.is_none());
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn test_prepare_options() {
        let cli = CliConfig::parse_from([
            "service-bootstrap",
            "prepare",
            "--mode",
            "enterprise",
            "-s",
            "3007.1",
            "--bundle",
            "vRA_SaltStack_Config-8.16.tar.gz",
            "--log-file",
            "/tmp/prepare.log",
        ]);

        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/prepare.log")));
        match cli.command {
            Command::Prepare {
                bundle,
                mode,
                salt_version,
                root,
            } => {
                assert_eq!(bundle, Some(PathBuf::from("vRA_SaltStack_Config-8.16.tar.gz")));
                assert_eq!(mode, Some(PrepareMode::Enterprise));
                assert_eq!(salt_version.as_deref(), Some("3007.1"));
                assert_eq!(root, PathBuf::from("."));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_prepare_defaults_to_configured_mode() {
        let cli = CliConfig::parse_from(["service-bootstrap", "prepare"]);
        assert!(matches!(
            cli.command,
            Command::Prepare { bundle: None, mode: None, salt_version: None, .. }
        ));
    }
}
