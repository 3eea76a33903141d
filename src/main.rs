use anyhow::Context;
use clap::Parser;
use service_bootstrap::core::prepare::BundleFormat;
use service_bootstrap::core::reset::factory_reset;
use service_bootstrap::domain::model::PrepareMode;
use service_bootstrap::utils::{logger, validation, validation::Validate};
use service_bootstrap::{
    BootstrapConfig, BootstrapError, BootstrapSequencer, CliConfig, Command, LabPreparer, Marker,
    ProcessRunner,
};
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_logger(cli.verbose, cli.log_format, cli.log_file.as_deref()).with_context(|| {
        format!(
            "failed to open log file {}",
            cli.log_file
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default()
        )
    })?;
    tracing::debug!("CLI config: {:?}", cli);

    let config = BootstrapConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "failed to load configuration{}",
            cli.config
                .as_ref()
                .map(|path| format!(" from {}", path.display()))
                .unwrap_or_default()
        )
    })?;

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(e.severity().exit_code());
    }

    let code = match cli.command {
        Command::Run { service_args } => run(&config, &service_args).await,
        Command::Status => status(&config),
        Command::Prepare {
            bundle,
            mode,
            salt_version,
            root,
        } => prepare(&config, bundle.as_deref(), mode, salt_version, root),
        Command::Reset { root } => match factory_reset(&config, &root) {
            Ok(removed) => {
                println!("Removed {} paths", removed.len());
                0
            }
            Err(e) => report_failure("reset", &e),
        },
    };

    std::process::exit(code);
}

async fn run(config: &BootstrapConfig, service_args: &[String]) -> i32 {
    tracing::info!(
        "Starting service-bootstrap for '{}' with {} forwarded arguments",
        config.service.binary,
        service_args.len()
    );

    let runner = ProcessRunner::from_config(config);
    let sequencer = match BootstrapSequencer::from_config(runner, config) {
        Ok(sequencer) => sequencer,
        Err(e) => return report_failure("bootstrap", &e),
    };

    match sequencer.run(service_args).await {
        Ok(report) => {
            tracing::info!("Bootstrap finished ({:?}), service {}", report.init, report.exit);
            report.exit.exit_code()
        }
        Err(e) => report_failure("bootstrap", &e),
    }
}

fn prepare(
    config: &BootstrapConfig,
    bundle: Option<&Path>,
    mode: Option<PrepareMode>,
    salt_version: Option<String>,
    root: PathBuf,
) -> i32 {
    let mut preparer = LabPreparer::new(config.prepare.clone(), root);
    if let Some(mode) = mode {
        preparer = preparer.with_mode(mode);
    }
    if let Some(version) = salt_version {
        preparer = preparer.with_salt_version(version);
    }

    let checked = match bundle {
        Some(bundle) => validation::validate_file_extensions(
            "bundle",
            &[bundle.display().to_string()],
            &BundleFormat::EXTENSIONS,
        ),
        None => Ok(()),
    };

    match checked.and_then(|()| preparer.prepare(bundle)) {
        Ok(report) => {
            println!("✅ Prepared {:?} lab", report.mode);
            if let Some(bundle) = &report.bundle {
                println!(
                    "📦 {}: extracted {} files, placed {} artifact directories",
                    bundle.display(),
                    report.extracted_files,
                    report.placed_artifacts
                );
            }
            println!(
                "📁 Environment written to: {} ({} variables)",
                report.env_file.display(),
                report.env.len()
            );
            for link in &report.links {
                println!("🔗 {}", link.display());
            }
            0
        }
        Err(e) => report_failure("prepare", &e),
    }
}

fn status(config: &BootstrapConfig) -> i32 {
    let marker = Marker::new(config.marker_path());
    if marker.exists() {
        println!("initialized ({})", marker.path().display());
        0
    } else {
        println!("not initialized ({} missing)", marker.path().display());
        1
    }
}

fn report_failure(operation: &str, e: &BootstrapError) -> i32 {
    tracing::error!(
        "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
        operation,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    if operation == "bootstrap" && e.is_retryable() {
        tracing::warn!("The first-run sequence will be retried on the next start");
    }

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    e.severity().exit_code()
}
