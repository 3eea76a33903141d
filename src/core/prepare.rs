use crate::config::toml_config::{ArtifactConfig, BootstrapConfig, PrepareConfig};
use crate::core::reset::remove_path;
use crate::domain::model::PrepareMode;
use crate::utils::error::{BootstrapError, Result};
use flate2::read::GzDecoder;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

/// Archive formats accepted for installer bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    TarGz,
    Zip,
}

impl BundleFormat {
    /// File extensions as `Path::extension` reports them.
    pub const EXTENSIONS: [&'static str; 3] = ["gz", "tgz", "zip"];

    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(BundleFormat::TarGz)
        } else if name.ends_with(".zip") {
            Ok(BundleFormat::Zip)
        } else {
            Err(BootstrapError::BundleError {
                message: format!(
                    "unsupported bundle {}: expected .tar.gz, .tgz or .zip",
                    path.display()
                ),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareReport {
    pub mode: PrepareMode,
    pub bundle: Option<PathBuf>,
    pub cleaned: Vec<PathBuf>,
    pub extracted_files: usize,
    pub placed_artifacts: usize,
    pub env_file: PathBuf,
    pub env: Vec<(String, String)>,
    pub links: Vec<PathBuf>,
}

/// Sets up a lab checkout: installer bundle, environment file and the
/// mode-specific links the container definitions read.
pub struct LabPreparer {
    config: PrepareConfig,
    root: PathBuf,
}

impl LabPreparer {
    /// Relative paths in `config` resolve against `root`.
    pub fn new(config: PrepareConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    pub fn with_mode(mut self, mode: PrepareMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn with_salt_version(mut self, version: impl Into<String>) -> Self {
        self.config
            .env
            .insert("SALT_VERSION".to_string(), version.into());
        self
    }

    pub fn mode(&self) -> PrepareMode {
        self.config.mode
    }

    fn build_dir(&self) -> PathBuf {
        self.root.join(&self.config.build_dir)
    }

    fn env_file(&self) -> PathBuf {
        self.root.join(&self.config.env_file)
    }

    /// Cleans the previous setup, then prepares the configured mode. In
    /// enterprise mode `bundle` defaults to the first file in the root that
    /// matches `bundle_pattern`.
    pub fn prepare(&self, bundle: Option<&Path>) -> Result<PrepareReport> {
        let mode = self.config.mode;
        tracing::info!("🔧 Preparing {:?} lab in {}", mode, self.root.display());

        let cleaned = self.clean()?;
        let mut updates: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let (bundle, extracted_files, placed_artifacts) = match mode {
            PrepareMode::Oss => {
                if let Some(bundle) = bundle {
                    tracing::warn!("Ignoring bundle {} in oss mode", bundle.display());
                }
                (None, 0, 0)
            }
            PrepareMode::Enterprise => {
                let credentials = self.resolve_credentials()?;
                let bundle = match bundle {
                    Some(bundle) => bundle.to_path_buf(),
                    None => self.find_bundle()?,
                };

                let extracted = self.extract_bundle(&bundle)?;
                let placed = self.place_artifacts()?;
                updates.extend(self.discover_artifacts()?);
                updates.extend(credentials);
                (Some(bundle), extracted, placed)
            }
        };

        let env = self.write_env_file(&updates)?;
        let links = self.create_links()?;

        Ok(PrepareReport {
            mode,
            bundle,
            cleaned,
            extracted_files,
            placed_artifacts,
            env_file: self.env_file(),
            env,
            links,
        })
    }

    /// Removes build output, the env file and links from an earlier run.
    pub fn clean(&self) -> Result<Vec<PathBuf>> {
        let build_dir = self.build_dir();
        let mut targets: Vec<PathBuf> = Vec::new();
        for ArtifactConfig { from, to } in &self.config.artifacts {
            if let Some(Component::Normal(top)) = from.components().next() {
                targets.push(build_dir.join(top));
            }
            targets.push(build_dir.join(to));
        }
        targets.push(self.env_file());

        let mut unique: Vec<PathBuf> = Vec::new();
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }

        let mut removed = Vec::new();
        for target in unique {
            if remove_path(&target)? {
                tracing::info!("Removed {}", target.display());
                removed.push(target);
            }
        }

        for link in self.config.links.keys() {
            let path = self.root.join(link);
            let is_link = fs::symlink_metadata(&path)
                .map(|metadata| metadata.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                fs::remove_file(&path)?;
                tracing::info!("Removed link {}", path.display());
                removed.push(path);
            }
        }

        Ok(removed)
    }

    fn find_bundle(&self) -> Result<PathBuf> {
        match first_match(&self.root, &self.config.bundle_pattern)? {
            Some(name) => Ok(self.root.join(name)),
            None => Err(BootstrapError::BundleError {
                message: format!(
                    "no installer bundle matching '{}' in {}",
                    self.config.bundle_pattern,
                    self.root.display()
                ),
            }),
        }
    }

    /// Every credential must resolve; there is nobody to prompt.
    fn resolve_credentials(&self) -> Result<Vec<(String, String)>> {
        self.config
            .credentials
            .iter()
            .map(|(key, value)| {
                let resolved = BootstrapConfig::substitute_env_vars(value)?;
                if resolved.contains("${") {
                    return Err(BootstrapError::MissingConfigError {
                        field: format!("prepare.credentials.{} ({})", key, value),
                    });
                }
                Ok((key.clone(), resolved))
            })
            .collect()
    }

    /// Returns the number of files written.
    pub fn extract_bundle(&self, bundle: &Path) -> Result<usize> {
        let format = BundleFormat::detect(bundle)?;
        let build_dir = self.build_dir();
        tracing::info!(
            "📦 Extracting {} into {}",
            bundle.display(),
            build_dir.display()
        );

        let file = fs::File::open(bundle).map_err(|e| BootstrapError::BundleError {
            message: format!("cannot open {}: {}", bundle.display(), e),
        })?;
        fs::create_dir_all(&build_dir)?;

        let extracted = match format {
            BundleFormat::TarGz => extract_tar_gz(file, &build_dir)?,
            BundleFormat::Zip => extract_zip(file, &build_dir)?,
        };

        tracing::debug!("Extracted {} files", extracted);
        Ok(extracted)
    }

    pub fn place_artifacts(&self) -> Result<usize> {
        let build_dir = self.build_dir();

        for ArtifactConfig { from, to } in &self.config.artifacts {
            let source = build_dir.join(from);
            let destination = build_dir.join(to);

            if !source.is_dir() {
                return Err(BootstrapError::BundleError {
                    message: format!("required installer directory not found: {}", source.display()),
                });
            }

            copy_dir_recursive(&source, &destination)?;
            tracing::info!("Placed {} -> {}", from.display(), to.display());
        }

        Ok(self.config.artifacts.len())
    }

    /// Maps each configured variable to the first matching file name.
    pub fn discover_artifacts(&self) -> Result<BTreeMap<String, String>> {
        let build_dir = self.build_dir();
        let mut found = BTreeMap::new();

        for (variable, pattern) in &self.config.discover {
            let pattern_path = Path::new(pattern);
            let dir = build_dir.join(pattern_path.parent().unwrap_or_else(|| Path::new("")));
            let file_pattern = pattern_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            match first_match(&dir, &file_pattern)? {
                Some(name) => {
                    tracing::debug!("Set {} to {}", variable, name);
                    found.insert(variable.clone(), name);
                }
                None => tracing::warn!(
                    "No file matches {} for {}; configuration may be incomplete",
                    pattern,
                    variable
                ),
            }
        }

        Ok(found)
    }

    /// Merges `updates` into the env file, keeping the order of existing keys.
    pub fn write_env_file(&self, updates: &[(String, String)]) -> Result<Vec<(String, String)>> {
        let path = self.env_file();
        let mut entries = match fs::read_to_string(&path) {
            Ok(content) => parse_env(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        for (key, value) in updates {
            match entries.iter_mut().find(|(existing, _)| existing == key) {
                Some(entry) => entry.1 = value.clone(),
                None => entries.push((key.clone(), value.clone())),
            }
        }

        let content: String = entries
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;

        tracing::info!("Wrote {} variables to {}", entries.len(), path.display());
        Ok(entries)
    }

    /// Points each configured link at its target for the current mode, using
    /// absolute paths. Existing links are left alone.
    pub fn create_links(&self) -> Result<Vec<PathBuf>> {
        let root = fs::canonicalize(&self.root)?;
        let mut created = Vec::new();

        for (name, targets) in &self.config.links {
            let link = root.join(name);
            let target = root.join(targets.for_mode(self.config.mode));

            if !target.exists() {
                return Err(BootstrapError::LinkError {
                    link,
                    message: format!("target {} does not exist", target.display()),
                });
            }
            if fs::symlink_metadata(&link).is_ok() {
                tracing::debug!("{} already exists, skipping", link.display());
                continue;
            }

            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(&target, &link).map_err(|e| BootstrapError::LinkError {
                link: link.clone(),
                message: e.to_string(),
            })?;
            tracing::info!("Linked {} -> {}", name, target.display());
            created.push(link);
        }

        Ok(created)
    }
}

fn unsafe_entry(name: impl std::fmt::Display) -> BootstrapError {
    BootstrapError::BundleError {
        message: format!("unsafe entry path in bundle: {}", name),
    }
}

/// Relative, and never climbing out of the extraction directory.
fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn extract_tar_gz(file: fs::File, build_dir: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut extracted = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !is_enclosed(&path) {
            return Err(unsafe_entry(path.display()));
        }

        let is_file = entry.header().entry_type().is_file();
        if !entry.unpack_in(build_dir)? {
            return Err(unsafe_entry(path.display()));
        }
        if is_file {
            extracted += 1;
        }
    }

    Ok(extracted)
}

fn extract_zip(file: fs::File, build_dir: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(file)?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(unsafe_entry(entry.name()));
        };
        let target = build_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;

        if let Some(mode) = entry.unix_mode() {
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }

        extracted += 1;
    }

    Ok(extracted)
}

fn parse_env(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.starts_with('#') {
                return None;
            }
            line.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// `*` matches any run of characters; everything else is literal.
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*"))).map_err(|e| BootstrapError::ConfigError {
        message: format!("invalid discover pattern '{}': {}", pattern, e),
    })
}

fn first_match(dir: &Path, pattern: &str) -> Result<Option<String>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let matcher = wildcard_regex(pattern)?;
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if matcher.is_match(&name) {
            names.push(name);
        }
    }

    names.sort();
    Ok(names.into_iter().next())
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}
