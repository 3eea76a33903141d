use crate::config::toml_config::BootstrapConfig;
use crate::core::marker::Marker;
use crate::core::prepare::LabPreparer;
use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Factory reset: forget the first run so the next start repeats it, and
/// clear the lab state under `root`.
pub fn factory_reset(config: &BootstrapConfig, root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for marker in [
        Marker::new(config.marker_path()),
        Marker::new(config.credentials_marker_path()),
    ] {
        if marker.remove()? {
            tracing::info!("Removed {}", marker.path().display());
            removed.push(marker.path().to_path_buf());
        }
    }

    for path in &config.reset.paths {
        let path = root.join(path);
        if remove_path(&path)? {
            tracing::info!("Removed {}", path.display());
            removed.push(path);
        } else {
            tracing::debug!("{} does not exist, skipping", path.display());
        }
    }

    removed.extend(LabPreparer::new(config.prepare.clone(), root).clean()?);

    Ok(removed)
}

/// Deletes a file, link or directory tree. Returns whether anything was there.
pub(crate) fn remove_path(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reset_removes_markers_and_paths() {
        let dir = TempDir::new().unwrap();
        let mut config = BootstrapConfig::default();
        config.service.config_dir = dir.path().join("raas");

        let pki = dir.path().join("pki");
        fs::create_dir_all(pki.join("master")).unwrap();
        fs::write(pki.join("master/key.pem"), b"key").unwrap();
        let secconf = dir.path().join("raas.secconf");
        fs::write(&secconf, b"secret").unwrap();
        config.reset.paths = vec![pki.clone(), secconf.clone(), dir.path().join("missing")];

        Marker::new(config.marker_path()).create().unwrap();

        let removed = factory_reset(&config, dir.path()).unwrap();

        assert_eq!(removed, vec![config.marker_path(), pki.clone(), secconf.clone()]);
        assert!(!config.marker_path().exists());
        assert!(!pki.exists());
        assert!(!secconf.exists());
    }

    #[test]
    fn test_default_reset_clears_lab_state() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut config = BootstrapConfig::default();
        config.service.config_dir = root.join("etc");

        fs::create_dir_all(root.join("data/postgres/base")).unwrap();
        fs::create_dir_all(root.join("data/raas/pki")).unwrap();
        fs::write(root.join("data/raas/raas.secconf"), b"secret").unwrap();
        fs::write(root.join("data/raas/initialized"), b"").unwrap();
        fs::create_dir_all(root.join("data/ent-master")).unwrap();
        std::os::unix::fs::symlink(root.join("data/ent-master"), root.join("data/master.d"))
            .unwrap();
        fs::create_dir_all(root.join("build/salt-master/eapi_plugin")).unwrap();
        fs::write(root.join(".env"), "SALT_VERSION=3006.9\n").unwrap();
        fs::write(root.join("data/raas/raas.conf"), b"keep").unwrap();

        let removed = factory_reset(&config, root).unwrap();

        assert_eq!(removed.len(), 7);
        for gone in [
            "data/postgres",
            "data/raas/pki",
            "data/raas/raas.secconf",
            "data/raas/initialized",
            "data/master.d",
            "build/salt-master/eapi_plugin",
            ".env",
        ] {
            assert!(fs::symlink_metadata(root.join(gone)).is_err(), "{} survived", gone);
        }
        assert!(root.join("data/ent-master").exists());
        assert!(root.join("data/raas/raas.conf").exists());
    }

    #[test]
    fn test_reset_on_clean_environment_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut config = BootstrapConfig::default();
        config.service.config_dir = dir.path().to_path_buf();

        assert!(factory_reset(&config, dir.path()).unwrap().is_empty());
    }
}
