//! Loads the OCI runtime spec of a bundle.

use std::fs;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use oci_spec::runtime::{RootBuilder, Spec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path:?} not found")]
    NotFound { path: PathBuf },
    #[error("failed to read config {path:?}")]
    LoadIO {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to decode config {path:?}")]
    LoadParse {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("spec has no root")]
    MissingRoot,
    #[error("failed to canonicalize rootfs {path:?}")]
    Canonicalize {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to rebuild root")]
    BuildRoot(#[from] oci_spec::OciSpecError),
}

type Result<T> = std::result::Result<T, ConfigError>;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Reads `<bundle>/config.json` and resolves the root path against the bundle
pub fn load<P: AsRef<Path>>(bundle: P) -> Result<Spec> {
    let bundle = bundle.as_ref();
    let path = bundle.join(CONFIG_FILE_NAME);

    let file = fs::File::open(&path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => ConfigError::NotFound { path: path.clone() },
        _ => ConfigError::LoadIO {
            source: err,
            path: path.clone(),
        },
    })?;

    let mut spec: Spec =
        serde_json::from_reader(BufReader::new(file)).map_err(|err| ConfigError::LoadParse {
            source: err,
            path: path.clone(),
        })?;

    canonicalize_rootfs(&mut spec, bundle)?;

    Ok(spec)
}

/// A relative root path is relative to the bundle
fn canonicalize_rootfs(spec: &mut Spec, bundle: &Path) -> Result<()> {
    let root = spec.root().as_ref().ok_or(ConfigError::MissingRoot)?;

    let rootfsPath = if root.path().is_absolute() {
        root.path().clone()
    } else {
        bundle.join(root.path())
    };

    let rootfsPath = fs::canonicalize(&rootfsPath).map_err(|err| {
        tracing::error!(?err, path = ?rootfsPath, "failed to canonicalize rootfs");
        ConfigError::Canonicalize {
            source: err,
            path: rootfsPath.clone(),
        }
    })?;

    let root = RootBuilder::default()
        .path(rootfsPath)
        .readonly(root.readonly().unwrap_or(false))
        .build()?;
    spec.set_root(Some(root));

    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn write_config(bundle: &Path, rootfs: &str) -> Result<()> {
        let config = format!(
            r#"{{
                "ociVersion": "1.0.2",
                "root": {{ "path": "{rootfs}" }},
                "process": {{
                    "user": {{ "uid": 0, "gid": 0 }},
                    "cwd": "/",
                    "args": ["/bin/true"]
                }},
                "hostname": "sandbox"
            }}"#
        );
        fs::write(bundle.join(CONFIG_FILE_NAME), config)?;
        Ok(())
    }

    #[test]
    fn test_load_resolves_relative_rootfs() -> Result<()> {
        let bundle = tempfile::tempdir()?;
        fs::create_dir(bundle.path().join("rootfs"))?;
        write_config(bundle.path(), "rootfs")?;

        let spec = load(bundle.path())?;
        assert_eq!(
            spec.root().as_ref().map(|r| r.path().clone()),
            Some(fs::canonicalize(bundle.path().join("rootfs"))?)
        );
        assert_eq!(spec.hostname().as_deref(), Some("sandbox"));
        Ok(())
    }

    #[test]
    fn test_load_missing_config() -> Result<()> {
        let bundle = tempfile::tempdir()?;
        assert!(matches!(
            load(bundle.path()),
            Err(ConfigError::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_malformed_config() -> Result<()> {
        let bundle = tempfile::tempdir()?;
        fs::write(bundle.path().join(CONFIG_FILE_NAME), "{ not json")?;
        assert!(matches!(
            load(bundle.path()),
            Err(ConfigError::LoadParse { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_missing_rootfs_dir() -> Result<()> {
        let bundle = tempfile::tempdir()?;
        write_config(bundle.path(), "does-not-exist")?;
        assert!(matches!(
            load(bundle.path()),
            Err(ConfigError::Canonicalize { .. })
        ));
        Ok(())
    }
}
