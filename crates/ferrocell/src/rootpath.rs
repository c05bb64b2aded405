use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nix::unistd::{getuid, Uid};

const DEFAULT_ROOT: &str = "/run/ferrocell";

/// Resolves the directory that holds one state directory per container.
/// An explicit root wins, otherwise root uses /run/ferrocell and other users
/// get a directory below their runtime dir.
pub fn determine(root_path: Option<PathBuf>) -> Result<PathBuf> {
    let uid = getuid();

    if let Some(path) = root_path {
        return prepare(&path);
    }

    if uid.is_root() {
        return prepare(Path::new(DEFAULT_ROOT));
    }

    prepare(&rootless_root(uid, std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from))?)
}

fn rootless_root(uid: Uid, xdg_runtime_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = xdg_runtime_dir.filter(|dir| !dir.as_os_str().is_empty()) {
        return Ok(dir.join("ferrocell"));
    }

    let user_run = PathBuf::from(format!("/run/user/{uid}"));
    if user_run.is_dir() {
        return Ok(user_run.join("ferrocell"));
    }

    bail!("could not find a state root for user {uid}, pass --root or set XDG_RUNTIME_DIR")
}

fn prepare(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
            .with_context(|| format!("failed to create state root {}", path.display()))?;
    }

    let path = fs::canonicalize(path)
        .with_context(|| format!("failed to canonicalize state root {}", path.display()))?;
    if !path.is_dir() {
        bail!("state root {} is not a directory", path.display());
    }
    tracing::debug!(?path, "state root");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn test_explicit_root_is_created() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let root = tmp.path().join("a/b/state");
        let resolved = determine(Some(root.clone()))?;
        assert_eq!(resolved, fs::canonicalize(&root)?);
        let mode = fs::metadata(&resolved)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        Ok(())
    }

    #[test]
    fn test_explicit_root_is_canonical() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        fs::create_dir(tmp.path().join("state"))?;
        let resolved = determine(Some(tmp.path().join("state/../state")))?;
        assert_eq!(resolved, fs::canonicalize(tmp.path().join("state"))?);
        Ok(())
    }

    #[test]
    fn test_root_must_be_a_directory() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let file = tmp.path().join("state");
        fs::write(&file, "")?;
        assert!(determine(Some(file)).is_err());
        Ok(())
    }

    #[test]
    fn test_rootless_root_prefers_runtime_dir() -> Result<()> {
        let root = rootless_root(Uid::from_raw(1000), Some(PathBuf::from("/run/user/1000")))?;
        assert_eq!(root, PathBuf::from("/run/user/1000/ferrocell"));
        Ok(())
    }
}
