use std::fmt::Display;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use crate::common::{CgroupManager, ControllerOpt};
use crate::v2::manager::{Manager as V2Manager, V2ManagerError};
use crate::v2::util::{self, V2UtilError};

const DEFAULT_SLICE: &str = "system.slice";
const DEFAULT_PREFIX: &str = "ferrocell";

#[derive(thiserror::Error, Debug)]
pub enum SystemdManagerError {
    #[error("expected cgroups path to be of format \"slice:prefix:name\" but got {0:?}")]
    BadCgroupsPath(String),
    #[error("invalid slice name: {0}")]
    InvalidSliceName(String),
    #[error("failed to find unified mount point: {0}")]
    Util(#[from] V2UtilError),
    #[error("v2 manager error: {0}")]
    V2(#[from] V2ManagerError),
}

/// Parsed form of a `slice:prefix:name` cgroups path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupsPath {
    pub parent: String,
    pub prefix: String,
    pub name: String,
}

impl CgroupsPath {
    /// Parses a systemd cgroups path. An empty path places the container
    /// under the default slice with the runtime prefix and its own name.
    pub fn parse(cgroup_path: &Path, container_name: &str) -> Result<Self, SystemdManagerError> {
        let raw = cgroup_path.to_string_lossy();
        if raw.is_empty() {
            return Ok(Self {
                parent: DEFAULT_SLICE.to_owned(),
                prefix: DEFAULT_PREFIX.to_owned(),
                name: container_name.to_owned(),
            });
        }

        let parts: Vec<&str> = raw.split(':').collect();
        let [parent, prefix, name] = parts.as_slice() else {
            return Err(SystemdManagerError::BadCgroupsPath(raw.into_owned()));
        };
        if name.is_empty() {
            return Err(SystemdManagerError::BadCgroupsPath(raw.into_owned()));
        }

        let parent = if parent.is_empty() {
            DEFAULT_SLICE
        } else {
            parent
        };

        Ok(Self {
            parent: parent.to_string(),
            prefix: prefix.to_string(),
            name: name.to_string(),
        })
    }

    /// Name of the unit the container is placed in
    pub fn unit_name(&self) -> String {
        if self.name.ends_with(".slice") {
            return self.name.clone();
        }

        if self.prefix.is_empty() {
            return format!("{}.scope", self.name);
        }

        format!("{}-{}.scope", self.prefix, self.name)
    }
}

impl Display for CgroupsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.parent, self.prefix, self.name)
    }
}

/// Expands a slice name into the path systemd places it at, e.g.
/// `a-b-c.slice` becomes `/a.slice/a-b.slice/a-b-c.slice`
pub fn expand_slice(slice: &str) -> Result<PathBuf, SystemdManagerError> {
    let invalid = || SystemdManagerError::InvalidSliceName(slice.to_owned());

    let Some(name) = slice.strip_suffix(".slice") else {
        return Err(invalid());
    };
    if name.contains('/') {
        return Err(invalid());
    }

    // the root slice
    if name == "-" {
        return Ok(PathBuf::from("/"));
    }

    let mut path = PathBuf::from("/");
    let mut prefix = String::new();
    for component in name.split('-') {
        if component.is_empty() {
            return Err(invalid());
        }

        path.push(format!("{prefix}{component}.slice"));
        prefix = format!("{prefix}{component}-");
    }

    Ok(path)
}

/// Cgroup manager for systemd style cgroups paths. The scope directory is
/// created under the unified hierarchy and configured through the v2
/// controllers.
#[derive(Debug)]
pub struct Manager {
    cgroups_path: CgroupsPath,
    unit_name: String,
    inner: V2Manager,
}

impl Manager {
    pub fn any(cgroup_path: &Path, container_name: &str) -> Result<Self, SystemdManagerError> {
        let root_path = util::get_unified_mount_point()?;
        Self::new(root_path, cgroup_path, container_name)
    }

    pub fn new(
        root_path: PathBuf,
        cgroup_path: &Path,
        container_name: &str,
    ) -> Result<Self, SystemdManagerError> {
        let cgroups_path = CgroupsPath::parse(cgroup_path, container_name)?;
        let unit_name = cgroups_path.unit_name();
        let relative = expand_slice(&cgroups_path.parent)?.join(&unit_name);
        tracing::debug!(%cgroups_path, %unit_name, ?relative, "resolved systemd cgroup");

        Ok(Self {
            cgroups_path,
            unit_name,
            inner: V2Manager::new(root_path, relative),
        })
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    pub fn cgroups_path(&self) -> &CgroupsPath {
        &self.cgroups_path
    }
}

impl CgroupManager for Manager {
    type Error = SystemdManagerError;

    fn add_task(&self, pid: Pid) -> Result<(), Self::Error> {
        tracing::debug!(unit = %self.unit_name, %pid, "adding task to systemd unit cgroup");
        self.inner.add_task(pid)?;
        Ok(())
    }

    fn apply(&self, controller_opt: &ControllerOpt) -> Result<(), Self::Error> {
        self.inner.apply(controller_opt)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), Self::Error> {
        self.inner.remove()?;
        Ok(())
    }

    fn path(&self) -> &Path {
        self.inner.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_slice() -> anyhow::Result<()> {
        assert_eq!(expand_slice("system.slice")?, PathBuf::from("/system.slice"));
        assert_eq!(
            expand_slice("a-b-c.slice")?,
            PathBuf::from("/a.slice/a-b.slice/a-b-c.slice")
        );
        assert_eq!(expand_slice("-.slice")?, PathBuf::from("/"));
        assert!(expand_slice("system").is_err());
        assert!(expand_slice("a--b.slice").is_err());
        assert!(expand_slice("a/b.slice").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_cgroups_path() -> anyhow::Result<()> {
        let parsed = CgroupsPath::parse(Path::new("system.slice:docker:123456"), "ignored")?;
        assert_eq!(parsed.parent, "system.slice");
        assert_eq!(parsed.prefix, "docker");
        assert_eq!(parsed.name, "123456");
        assert_eq!(parsed.unit_name(), "docker-123456.scope");

        let parsed = CgroupsPath::parse(Path::new(":docker:app.slice"), "ignored")?;
        assert_eq!(parsed.parent, DEFAULT_SLICE);
        assert_eq!(parsed.unit_name(), "app.slice");

        let parsed = CgroupsPath::parse(Path::new(""), "web")?;
        assert_eq!(parsed.unit_name(), "ferrocell-web.scope");
        Ok(())
    }

    #[test]
    fn test_bad_cgroups_path() {
        for bad in ["/ferrocell/abc", "a:b", "a:b:c:d", "system.slice:docker:"] {
            assert!(
                matches!(
                    CgroupsPath::parse(Path::new(bad), "x"),
                    Err(SystemdManagerError::BadCgroupsPath(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_manager_path_under_unified_root() -> anyhow::Result<()> {
        let manager = Manager::new(
            PathBuf::from("/sys/fs/cgroup"),
            Path::new("user-1000.slice:ferrocell:abc"),
            "abc",
        )?;
        assert_eq!(manager.unit_name(), "ferrocell-abc.scope");
        assert_eq!(
            manager.path(),
            Path::new("/sys/fs/cgroup/user.slice/user-1000.slice/ferrocell-abc.scope")
        );
        Ok(())
    }
}
