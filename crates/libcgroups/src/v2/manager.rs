use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use nix::unistd::Pid;

use super::controller::Controller;
use super::controller_type::ControllerType;
use super::cpu::{Cpu, V2CpuControllerError};
use super::memory::{Memory, V2MemoryControllerError};
use super::pids::Pids;
use super::util::{self, V2UtilError, CGROUP_SUBTREE_CONTROL};
use crate::common::{
    self, CgroupManager, ControllerOpt, WrapIoResult, WrappedIoError, CGROUP_PROCS,
};

#[derive(thiserror::Error, Debug)]
pub enum V2ManagerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("while working with util: {0}")]
    Util(#[from] V2UtilError),
    #[error("cpu controller error: {0}")]
    Cpu(#[from] V2CpuControllerError),
    #[error("memory controller error: {0}")]
    Memory(#[from] V2MemoryControllerError),
}

#[derive(Debug)]
pub struct Manager {
    root_path: PathBuf,
    cgroup_path: PathBuf,
    full_path: PathBuf,
}

impl Manager {
    /// Constructs a new cgroup manager with the unified mount point of the
    /// current process as root
    pub fn any(cgroup_path: &Path) -> Result<Self, V2ManagerError> {
        let root_path = util::get_unified_mount_point()?;
        Ok(Self::new(root_path, cgroup_path.to_path_buf()))
    }

    /// Constructs a new cgroup manager with root path being the mount point
    /// of a cgroup v2 fs and cgroup path being a relative path from the root
    pub fn new(root_path: PathBuf, cgroup_path: PathBuf) -> Self {
        let full_path = common::join_cgroup_path(&root_path, &cgroup_path);

        Self {
            root_path,
            cgroup_path,
            full_path,
        }
    }

    fn create_unified_cgroup(&self, pid: Pid) -> Result<(), V2ManagerError> {
        let controllers: Vec<String> = util::get_available_controllers(&self.root_path)?
            .iter()
            .map(|c| format!("+{c}"))
            .collect();

        Self::write_controllers(&self.root_path, &controllers)?;

        let mut current_path = self.root_path.clone();
        let mut components = self
            .cgroup_path
            .components()
            .filter(|c| !matches!(c, Component::RootDir))
            .peekable();
        while let Some(component) = components.next() {
            current_path = current_path.join(component);
            if !current_path.exists() {
                fs::create_dir(&current_path).wrap_create_dir(&current_path)?;
                fs::metadata(&current_path)
                    .wrap_other(&current_path)?
                    .permissions()
                    .set_mode(0o755);
            }

            // last component cannot have subtree_control enabled due to internal process constraint
            // if this were set, writing to the cgroups.procs file will fail with Erno 16 (device or resource busy)
            if components.peek().is_some() {
                Self::write_controllers(&current_path, &controllers)?;
            }
        }

        common::write_cgroup_file(self.full_path.join(CGROUP_PROCS), pid)?;
        Ok(())
    }

    fn write_controllers(path: &Path, controllers: &[String]) -> Result<(), WrappedIoError> {
        for controller in controllers {
            common::write_cgroup_file_str(path.join(CGROUP_SUBTREE_CONTROL), controller)?;
        }

        Ok(())
    }
}

impl CgroupManager for Manager {
    type Error = V2ManagerError;

    fn add_task(&self, pid: Pid) -> Result<(), Self::Error> {
        tracing::debug!(path = ?self.full_path, %pid, "adding task");
        self.create_unified_cgroup(pid)
    }

    fn apply(&self, controller_opt: &ControllerOpt) -> Result<(), Self::Error> {
        for controller in util::get_available_controllers(&self.root_path)? {
            match controller {
                ControllerType::Cpu => <Cpu as Controller>::apply(controller_opt, &self.full_path)?,
                ControllerType::Memory => {
                    <Memory as Controller>::apply(controller_opt, &self.full_path)?
                }
                ControllerType::Pids => {
                    <Pids as Controller>::apply(controller_opt, &self.full_path)?
                }
            }
        }

        Ok(())
    }

    fn remove(&self) -> Result<(), Self::Error> {
        tracing::debug!(path = ?self.full_path, "removing cgroup");
        common::remove_cgroup_dir(&self.full_path)?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.full_path
    }
}

#[cfg(test)]
mod tests {
    use oci_spec::runtime::{LinuxPidsBuilder, LinuxResourcesBuilder};

    use super::*;
    use crate::test::{create_temp_dir, set_fixture};
    use crate::v2::util::CGROUP_CONTROLLERS;

    #[test]
    fn test_add_task_creates_nested_cgroup() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        set_fixture(tmp.path(), CGROUP_CONTROLLERS, "cpu memory pids")?;
        set_fixture(tmp.path(), CGROUP_SUBTREE_CONTROL, "")?;
        // pre-create the intermediate and leaf files the kernel would provide
        let parent = tmp.path().join("ferrocell");
        fs::create_dir(&parent)?;
        set_fixture(&parent, CGROUP_SUBTREE_CONTROL, "")?;
        let leaf = parent.join("abc");
        fs::create_dir(&leaf)?;
        set_fixture(&leaf, CGROUP_PROCS, "")?;

        let manager = Manager::new(tmp.path().to_path_buf(), PathBuf::from("/ferrocell/abc"));
        manager.add_task(Pid::from_raw(1234))?;

        assert_eq!(fs::read_to_string(leaf.join(CGROUP_PROCS))?, "1234");
        assert!(!leaf.join(CGROUP_SUBTREE_CONTROL).exists());
        assert_eq!(manager.path(), leaf);
        Ok(())
    }

    #[test]
    fn test_apply_only_available_controllers() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        set_fixture(tmp.path(), CGROUP_CONTROLLERS, "pids")?;
        let leaf = tmp.path().join("abc");
        fs::create_dir(&leaf)?;
        set_fixture(&leaf, "pids.max", "")?;

        let resources = LinuxResourcesBuilder::default()
            .pids(LinuxPidsBuilder::default().limit(32).build()?)
            .build()?;
        let manager = Manager::new(tmp.path().to_path_buf(), PathBuf::from("abc"));
        manager.apply(&ControllerOpt { resources: &resources })?;

        assert_eq!(fs::read_to_string(leaf.join("pids.max"))?, "32");
        Ok(())
    }

    #[test]
    fn test_remove_cgroup() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        let leaf = tmp.path().join("abc");
        fs::create_dir(&leaf)?;

        let manager = Manager::new(tmp.path().to_path_buf(), PathBuf::from("abc"));
        manager.remove()?;
        assert!(!leaf.exists());
        // removing twice is fine
        manager.remove()?;
        Ok(())
    }
}
