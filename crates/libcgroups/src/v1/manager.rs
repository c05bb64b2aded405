use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use super::controller::Controller;
use super::controller_type::CONTROLLERS;
use super::cpu::Cpu;
use super::memory::{Memory, V1MemoryControllerError};
use super::pids::Pids;
use super::util::{self, V1MountPointError};
use super::ControllerType;
use crate::common::{self, CgroupManager, ControllerOpt, WrappedIoError};

#[derive(thiserror::Error, Debug)]
pub enum V1ManagerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("mount point error: {0}")]
    MountPoint(#[from] V1MountPointError),
    #[error("no cgroup v1 subsystem is mounted")]
    NoSubsystems,
    #[error("memory controller error: {0}")]
    Memory(#[from] V1MemoryControllerError),
}

/// Manages one cgroup directory per mounted subsystem
#[derive(Debug)]
pub struct Manager {
    subsystems: HashMap<ControllerType, PathBuf>,
    // the cpu subsystem path, or any mounted one, reported as the manager path
    primary: PathBuf,
}

impl Manager {
    /// Constructs a new cgroup manager with cgroups_path being relative to
    /// the root of each subsystem
    pub fn any(cgroup_path: &Path) -> Result<Self, V1ManagerError> {
        let mut subsystems = HashMap::new();
        for subsystem in CONTROLLERS {
            match util::get_subsystem_mount_point(subsystem) {
                Ok(mount_point) => {
                    subsystems.insert(
                        *subsystem,
                        common::join_cgroup_path(&mount_point, cgroup_path),
                    );
                }
                Err(V1MountPointError::NotFound { .. }) => {
                    tracing::warn!(%subsystem, "cgroup v1 subsystem is not mounted, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Self::with_subsystems(subsystems)
    }

    fn with_subsystems(subsystems: HashMap<ControllerType, PathBuf>) -> Result<Self, V1ManagerError> {
        let primary = CONTROLLERS
            .iter()
            .find_map(|c| subsystems.get(c))
            .cloned()
            .ok_or(V1ManagerError::NoSubsystems)?;

        Ok(Manager {
            subsystems,
            primary,
        })
    }
}

impl CgroupManager for Manager {
    type Error = V1ManagerError;

    fn add_task(&self, pid: Pid) -> Result<(), Self::Error> {
        for (subsystem, path) in &self.subsystems {
            tracing::debug!(%subsystem, ?path, %pid, "adding task");
            match subsystem {
                ControllerType::Cpu => Cpu::add_task(pid, path)?,
                ControllerType::Memory => Memory::add_task(pid, path)?,
                ControllerType::Pids => Pids::add_task(pid, path)?,
            }
        }

        Ok(())
    }

    fn apply(&self, controller_opt: &ControllerOpt) -> Result<(), Self::Error> {
        for (subsystem, path) in &self.subsystems {
            match subsystem {
                ControllerType::Cpu => <Cpu as Controller>::apply(controller_opt, path)?,
                ControllerType::Memory => <Memory as Controller>::apply(controller_opt, path)?,
                ControllerType::Pids => <Pids as Controller>::apply(controller_opt, path)?,
            }
        }

        Ok(())
    }

    fn remove(&self) -> Result<(), Self::Error> {
        for (subsystem, path) in &self.subsystems {
            tracing::debug!(%subsystem, ?path, "removing cgroup");
            common::remove_cgroup_dir(path)?;
        }

        Ok(())
    }

    fn path(&self) -> &Path {
        &self.primary
    }
}
