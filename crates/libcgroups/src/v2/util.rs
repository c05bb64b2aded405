use std::path::{Path, PathBuf};

use procfs::process::Process;
use procfs::ProcError;

use super::controller_type::{ControllerType, CONTROLLER_TYPES};
use crate::common::{self, WrappedIoError};

pub const CGROUP_CONTROLLERS: &str = "cgroup.controllers";
pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";

#[derive(thiserror::Error, Debug)]
pub enum V2UtilError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("proc error: {0}")]
    Proc(#[from] ProcError),
    #[error("could not find mountpoint for unified")]
    CouldNotFind,
}

pub fn get_unified_mount_point() -> Result<PathBuf, V2UtilError> {
    Process::myself()?
        .mountinfo()?
        .0
        .into_iter()
        .find(|m| m.fs_type == "cgroup2")
        .map(|m| m.mount_point)
        .ok_or(V2UtilError::CouldNotFind)
}

/// Lists the known controllers enabled for children of the given cgroup
pub fn get_available_controllers<P: AsRef<Path>>(
    root_path: P,
) -> Result<Vec<ControllerType>, V2UtilError> {
    let controllers_path = root_path.as_ref().join(CGROUP_CONTROLLERS);
    let content = common::read_cgroup_file(controllers_path)?;
    let available = content.split_whitespace().collect::<Vec<_>>();

    Ok(CONTROLLER_TYPES
        .iter()
        .filter(|c| available.contains(&c.to_string().as_str()))
        .copied()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{create_temp_dir, set_fixture};

    #[test]
    fn test_unknown_controllers_are_ignored() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        set_fixture(tmp.path(), CGROUP_CONTROLLERS, "cpuset cpu io memory hugetlb pids rdma\n")?;

        let controllers = get_available_controllers(tmp.path())?;
        assert_eq!(
            controllers,
            vec![ControllerType::Cpu, ControllerType::Memory, ControllerType::Pids]
        );
        Ok(())
    }
}
