use std::path::Path;

use oci_spec::runtime::LinuxPids;

use super::controller::Controller;
use crate::common::{self, ControllerOpt, WrappedIoError};

const CGROUP_PIDS_MAX: &str = "pids.max";

pub struct Pids {}

impl Controller for Pids {
    type Error = WrappedIoError;

    fn apply(controller_opt: &ControllerOpt, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("apply pids cgroup v2 config");
        if let Some(pids) = &controller_opt.resources.pids() {
            Self::apply(cgroup_root, pids)?;
        }
        Ok(())
    }
}

impl Pids {
    fn apply(root_path: &Path, pids: &LinuxPids) -> Result<(), WrappedIoError> {
        let limit = if pids.limit() > 0 {
            pids.limit().to_string()
        } else {
            "max".to_string()
        };
        common::write_cgroup_file(root_path.join(CGROUP_PIDS_MAX), limit)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use oci_spec::runtime::LinuxPidsBuilder;

    use super::*;
    use crate::test::{create_temp_dir, set_fixture};

    #[test]
    fn test_negative_limit_means_max() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        set_fixture(tmp.path(), CGROUP_PIDS_MAX, "")?;

        let pids = LinuxPidsBuilder::default().limit(-1).build()?;
        Pids::apply(tmp.path(), &pids)?;

        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_PIDS_MAX))?, "max");
        Ok(())
    }
}
