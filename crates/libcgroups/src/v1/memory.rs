use std::path::Path;

use nix::errno::Errno;
use oci_spec::runtime::LinuxMemory;

use super::controller::Controller;
use crate::common::{self, ControllerOpt, WrappedIoError};

const CGROUP_MEMORY_SWAP_LIMIT: &str = "memory.memsw.limit_in_bytes";
const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";
const CGROUP_MEMORY_USAGE: &str = "memory.usage_in_bytes";
const CGROUP_MEMORY_RESERVATION: &str = "memory.soft_limit_in_bytes";

#[derive(thiserror::Error, Debug)]
pub enum V1MemoryControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("malformed value {value:?} in {path:?}")]
    MalformedValue {
        value: String,
        path: std::path::PathBuf,
    },
    #[error("unable to set memory limit to {target} (current usage: {current})")]
    UnableToSet { target: i64, current: u64 },
}

pub struct Memory {}

impl Controller for Memory {
    type Error = V1MemoryControllerError;
    type Resource = LinuxMemory;

    fn apply(controller_opt: &ControllerOpt, cgroup_root: &Path) -> Result<(), Self::Error> {
        tracing::debug!("apply memory cgroup v1 config");

        if let Some(memory) = Self::needs_to_handle(controller_opt) {
            if let Some(reservation) = memory.reservation() {
                Self::set(reservation, &cgroup_root.join(CGROUP_MEMORY_RESERVATION))?;
            }

            Self::apply(memory, cgroup_root)?;
        }

        Ok(())
    }

    fn needs_to_handle<'a>(controller_opt: &'a ControllerOpt) -> Option<&'a Self::Resource> {
        controller_opt.resources.memory().as_ref()
    }
}

impl Memory {
    fn set<T: ToString>(val: T, path: &Path) -> Result<(), WrappedIoError> {
        common::write_cgroup_file(path, val)
    }

    fn get_memory_usage(cgroup_root: &Path) -> Result<u64, V1MemoryControllerError> {
        let path = cgroup_root.join(CGROUP_MEMORY_USAGE);
        let contents = common::read_cgroup_file(&path)?;
        contents
            .trim()
            .parse()
            .map_err(|_| V1MemoryControllerError::MalformedValue {
                value: contents.clone(),
                path,
            })
    }

    fn get_memory_limit(cgroup_root: &Path) -> Result<i64, V1MemoryControllerError> {
        let path = cgroup_root.join(CGROUP_MEMORY_LIMIT);
        let contents = common::read_cgroup_file(&path)?;
        let trimmed = contents.trim();
        if trimmed == "max" {
            return Ok(i64::MAX);
        }

        // an unlimited v1 limit is reported as a value above i64::MAX
        match trimmed.parse::<i64>() {
            Ok(val) => Ok(val),
            Err(_) if trimmed.parse::<u64>().is_ok() => Ok(i64::MAX),
            Err(_) => Err(V1MemoryControllerError::MalformedValue {
                value: contents.clone(),
                path,
            }),
        }
    }

    fn set_memory(val: i64, cgroup_root: &Path) -> Result<(), V1MemoryControllerError> {
        if val == 0 {
            return Ok(());
        }

        match Self::set(val, &cgroup_root.join(CGROUP_MEMORY_LIMIT)) {
            Ok(()) => Ok(()),
            Err(err) => match err.inner().raw_os_error().map(Errno::from_raw) {
                Some(Errno::EBUSY) => Err(V1MemoryControllerError::UnableToSet {
                    target: val,
                    current: Self::get_memory_usage(cgroup_root)?,
                }),
                _ => Err(err.into()),
            },
        }
    }

    fn set_swap(swap: i64, cgroup_root: &Path) -> Result<(), V1MemoryControllerError> {
        if swap == 0 {
            return Ok(());
        }

        Self::set(swap, &cgroup_root.join(CGROUP_MEMORY_SWAP_LIMIT))?;
        Ok(())
    }

    fn apply(resource: &LinuxMemory, cgroup_root: &Path) -> Result<(), V1MemoryControllerError> {
        let limit = resource.limit().unwrap_or(0);
        let swap = match (resource.limit(), resource.swap()) {
            (_, Some(swap)) => swap,
            (Some(-1), None) => -1,
            _ => 0,
        };

        // memsw must never drop below the memory limit, so the write order
        // depends on whether swap is growing past the current limit
        let swap_first = swap == -1 || (swap != 0 && Self::get_memory_limit(cgroup_root)? < swap);
        if swap_first {
            Self::set_swap(swap, cgroup_root)?;
            Self::set_memory(limit, cgroup_root)?;
        } else {
            Self::set_memory(limit, cgroup_root)?;
            Self::set_swap(swap, cgroup_root)?;
        }

        Ok(())
    }
}
