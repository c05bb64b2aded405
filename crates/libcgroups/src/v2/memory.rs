use std::path::Path;

use oci_spec::runtime::LinuxMemory;

use super::controller::Controller;
use crate::common::{self, ControllerOpt, WrappedIoError};

const CGROUP_MEMORY_SWAP: &str = "memory.swap.max";
const CGROUP_MEMORY_MAX: &str = "memory.max";
const CGROUP_MEMORY_LOW: &str = "memory.low";

#[derive(thiserror::Error, Debug)]
pub enum V2MemoryControllerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("invalid memory value {0}")]
    MemoryValue(i64),
    #[error("invalid swap value {0}")]
    SwapValue(i64),
    #[error("swap memory ({swap}) should be bigger than memory limit ({limit})")]
    SwapTooSmall { swap: i64, limit: i64 },
    #[error("unable to set swap limit without memory limit")]
    SwapWithoutLimit,
    #[error("invalid memory reservation value: {0}")]
    MemoryReservation(i64),
}

pub struct Memory {}

impl Controller for Memory {
    type Error = V2MemoryControllerError;

    fn apply(controller_opt: &ControllerOpt, cgroup_path: &Path) -> Result<(), Self::Error> {
        if let Some(memory) = &controller_opt.resources.memory() {
            Self::apply(cgroup_path, memory)?;
        }

        Ok(())
    }
}

impl Memory {
    fn set<P: AsRef<Path>>(path: P, val: i64) -> Result<(), WrappedIoError> {
        match val {
            0 => Ok(()),
            -1 => common::write_cgroup_file_str(path, "max"),
            _ => common::write_cgroup_file(path, val),
        }
    }

    fn apply(path: &Path, memory: &LinuxMemory) -> Result<(), V2MemoryControllerError> {
        match memory.limit() {
            Some(limit) if limit < -1 => {
                return Err(V2MemoryControllerError::MemoryValue(limit));
            }
            Some(limit) => match memory.swap() {
                Some(swap) if swap < -1 => {
                    return Err(V2MemoryControllerError::SwapValue(swap));
                }
                Some(swap) => {
                    // -1 means max
                    if swap == -1 || limit == -1 {
                        Memory::set(path.join(CGROUP_MEMORY_SWAP), swap)?;
                    } else {
                        if swap < limit {
                            return Err(V2MemoryControllerError::SwapTooSmall { swap, limit });
                        }

                        // the runtime spec swap value is memory+swap as in cgroup v1,
                        // cgroup v2 takes the swap part alone
                        Memory::set(path.join(CGROUP_MEMORY_SWAP), swap - limit)?;
                    }
                    Memory::set(path.join(CGROUP_MEMORY_MAX), limit)?;
                }
                None => {
                    if limit == -1 {
                        Memory::set(path.join(CGROUP_MEMORY_SWAP), -1)?;
                    }
                    Memory::set(path.join(CGROUP_MEMORY_MAX), limit)?;
                }
            },
            None => {
                if memory.swap().is_some() {
                    return Err(V2MemoryControllerError::SwapWithoutLimit);
                }
            }
        };

        if let Some(reservation) = memory.reservation() {
            if reservation < -1 {
                return Err(V2MemoryControllerError::MemoryReservation(reservation));
            }
            Memory::set(path.join(CGROUP_MEMORY_LOW), reservation)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use oci_spec::runtime::LinuxMemoryBuilder;

    use super::*;
    use crate::test::{create_temp_dir, set_fixture};

    #[test]
    fn test_swap_is_converted_to_v2_semantics() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "")?;
        set_fixture(tmp.path(), CGROUP_MEMORY_SWAP, "")?;
        set_fixture(tmp.path(), CGROUP_MEMORY_LOW, "")?;

        let memory = LinuxMemoryBuilder::default()
            .limit(1024i64)
            .swap(4096i64)
            .reservation(512i64)
            .build()?;
        Memory::apply(tmp.path(), &memory)?;

        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_MEMORY_MAX))?, "1024");
        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_MEMORY_SWAP))?, "3072");
        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_MEMORY_LOW))?, "512");
        Ok(())
    }

    #[test]
    fn test_unlimited_memory() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        set_fixture(tmp.path(), CGROUP_MEMORY_MAX, "")?;
        set_fixture(tmp.path(), CGROUP_MEMORY_SWAP, "")?;

        let memory = LinuxMemoryBuilder::default().limit(-1i64).build()?;
        Memory::apply(tmp.path(), &memory)?;

        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_MEMORY_MAX))?, "max");
        assert_eq!(fs::read_to_string(tmp.path().join(CGROUP_MEMORY_SWAP))?, "max");
        Ok(())
    }

    #[test]
    fn test_swap_smaller_than_limit_is_rejected() -> anyhow::Result<()> {
        let tmp = create_temp_dir()?;
        let memory = LinuxMemoryBuilder::default()
            .limit(4096i64)
            .swap(1024i64)
            .build()?;
        assert!(matches!(
            Memory::apply(tmp.path(), &memory),
            Err(V2MemoryControllerError::SwapTooSmall { .. })
        ));
        Ok(())
    }
}
