use std::path::{Path, PathBuf};

use nix::sys::stat::{umask, Mode};
use nix::unistd::{Gid, Uid};
use oci_spec::runtime::{LinuxDevice, LinuxDeviceType};

use super::utils::to_sflag;
use crate::syscall::syscall::create_syscall;
use crate::syscall::Syscall;
use crate::utils::PathBufExt;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("{0:?} is not a valid device path")]
    InvalidDevicePath(PathBuf),
    #[error("device type {0:?} can't be created as a node")]
    InvalidDeviceType(LinuxDeviceType),
    #[error("failed syscall to create device")]
    Syscall(#[from] crate::syscall::SyscallError),
    #[error("failed to join {path:?} into the rootfs")]
    Join {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to prepare {path:?}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Build(#[from] oci_spec::OciSpecError),
}

type Result<T> = std::result::Result<T, DeviceError>;

pub struct Device {
    syscall: Box<dyn Syscall>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Device {
        Device {
            syscall: create_syscall(),
        }
    }

    pub fn new_with_syscall(syscall: Box<dyn Syscall>) -> Device {
        Device { syscall }
    }

    /// Creates a node under `rootfs` for every device. Runs with a zero umask
    /// so the requested file mode is applied as is.
    pub fn create_devices<'a, I>(&self, rootfs: &Path, devices: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a LinuxDevice>,
    {
        let old_mode = umask(Mode::empty());
        let created = devices.into_iter().try_for_each(|dev| {
            if !dev.path().starts_with("/dev") {
                tracing::error!(
                    "{:?} is not a valid device path starting with /dev",
                    dev.path()
                );
                return Err(DeviceError::InvalidDevicePath(dev.path().to_path_buf()));
            }

            self.mknod_dev(rootfs, dev)
        });
        umask(old_mode);

        created
    }

    fn mknod_dev(&self, rootfs: &Path, dev: &LinuxDevice) -> Result<()> {
        fn makedev(major: i64, minor: i64) -> u64 {
            ((minor & 0xff)
                | ((major & 0xfff) << 8)
                | ((minor & !0xff) << 12)
                | ((major & !0xfff) << 32)) as u64
        }

        let kind = to_sflag(dev.typ())?;
        let full_container_path = create_container_dev_path(rootfs, dev)?;

        // a node left over from the rootfs image would make mknod fail
        match std::fs::remove_file(&full_container_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(DeviceError::Prepare {
                    path: full_container_path,
                    source: err,
                })
            }
        }

        self.syscall
            .mknod(
                &full_container_path,
                kind,
                Mode::from_bits_truncate(dev.file_mode().unwrap_or(0)),
                makedev(dev.major(), dev.minor()),
            )
            .map_err(|err| {
                tracing::error!(
                    ?err,
                    path = ?full_container_path,
                    major = ?dev.major(),
                    minor = ?dev.minor(),
                    "failed to mknod device"
                );

                err
            })?;
        self.syscall
            .chown(
                &full_container_path,
                dev.uid().map(Uid::from_raw),
                dev.gid().map(Gid::from_raw),
            )
            .map_err(|err| {
                tracing::error!(
                    path = ?full_container_path,
                    ?err,
                    uid = ?dev.uid(),
                    gid = ?dev.gid(),
                    "failed to chown device"
                );

                err
            })?;

        Ok(())
    }
}

fn create_container_dev_path(rootfs: &Path, dev: &LinuxDevice) -> Result<PathBuf> {
    let relative_dev_path = dev
        .path()
        .as_relative()
        .map_err(|_| DeviceError::InvalidDevicePath(dev.path().to_path_buf()))?;
    let full_container_path =
        safe_path::scoped_join(rootfs, relative_dev_path).map_err(|err| {
            tracing::error!("failed to join {rootfs:?} with {:?}: {err}", dev.path());
            DeviceError::Join {
                path: dev.path().to_path_buf(),
                source: err,
            }
        })?;
    if let Some(parent) = full_container_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            tracing::error!(
                "failed to create parent dir of {:?}: {}",
                full_container_path,
                err
            );
            DeviceError::Prepare {
                path: parent.to_path_buf(),
                source: err,
            }
        })?;
    }

    Ok(full_container_path)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use nix::sys::stat::SFlag;
    use oci_spec::runtime::LinuxDeviceBuilder;
    use serial_test::serial;

    use super::*;
    use crate::rootfs::utils::default_devices;
    use crate::syscall::test::TestHelperSyscall;

    fn test_device() -> Device {
        Device::new_with_syscall(Box::<TestHelperSyscall>::default())
    }

    fn helper(device: &Device) -> &TestHelperSyscall {
        device
            .syscall
            .as_any()
            .downcast_ref::<TestHelperSyscall>()
            .unwrap()
    }

    #[test]
    #[serial]
    fn test_create_default_devices() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let device = test_device();
        let devices = default_devices()?;
        device.create_devices(tmp.path(), &devices)?;

        let mknods = helper(&device).get_mknod_args();
        assert_eq!(mknods.len(), 6);
        assert_eq!(mknods[0].path, tmp.path().join("dev/null"));
        assert_eq!(mknods[0].kind, SFlag::S_IFCHR);
        assert_eq!(mknods[0].perm, Mode::from_bits_truncate(0o666));
        assert_eq!(mknods[0].dev, nix::sys::stat::makedev(1, 3));
        assert_eq!(mknods[3].dev, nix::sys::stat::makedev(5, 0));

        let chowns = helper(&device).get_chown_args();
        assert_eq!(chowns.len(), 6);
        assert_eq!(chowns[0].owner, Some(Uid::from_raw(0)));
        assert_eq!(chowns[0].group, Some(Gid::from_raw(0)));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_create_block_device_owned_by_user() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let device = test_device();
        let sda = LinuxDeviceBuilder::default()
            .path("/dev/sda")
            .typ(LinuxDeviceType::B)
            .major(8)
            .minor(0)
            .file_mode(0o660u32)
            .uid(1000u32)
            .gid(1000u32)
            .build()?;
        device.create_devices(tmp.path(), &vec![sda])?;

        let mknods = helper(&device).get_mknod_args();
        assert_eq!(mknods[0].kind, SFlag::S_IFBLK);
        assert_eq!(mknods[0].dev, nix::sys::stat::makedev(8, 0));
        let chowns = helper(&device).get_chown_args();
        assert_eq!(chowns[0].owner, Some(Uid::from_raw(1000)));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_device_outside_dev_is_rejected() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let device = test_device();
        let bad = LinuxDeviceBuilder::default()
            .path("/etc/null")
            .typ(LinuxDeviceType::C)
            .major(1)
            .minor(3)
            .build()?;
        assert!(matches!(
            device.create_devices(tmp.path(), &vec![bad]),
            Err(DeviceError::InvalidDevicePath(_))
        ));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_device_type_all_is_rejected() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let device = test_device();
        let all = LinuxDeviceBuilder::default()
            .path("/dev/all")
            .typ(LinuxDeviceType::A)
            .build()?;
        assert!(matches!(
            device.create_devices(tmp.path(), &vec![all]),
            Err(DeviceError::InvalidDeviceType(LinuxDeviceType::A))
        ));
        assert!(helper(&device).get_mknod_args().is_empty());
        Ok(())
    }
}
