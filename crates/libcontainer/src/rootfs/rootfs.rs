use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sys::statvfs::{statvfs, FsFlags};
use oci_spec::runtime::{Linux, Spec};

use super::device::{Device, DeviceError};
use super::mount::{Mount, MountError, MountOptions};
use super::symlink::{Symlink, SymlinkError};
use super::utils::{default_devices, propagation_flags};
use crate::syscall::syscall::create_syscall;
use crate::syscall::{Syscall, SyscallError};

#[derive(Debug, thiserror::Error)]
pub enum RootfsError {
    #[error("failed to set up mounts")]
    Mount(#[from] MountError),
    #[error("failed to create devices")]
    Device(#[from] DeviceError),
    #[error("failed to create symlinks")]
    Symlink(#[from] SymlinkError),
    #[error("failed to change propagation of / to {flags:?}")]
    Propagation { flags: MsFlags, source: SyscallError },
    #[error("failed to bind mount the rootfs {path:?} onto itself")]
    BindRootfs { path: PathBuf, source: SyscallError },
    #[error("failed to pivot into {path:?}")]
    Pivot { path: PathBuf, source: SyscallError },
    #[error("failed to make {path:?} read only")]
    ReadonlyPath { path: PathBuf, source: SyscallError },
    #[error("failed to stat {path:?}")]
    Stat { path: PathBuf, source: nix::Error },
    #[error("failed to mask {path:?}")]
    MaskPath { path: PathBuf, source: SyscallError },
    #[error("failed to inspect masked path {path:?}")]
    MaskPathMetadata {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, RootfsError>;

pub struct RootFS {
    syscall: Box<dyn Syscall>,
}

impl Default for RootFS {
    fn default() -> Self {
        Self::new()
    }
}

impl RootFS {
    pub fn new() -> RootFS {
        RootFS {
            syscall: create_syscall(),
        }
    }

    pub fn new_with_syscall(syscall: Box<dyn Syscall>) -> RootFS {
        RootFS { syscall }
    }

    /// Builds the new root under `rootfs` up to the point where it can be
    /// pivoted into: propagation of `/`, the self bind of the rootfs, the
    /// spec mounts, device nodes and the /dev symlinks.
    #[tracing::instrument(level = "debug", skip(self, spec))]
    pub fn prepare_rootfs(&self, spec: &Spec, rootfs: &Path) -> Result<()> {
        let default_linux = Linux::default();
        let linux = spec.linux().as_ref().unwrap_or(&default_linux);
        let flags = propagation_flags(linux.rootfs_propagation().as_deref())?;

        self.adjust_root_mount_propagation(flags)?;

        let mounter = Mount::new();
        mounter.make_parent_mount_private(rootfs)?;

        tracing::debug!("bind mounting the rootfs onto itself");
        self.syscall
            .mount(
                Some(rootfs),
                rootfs,
                None,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None,
            )
            .map_err(|err| {
                tracing::error!(?err, ?rootfs, "failed to bind mount the rootfs");
                RootfsError::BindRootfs {
                    path: rootfs.to_path_buf(),
                    source: err,
                }
            })?;

        let options = MountOptions { root: rootfs };
        if let Some(mounts) = spec.mounts() {
            for mount in mounts {
                mounter.setup_mount(mount, &options)?;
            }
        }

        let device = Device::new();
        device.create_devices(rootfs, &default_devices()?)?;
        if let Some(devices) = linux.devices() {
            device.create_devices(rootfs, devices)?;
        }

        let symlink = Symlink::new();
        symlink.setup_ptmx(rootfs)?;
        symlink.setup_default_symlinks(rootfs)?;

        Ok(())
    }

    pub fn pivot(&self, rootfs: &Path) -> Result<()> {
        self.syscall
            .pivot_rootfs(rootfs)
            .map_err(|err| RootfsError::Pivot {
                path: rootfs.to_path_buf(),
                source: err,
            })
    }

    /// Sets the propagation type of the mount at `/`. Called before the
    /// rootfs is built and again after pivot_root, which can reset it.
    pub fn adjust_root_mount_propagation(&self, flags: MsFlags) -> Result<()> {
        tracing::debug!(?flags, "changing propagation of /");
        self.syscall
            .mount(None, Path::new("/"), None, flags, None)
            .map_err(|err| {
                tracing::error!(?err, ?flags, "failed to change propagation of /");
                RootfsError::Propagation { flags, source: err }
            })
    }

    /// Bind mounts each path onto itself and remounts it read only, keeping
    /// the nosuid, nodev and noexec flags it already had. Paths that don't
    /// exist are skipped.
    pub fn apply_readonly_paths(&self, paths: &[String]) -> Result<()> {
        for path in paths.iter().map(Path::new) {
            match self.syscall.mount(
                Some(path),
                path,
                None,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None,
            ) {
                Ok(()) => {}
                Err(SyscallError::Nix(Errno::ENOENT)) => {
                    tracing::debug!(?path, "readonly path does not exist");
                    continue;
                }
                Err(err) => {
                    tracing::error!(?err, ?path, "failed to bind readonly path");
                    return Err(RootfsError::ReadonlyPath {
                        path: path.to_path_buf(),
                        source: err,
                    });
                }
            }

            let existing = statvfs(path).map_err(|err| RootfsError::Stat {
                path: path.to_path_buf(),
                source: err,
            })?;
            let mut flags =
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC;
            for (fs_flag, ms_flag) in [
                (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
                (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
                (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
            ] {
                if existing.flags().contains(fs_flag) {
                    flags |= ms_flag;
                }
            }

            self.syscall
                .mount(Some(path), path, None, flags, None)
                .map_err(|err| {
                    tracing::error!(?err, ?path, "failed to remount readonly path");
                    RootfsError::ReadonlyPath {
                        path: path.to_path_buf(),
                        source: err,
                    }
                })?;
        }

        Ok(())
    }

    /// Hides each path: a directory gets an empty read only tmpfs on top, a
    /// file gets /dev/null bound over it, a missing path is skipped.
    pub fn apply_masked_paths(&self, paths: &[String]) -> Result<()> {
        for path in paths.iter().map(Path::new) {
            let metadata = match std::fs::metadata(path) {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(?path, "masked path does not exist");
                    continue;
                }
                Err(err) => {
                    return Err(RootfsError::MaskPathMetadata {
                        path: path.to_path_buf(),
                        source: err,
                    })
                }
            };

            let masked = if metadata.is_dir() {
                self.syscall.mount(
                    Some(Path::new("tmpfs")),
                    path,
                    Some("tmpfs"),
                    MsFlags::MS_RDONLY,
                    None,
                )
            } else {
                self.syscall.mount(
                    Some(Path::new("/dev/null")),
                    path,
                    None,
                    MsFlags::MS_BIND,
                    None,
                )
            };

            masked.map_err(|err| {
                tracing::error!(?err, ?path, "failed to mask path");
                RootfsError::MaskPath {
                    path: path.to_path_buf(),
                    source: err,
                }
            })?;
        }

        Ok(())
    }
}
