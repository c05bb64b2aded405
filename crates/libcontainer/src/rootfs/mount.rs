use std::fs::{canonicalize, create_dir_all, OpenOptions};
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use oci_spec::runtime::Mount as SpecMount;
use procfs::process::{MountInfo, MountOptFields, Process};

use super::symlink::SymlinkError;
use super::utils::{parse_mount, MountOptionConfig};
use crate::syscall::syscall::create_syscall;
use crate::syscall::Syscall;

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("no source in mount spec for {0:?}")]
    NoSource(PathBuf),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("syscall")]
    Syscall(#[from] crate::syscall::SyscallError),
    #[error("symlink")]
    Symlink(#[from] SymlinkError),
    #[error("procfs failed")]
    Procfs(#[from] procfs::ProcError),
    #[error("unknown mount option: {0}")]
    UnsupportedMountOption(String),
    #[error("invalid rootfs propagation mode: {0}")]
    InvalidPropagation(String),
    #[error("can't find the parent mount of {0:?}")]
    NoParentMount(PathBuf),
}

type Result<T> = std::result::Result<T, MountError>;

#[derive(Debug)]
pub struct MountOptions<'a> {
    pub root: &'a Path,
}

pub struct Mount {
    syscall: Box<dyn Syscall>,
}

impl Default for Mount {
    fn default() -> Self {
        Self::new()
    }
}

impl Mount {
    pub fn new() -> Mount {
        Mount {
            syscall: create_syscall(),
        }
    }

    pub fn new_with_syscall(syscall: Box<dyn Syscall>) -> Mount {
        Mount { syscall }
    }

    /// Applies one entry of the spec mount list under the new root. Cgroup
    /// filesystems are left to the cgroup manager.
    pub fn setup_mount(&self, mount: &SpecMount, options: &MountOptions) -> Result<()> {
        tracing::debug!("mounting {:?}", mount);
        let mut mount_option_config = parse_mount(mount)?;

        match mount.typ().as_deref() {
            Some("cgroup") | Some("cgroup2") => {
                tracing::debug!(destination = ?mount.destination(), "skipping cgroup mount");
            }
            _ => {
                if *mount.destination() == PathBuf::from("/dev") {
                    mount_option_config.flags &= !MsFlags::MS_RDONLY;
                }

                self.mount_into_container(mount, options.root, &mount_option_config)
                    .map_err(|err| {
                        tracing::error!("failed to mount {:?}: {}", mount, err);
                        err
                    })?;
            }
        }

        Ok(())
    }

    /// Make parent mount of rootfs private if it was shared, which is required by pivot_root.
    /// It also makes sure following bind mount does not propagate in other namespaces.
    pub fn make_parent_mount_private(&self, rootfs: &Path) -> Result<Option<MountInfo>> {
        let mount_infos = Process::myself()
            .map_err(|err| {
                tracing::error!("failed to get /proc/self: {}", err);
                err
            })?
            .mountinfo()
            .map_err(|err| {
                tracing::error!("failed to get mount info: {}", err);
                err
            })?;
        let parent_mount = find_parent_mount(rootfs, mount_infos.0)?;

        // check parent mount has 'shared' propagation type
        if parent_mount
            .opt_fields
            .iter()
            .any(|field| matches!(field, MountOptFields::Shared(_)))
        {
            self.syscall.mount(
                None,
                &parent_mount.mount_point,
                None,
                MsFlags::MS_PRIVATE,
                None,
            )?;
            Ok(Some(parent_mount))
        } else {
            Ok(None)
        }
    }

    fn mount_into_container(
        &self,
        m: &SpecMount,
        rootfs: &Path,
        mount_option_config: &MountOptionConfig,
    ) -> Result<()> {
        let typ = m.typ().as_deref();
        let is_bind = typ == Some("bind") || mount_option_config.flags.contains(MsFlags::MS_BIND);

        let dest = safe_path::scoped_join(rootfs, m.destination()).map_err(|err| {
            tracing::error!(
                "failed to join rootfs {:?} with mount destination {:?}: {}",
                rootfs,
                m.destination(),
                err
            );
            err
        })?;

        let src = if is_bind {
            let source = m
                .source()
                .as_ref()
                .ok_or_else(|| MountError::NoSource(m.destination().clone()))?;
            let src = canonicalize(source).map_err(|err| {
                tracing::error!("failed to canonicalize {:?}: {}", source, err);
                err
            })?;
            create_bind_target(&src, &dest)?;
            Some(src)
        } else {
            create_dir_all(&dest).map_err(|err| {
                tracing::error!("failed to create mount destination {:?}: {}", dest, err);
                err
            })?;
            m.source().clone()
        };

        let data = if mount_option_config.data.is_empty() {
            None
        } else {
            Some(mount_option_config.data.as_str())
        };
        self.syscall
            .mount(
                src.as_deref(),
                &dest,
                typ,
                mount_option_config.flags,
                data,
            )
            .map_err(|err| {
                tracing::error!("failed to mount {src:?} to {dest:?}");
                err
            })?;

        // a bind mount ignores every flag but MS_REC until it is remounted
        if is_bind
            && mount_option_config
                .flags
                .intersects(!(MsFlags::MS_REC | MsFlags::MS_REMOUNT | MsFlags::MS_BIND))
        {
            self.syscall
                .mount(
                    Some(&dest),
                    &dest,
                    None,
                    mount_option_config.flags | MsFlags::MS_REMOUNT,
                    None,
                )
                .map_err(|err| {
                    tracing::error!("failed to remount {:?}: {}", dest, err);
                    err
                })?;
        }

        if !mount_option_config.propagation.is_empty() {
            self.syscall
                .mount(None, &dest, None, mount_option_config.propagation, None)
                .map_err(|err| {
                    tracing::error!("failed to change propagation of {:?}: {}", dest, err);
                    err
                })?;
        }

        Ok(())
    }
}

fn create_bind_target(src: &Path, dest: &Path) -> Result<()> {
    if src.is_dir() {
        create_dir_all(dest).map_err(|err| {
            tracing::error!("failed to create dir for bind mount {:?}: {}", dest, err);
            err
        })?;
        return Ok(());
    }

    if let Some(parent) = dest.parent() {
        create_dir_all(parent).map_err(|err| {
            tracing::error!("failed to create dir for bind mount {:?}: {}", parent, err);
            err
        })?;
    }
    if !dest.exists() {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dest)
            .map_err(|err| {
                tracing::error!("failed to create file for bind mount {:?}: {}", src, err);
                err
            })?;
    }

    Ok(())
}

/// Find parent mount of rootfs in given mount infos
pub fn find_parent_mount(rootfs: &Path, mount_infos: Vec<MountInfo>) -> Result<MountInfo> {
    // find the longest mount point
    mount_infos
        .into_iter()
        .filter(|mi| rootfs.starts_with(&mi.mount_point))
        .max_by(|mi1, mi2| {
            mi1.mount_point
                .as_os_str()
                .len()
                .cmp(&mi2.mount_point.as_os_str().len())
        })
        .ok_or_else(|| MountError::NoParentMount(rootfs.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::{Context, Result};
    use oci_spec::runtime::MountBuilder;

    use super::*;
    use crate::syscall::test::{MountArgs, TestHelperSyscall};

    fn helper(mount: &Mount) -> &TestHelperSyscall {
        mount
            .syscall
            .as_any()
            .downcast_ref::<TestHelperSyscall>()
            .unwrap()
    }

    fn test_mount() -> Mount {
        Mount::new_with_syscall(Box::<TestHelperSyscall>::default())
    }

    fn options(opts: &[&str]) -> Vec<String> {
        opts.iter().map(|o| o.to_string()).collect()
    }

    #[test]
    fn test_mount_proc() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let m = test_mount();
        let proc = MountBuilder::default()
            .destination("/proc")
            .typ("proc")
            .source("proc")
            .options(options(&["nosuid", "noexec", "nodev"]))
            .build()?;
        m.setup_mount(&proc, &MountOptions { root: tmp.path() })?;

        assert!(tmp.path().join("proc").is_dir());
        assert_eq!(
            helper(&m).get_mount_args(),
            vec![MountArgs {
                source: Some(PathBuf::from("proc")),
                target: tmp.path().join("proc"),
                fstype: Some("proc".to_string()),
                flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV,
                data: None,
            }]
        );
        Ok(())
    }

    #[test]
    fn test_mount_dev_is_never_readonly() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let m = test_mount();
        let dev = MountBuilder::default()
            .destination("/dev")
            .typ("tmpfs")
            .source("tmpfs")
            .options(options(&["nosuid", "strictatime", "mode=755", "size=65536k", "ro"]))
            .build()?;
        m.setup_mount(&dev, &MountOptions { root: tmp.path() })?;

        let got = helper(&m).get_mount_args();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].flags, MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME);
        assert_eq!(got[0].data.as_deref(), Some("mode=755,size=65536k"));
        Ok(())
    }

    #[test]
    fn test_bind_mount_file_creates_target_and_remounts() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let rootfs = tmp.path().join("rootfs");
        std::fs::create_dir(&rootfs)?;
        let source = tmp.path().join("resolv.conf");
        std::fs::write(&source, "nameserver 127.0.0.1")?;

        let m = test_mount();
        let bind = MountBuilder::default()
            .destination("/etc/resolv.conf")
            .typ("bind")
            .source(&source)
            .options(options(&["rbind", "ro", "rprivate"]))
            .build()?;
        m.setup_mount(&bind, &MountOptions { root: &rootfs })?;

        let target = rootfs.join("etc/resolv.conf");
        assert!(target.is_file());

        let got = helper(&m).get_mount_args();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].source, Some(source.canonicalize()?));
        assert_eq!(got[0].target, target);
        assert_eq!(
            got[0].flags,
            MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_RDONLY
        );
        assert_eq!(
            got[1].flags,
            MsFlags::MS_BIND | MsFlags::MS_REC | MsFlags::MS_RDONLY | MsFlags::MS_REMOUNT
        );
        assert_eq!(got[2].source, None);
        assert_eq!(got[2].flags, MsFlags::MS_PRIVATE | MsFlags::MS_REC);
        Ok(())
    }

    #[test]
    fn test_bind_mount_dir_without_extra_flags() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let rootfs = tmp.path().join("rootfs");
        let source = tmp.path().join("data");
        std::fs::create_dir(&rootfs)?;
        std::fs::create_dir(&source)?;

        let m = test_mount();
        let bind = MountBuilder::default()
            .destination("/data")
            .typ("bind")
            .source(&source)
            .options(options(&["bind"]))
            .build()?;
        m.setup_mount(&bind, &MountOptions { root: &rootfs })?;

        assert!(rootfs.join("data").is_dir());
        assert_eq!(helper(&m).get_mount_args().len(), 1);
        Ok(())
    }

    #[test]
    fn test_bind_mount_requires_source() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let m = test_mount();
        let bind = MountBuilder::default()
            .destination("/data")
            .typ("bind")
            .options(options(&["rbind"]))
            .build()?;
        assert!(matches!(
            m.setup_mount(&bind, &MountOptions { root: tmp.path() }),
            Err(MountError::NoSource(_))
        ));
        Ok(())
    }

    #[test]
    fn test_cgroup_mount_is_skipped() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let m = test_mount();
        let cgroup = MountBuilder::default()
            .destination("/sys/fs/cgroup")
            .typ("cgroup")
            .source("cgroup")
            .options(options(&["nosuid", "noexec", "nodev", "relatime", "ro"]))
            .build()?;
        m.setup_mount(&cgroup, &MountOptions { root: tmp.path() })?;

        assert!(helper(&m).get_mount_args().is_empty());
        assert!(!tmp.path().join("sys").exists());
        Ok(())
    }

    #[test]
    fn test_find_parent_mount() -> Result<()> {
        let mount_infos = vec![
            MountInfo {
                mnt_id: 11,
                pid: 10,
                majmin: "".to_string(),
                root: "/".to_string(),
                mount_point: PathBuf::from("/"),
                mount_options: HashMap::new(),
                opt_fields: vec![],
                fs_type: "ext4".to_string(),
                mount_source: Some("/dev/sda1".to_string()),
                super_options: HashMap::new(),
            },
            MountInfo {
                mnt_id: 12,
                pid: 11,
                majmin: "".to_string(),
                root: "/".to_string(),
                mount_point: PathBuf::from("/proc"),
                mount_options: HashMap::new(),
                opt_fields: vec![],
                fs_type: "proc".to_string(),
                mount_source: Some("proc".to_string()),
                super_options: HashMap::new(),
            },
        ];

        let res = find_parent_mount(Path::new("/path/to/rootfs"), mount_infos)
            .context("failed to get parent mount")?;
        assert_eq!(res.mnt_id, 11);
        Ok(())
    }

    #[test]
    fn test_find_parent_mount_with_empty_mount_infos() {
        let mount_infos = vec![];
        let res = find_parent_mount(Path::new("/path/to/rootfs"), mount_infos);
        assert!(res.is_err());
    }
}
