use std::path::PathBuf;

use nix::mount::MsFlags;
use nix::sys::stat::SFlag;
use oci_spec::runtime::{LinuxDevice, LinuxDeviceBuilder, LinuxDeviceType, Mount};

use super::device::DeviceError;
use super::mount::MountError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptionConfig {
    /// Mount Flags.
    pub flags: MsFlags,

    /// Propagation change applied with a separate mount call once the mount exists.
    pub propagation: MsFlags,

    /// Mount data applied to the mount.
    pub data: String,
}

const PROPAGATION_FLAGS: MsFlags = MsFlags::MS_SHARED
    .union(MsFlags::MS_SLAVE)
    .union(MsFlags::MS_PRIVATE)
    .union(MsFlags::MS_UNBINDABLE);

/// Flags for the rootfs propagation mode. An absent mode is `rprivate`.
pub fn propagation_flags(rootfs_propagation: Option<&str>) -> Result<MsFlags, MountError> {
    let flags = match rootfs_propagation {
        None => MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        Some("shared") => MsFlags::MS_SHARED,
        Some("rshared") => MsFlags::MS_SHARED | MsFlags::MS_REC,
        Some("slave") => MsFlags::MS_SLAVE | MsFlags::MS_REC,
        Some("rslave") => MsFlags::MS_SLAVE | MsFlags::MS_REC,
        Some("private") => MsFlags::MS_PRIVATE,
        Some("rprivate") => MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        Some("unbindable") => MsFlags::MS_UNBINDABLE,
        Some("runbindable") => MsFlags::MS_UNBINDABLE | MsFlags::MS_REC,
        Some(unknown) => return Err(MountError::InvalidPropagation(unknown.to_owned())),
    };

    Ok(flags)
}

fn default_device(path: &str, major: i64, minor: i64) -> Result<LinuxDevice, DeviceError> {
    Ok(LinuxDeviceBuilder::default()
        .path(PathBuf::from(path))
        .typ(LinuxDeviceType::C)
        .major(major)
        .minor(minor)
        .file_mode(0o0666u32)
        .uid(0u32)
        .gid(0u32)
        .build()?)
}

/// Nodes every container gets regardless of the devices the spec lists
pub fn default_devices() -> Result<Vec<LinuxDevice>, DeviceError> {
    Ok(vec![
        default_device("/dev/null", 1, 3)?,
        default_device("/dev/zero", 1, 5)?,
        default_device("/dev/full", 1, 7)?,
        default_device("/dev/tty", 5, 0)?,
        default_device("/dev/urandom", 1, 9)?,
        default_device("/dev/random", 1, 8)?,
    ])
}

pub fn to_sflag(dev_type: LinuxDeviceType) -> Result<SFlag, DeviceError> {
    match dev_type {
        LinuxDeviceType::B => Ok(SFlag::S_IFBLK),
        LinuxDeviceType::C | LinuxDeviceType::U => Ok(SFlag::S_IFCHR),
        LinuxDeviceType::P => Ok(SFlag::S_IFIFO),
        LinuxDeviceType::A => Err(DeviceError::InvalidDeviceType(dev_type)),
    }
}

/// Splits the option list of a mount into flags, a propagation change and
/// the filesystem specific data string. Options the table doesn't know are
/// passed through as data.
pub fn parse_mount(m: &Mount) -> std::result::Result<MountOptionConfig, MountError> {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();

    if let Some(options) = &m.options() {
        for option in options {
            if let Some((is_clear, flag)) = match option.as_str() {
                "defaults" => Some((false, MsFlags::empty())),
                "ro" => Some((false, MsFlags::MS_RDONLY)),
                "rw" => Some((true, MsFlags::MS_RDONLY)),
                "suid" => Some((true, MsFlags::MS_NOSUID)),
                "nosuid" => Some((false, MsFlags::MS_NOSUID)),
                "dev" => Some((true, MsFlags::MS_NODEV)),
                "nodev" => Some((false, MsFlags::MS_NODEV)),
                "exec" => Some((true, MsFlags::MS_NOEXEC)),
                "noexec" => Some((false, MsFlags::MS_NOEXEC)),
                "sync" => Some((false, MsFlags::MS_SYNCHRONOUS)),
                "async" => Some((true, MsFlags::MS_SYNCHRONOUS)),
                "dirsync" => Some((false, MsFlags::MS_DIRSYNC)),
                "remount" => Some((false, MsFlags::MS_REMOUNT)),
                "mand" => Some((false, MsFlags::MS_MANDLOCK)),
                "nomand" => Some((true, MsFlags::MS_MANDLOCK)),
                "atime" => Some((true, MsFlags::MS_NOATIME)),
                "noatime" => Some((false, MsFlags::MS_NOATIME)),
                "diratime" => Some((true, MsFlags::MS_NODIRATIME)),
                "nodiratime" => Some((false, MsFlags::MS_NODIRATIME)),
                "bind" => Some((false, MsFlags::MS_BIND)),
                "rbind" => Some((false, MsFlags::MS_BIND | MsFlags::MS_REC)),
                "unbindable" => Some((false, MsFlags::MS_UNBINDABLE)),
                "runbindable" => Some((false, MsFlags::MS_UNBINDABLE | MsFlags::MS_REC)),
                "private" => Some((false, MsFlags::MS_PRIVATE)),
                "rprivate" => Some((false, MsFlags::MS_PRIVATE | MsFlags::MS_REC)),
                "shared" => Some((false, MsFlags::MS_SHARED)),
                "rshared" => Some((false, MsFlags::MS_SHARED | MsFlags::MS_REC)),
                "slave" => Some((false, MsFlags::MS_SLAVE)),
                "rslave" => Some((false, MsFlags::MS_SLAVE | MsFlags::MS_REC)),
                "relatime" => Some((false, MsFlags::MS_RELATIME)),
                "norelatime" => Some((true, MsFlags::MS_RELATIME)),
                "strictatime" => Some((false, MsFlags::MS_STRICTATIME)),
                "nostrictatime" => Some((true, MsFlags::MS_STRICTATIME)),
                unknown => {
                    if unknown == "idmap" || unknown == "ridmap" {
                        return Err(MountError::UnsupportedMountOption(unknown.to_string()));
                    }
                    None
                }
            } {
                if is_clear {
                    flags &= !flag;
                } else {
                    flags |= flag;
                }
                continue;
            }

            data.push(option.as_str());
        }
    }

    // the kernel rejects a propagation change mixed with any other mount
    let mut propagation = flags & PROPAGATION_FLAGS;
    if !propagation.is_empty() {
        propagation |= flags & MsFlags::MS_REC;
        flags &= !PROPAGATION_FLAGS;
    }

    Ok(MountOptionConfig {
        flags,
        propagation,
        data: data.join(","),
    })
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result};
    use oci_spec::runtime::MountBuilder;

    use super::*;

    fn options(opts: &[&str]) -> Result<MountOptionConfig> {
        let m = MountBuilder::default()
            .destination("/mnt")
            .options(opts.iter().map(|o| o.to_string()).collect::<Vec<String>>())
            .build()
            .context("failed to build mount")?;
        Ok(parse_mount(&m)?)
    }

    #[test]
    fn test_parse_mount_flags() -> Result<()> {
        let cases = [
            ("nosuid", MsFlags::MS_NOSUID),
            ("nodev", MsFlags::MS_NODEV),
            ("noexec", MsFlags::MS_NOEXEC),
            ("ro", MsFlags::MS_RDONLY),
            ("bind", MsFlags::MS_BIND),
            ("rbind", MsFlags::MS_BIND | MsFlags::MS_REC),
            ("strictatime", MsFlags::MS_STRICTATIME),
            ("relatime", MsFlags::MS_RELATIME),
            ("noatime", MsFlags::MS_NOATIME),
            ("sync", MsFlags::MS_SYNCHRONOUS),
        ];
        for (option, flag) in cases {
            let config = options(&[option])?;
            assert_eq!(config.flags, flag, "option {option}");
            assert!(config.data.is_empty(), "option {option}");
        }
        Ok(())
    }

    #[test]
    fn test_parse_mount_clear_flags() -> Result<()> {
        let config = options(&["ro", "nosuid", "rw"])?;
        assert_eq!(config.flags, MsFlags::MS_NOSUID);
        Ok(())
    }

    #[test]
    fn test_parse_mount_propagation_is_split_off() -> Result<()> {
        let config = options(&["rbind", "rprivate"])?;
        assert_eq!(config.flags, MsFlags::MS_BIND | MsFlags::MS_REC);
        assert_eq!(config.propagation, MsFlags::MS_PRIVATE | MsFlags::MS_REC);

        let config = options(&["nosuid", "slave"])?;
        assert_eq!(config.flags, MsFlags::MS_NOSUID);
        assert_eq!(config.propagation, MsFlags::MS_SLAVE);
        Ok(())
    }

    #[test]
    fn test_parse_mount_unknown_options_are_data() -> Result<()> {
        let config = options(&["nosuid", "mode=755", "size=65536k", "newinstance"])?;
        assert_eq!(config.flags, MsFlags::MS_NOSUID);
        assert_eq!(config.data, "mode=755,size=65536k,newinstance");
        Ok(())
    }

    #[test]
    fn test_parse_mount_idmap_is_rejected() {
        let m = MountBuilder::default()
            .destination("/mnt")
            .options(vec!["idmap".to_string()])
            .build()
            .unwrap();
        assert!(matches!(
            parse_mount(&m),
            Err(MountError::UnsupportedMountOption(_))
        ));
    }

    #[test]
    fn test_propagation_flags() -> Result<()> {
        assert_eq!(
            propagation_flags(None)?,
            MsFlags::MS_PRIVATE | MsFlags::MS_REC
        );
        assert_eq!(
            propagation_flags(Some("slave"))?,
            MsFlags::MS_SLAVE | MsFlags::MS_REC
        );
        assert_eq!(propagation_flags(Some("shared"))?, MsFlags::MS_SHARED);
        assert_eq!(
            propagation_flags(Some("runbindable"))?,
            MsFlags::MS_UNBINDABLE | MsFlags::MS_REC
        );
        assert!(propagation_flags(Some("sideways")).is_err());
        Ok(())
    }

    #[test]
    fn test_to_sflag() -> Result<()> {
        assert_eq!(to_sflag(LinuxDeviceType::C)?, SFlag::S_IFCHR);
        assert_eq!(to_sflag(LinuxDeviceType::B)?, SFlag::S_IFBLK);
        assert_eq!(to_sflag(LinuxDeviceType::P)?, SFlag::S_IFIFO);
        assert!(to_sflag(LinuxDeviceType::A).is_err());
        Ok(())
    }

    #[test]
    fn test_default_devices() -> Result<()> {
        let devices = default_devices()?;
        let paths: Vec<_> = devices.iter().map(|d| d.path().clone()).collect();
        for p in ["null", "zero", "full", "tty", "urandom", "random"] {
            assert!(paths.contains(&PathBuf::from("/dev").join(p)));
        }
        Ok(())
    }
}
