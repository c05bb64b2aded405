//! Implements Command trait for Linux systems
use std::any::Any;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use caps::{CapSet, CapsHashSet};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::stat::{mknod, Mode, SFlag};
use nix::unistd::{self, chown, Gid, Uid};
use oci_spec::runtime::{PosixRlimit, PosixRlimitType};

use super::{Result, Syscall};

/// Name of the directory the old root is parked in during pivot_root
const PIVOT_ROOT_OLD: &str = ".pivot_root";

/// Empty structure to implement Command trait for
#[derive(Clone)]
pub struct LinuxSyscall;

/// Maps an OCI rlimit name onto the kernel resource it limits
pub fn rlimit_resource(typ: PosixRlimitType) -> Resource {
    match typ {
        PosixRlimitType::RlimitCpu => Resource::RLIMIT_CPU,
        PosixRlimitType::RlimitFsize => Resource::RLIMIT_FSIZE,
        PosixRlimitType::RlimitData => Resource::RLIMIT_DATA,
        PosixRlimitType::RlimitStack => Resource::RLIMIT_STACK,
        PosixRlimitType::RlimitCore => Resource::RLIMIT_CORE,
        PosixRlimitType::RlimitRss => Resource::RLIMIT_RSS,
        PosixRlimitType::RlimitNproc => Resource::RLIMIT_NPROC,
        PosixRlimitType::RlimitNofile => Resource::RLIMIT_NOFILE,
        PosixRlimitType::RlimitMemlock => Resource::RLIMIT_MEMLOCK,
        PosixRlimitType::RlimitAs => Resource::RLIMIT_AS,
        PosixRlimitType::RlimitLocks => Resource::RLIMIT_LOCKS,
        PosixRlimitType::RlimitSigpending => Resource::RLIMIT_SIGPENDING,
        PosixRlimitType::RlimitMsgqueue => Resource::RLIMIT_MSGQUEUE,
        PosixRlimitType::RlimitNice => Resource::RLIMIT_NICE,
        PosixRlimitType::RlimitRtprio => Resource::RLIMIT_RTPRIO,
        PosixRlimitType::RlimitRttime => Resource::RLIMIT_RTTIME,
    }
}

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see <https://doc.rust-lang.org/std/any/index.html> for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Function to set given path as root path inside process
    fn pivot_rootfs(&self, path: &Path) -> Result<()> {
        // pivot_root needs a directory below the new root to park the old one
        let put_old = path.join(PIVOT_ROOT_OLD);
        match fs::create_dir(&put_old) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                tracing::error!(?err, ?put_old, "failed to create directory for old root");
                return Err(err.into());
            }
        }

        unistd::pivot_root(path, &put_old).map_err(|err| {
            tracing::error!(?err, ?path, "failed to pivot root");
            err
        })?;

        unistd::chdir("/").map_err(|err| {
            tracing::error!(?err, "failed to change directory to /");
            err
        })?;

        // the old root is now visible at /.pivot_root
        let old_root = Path::new("/").join(PIVOT_ROOT_OLD);
        umount2(&old_root, MntFlags::MNT_DETACH).map_err(|err| {
            tracing::error!(?err, ?old_root, "failed to unmount old root");
            err
        })?;

        fs::remove_dir(&old_root).map_err(|err| {
            tracing::error!(?err, ?old_root, "failed to remove old root directory");
            err
        })?;

        Ok(())
    }

    fn set_hostname(&self, hostname: &str) -> Result<()> {
        unistd::sethostname(hostname)?;
        Ok(())
    }

    /// Set capabilities for container process
    fn set_capability(&self, cset: CapSet, value: &CapsHashSet) -> Result<()> {
        match cset {
            // caps::set cannot set capabilities in bounding set,
            // so we do it differently
            CapSet::Bounding => {
                // get all capabilities
                let all = caps::read(None, CapSet::Bounding)?;
                // the difference will give capabilities
                // which are to be unset
                // for each such =, drop that capability
                // after this, only those which are to be set will remain set
                for c in all.difference(value) {
                    caps::drop(None, CapSet::Bounding, *c)?
                }
            }
            _ => {
                caps::set(None, cset, value)?;
            }
        }
        Ok(())
    }

    fn set_rlimit(&self, rlimit: &PosixRlimit) -> Result<()> {
        setrlimit(rlimit_resource(rlimit.typ()), rlimit.soft(), rlimit.hard())?;
        Ok(())
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        mount(source, target, fstype, flags, data)?;
        Ok(())
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        umount2(target, flags)?;
        Ok(())
    }

    fn symlink(&self, original: &Path, link: &Path) -> Result<()> {
        symlink(original, link)?;
        Ok(())
    }

    fn mknod(&self, path: &Path, kind: SFlag, perm: Mode, dev: u64) -> Result<()> {
        mknod(path, kind, perm, dev)?;
        Ok(())
    }

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
        chown(path, owner, group)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rlimit_resource_mapping() {
        assert_eq!(
            rlimit_resource(PosixRlimitType::RlimitNofile),
            Resource::RLIMIT_NOFILE
        );
        assert_eq!(
            rlimit_resource(PosixRlimitType::RlimitCore),
            Resource::RLIMIT_CORE
        );
        assert_eq!(
            rlimit_resource(PosixRlimitType::RlimitRttime),
            Resource::RLIMIT_RTTIME
        );
    }
}
