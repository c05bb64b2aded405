//! Handles Management of Capabilities
use caps::{Capability as CapsCapability, CapSet, CapsHashSet};
use oci_spec::runtime::{Capabilities, Capability as SpecCapability, LinuxCapabilities};

use crate::syscall::{Syscall, SyscallError};

/// Converts a list of capability types to capabilities has set
fn to_set(caps: &Capabilities) -> CapsHashSet {
    let mut capabilities = CapsHashSet::new();
    for c in caps {
        capabilities.insert(c.to_cap());
    }
    capabilities
}

pub trait CapabilityExt {
    /// Convert self to caps::Capability
    fn to_cap(&self) -> caps::Capability;
}

impl CapabilityExt for SpecCapability {
    fn to_cap(&self) -> caps::Capability {
        match self {
            SpecCapability::AuditControl => CapsCapability::CAP_AUDIT_CONTROL,
            SpecCapability::AuditRead => CapsCapability::CAP_AUDIT_READ,
            SpecCapability::AuditWrite => CapsCapability::CAP_AUDIT_WRITE,
            SpecCapability::BlockSuspend => CapsCapability::CAP_BLOCK_SUSPEND,
            SpecCapability::Bpf => CapsCapability::CAP_BPF,
            SpecCapability::CheckpointRestore => CapsCapability::CAP_CHECKPOINT_RESTORE,
            SpecCapability::Chown => CapsCapability::CAP_CHOWN,
            SpecCapability::DacOverride => CapsCapability::CAP_DAC_OVERRIDE,
            SpecCapability::DacReadSearch => CapsCapability::CAP_DAC_READ_SEARCH,
            SpecCapability::Fowner => CapsCapability::CAP_FOWNER,
            SpecCapability::Fsetid => CapsCapability::CAP_FSETID,
            SpecCapability::IpcLock => CapsCapability::CAP_IPC_LOCK,
            SpecCapability::IpcOwner => CapsCapability::CAP_IPC_OWNER,
            SpecCapability::Kill => CapsCapability::CAP_KILL,
            SpecCapability::Lease => CapsCapability::CAP_LEASE,
            SpecCapability::LinuxImmutable => CapsCapability::CAP_LINUX_IMMUTABLE,
            SpecCapability::MacAdmin => CapsCapability::CAP_MAC_ADMIN,
            SpecCapability::MacOverride => CapsCapability::CAP_MAC_OVERRIDE,
            SpecCapability::Mknod => CapsCapability::CAP_MKNOD,
            SpecCapability::NetAdmin => CapsCapability::CAP_NET_ADMIN,
            SpecCapability::NetBindService => CapsCapability::CAP_NET_BIND_SERVICE,
            SpecCapability::NetBroadcast => CapsCapability::CAP_NET_BROADCAST,
            SpecCapability::NetRaw => CapsCapability::CAP_NET_RAW,
            SpecCapability::Perfmon => CapsCapability::CAP_PERFMON,
            SpecCapability::Setgid => CapsCapability::CAP_SETGID,
            SpecCapability::Setfcap => CapsCapability::CAP_SETFCAP,
            SpecCapability::Setpcap => CapsCapability::CAP_SETPCAP,
            SpecCapability::Setuid => CapsCapability::CAP_SETUID,
            SpecCapability::SysAdmin => CapsCapability::CAP_SYS_ADMIN,
            SpecCapability::SysBoot => CapsCapability::CAP_SYS_BOOT,
            SpecCapability::SysChroot => CapsCapability::CAP_SYS_CHROOT,
            SpecCapability::SysModule => CapsCapability::CAP_SYS_MODULE,
            SpecCapability::SysNice => CapsCapability::CAP_SYS_NICE,
            SpecCapability::SysPacct => CapsCapability::CAP_SYS_PACCT,
            SpecCapability::SysPtrace => CapsCapability::CAP_SYS_PTRACE,
            SpecCapability::SysRawio => CapsCapability::CAP_SYS_RAWIO,
            SpecCapability::SysResource => CapsCapability::CAP_SYS_RESOURCE,
            SpecCapability::SysTime => CapsCapability::CAP_SYS_TIME,
            SpecCapability::SysTtyConfig => CapsCapability::CAP_SYS_TTY_CONFIG,
            SpecCapability::Syslog => CapsCapability::CAP_SYSLOG,
            SpecCapability::WakeAlarm => CapsCapability::CAP_WAKE_ALARM,
        }
    }
}

/// Reduces the capability sets of the current process to the ones in the
/// spec. Bounding goes first so the later sets can't reach beyond it.
/// A set the spec leaves out is left as it is.
pub fn drop_privileges(cs: &LinuxCapabilities, syscall: &dyn Syscall) -> Result<(), SyscallError> {
    tracing::debug!("dropping bounding capabilities to {:?}", cs.bounding());
    if let Some(bounding) = cs.bounding() {
        syscall.set_capability(CapSet::Bounding, &to_set(bounding))?;
    }

    if let Some(effective) = cs.effective() {
        syscall.set_capability(CapSet::Effective, &to_set(effective))?;
    }

    if let Some(permitted) = cs.permitted() {
        syscall.set_capability(CapSet::Permitted, &to_set(permitted))?;
    }

    if let Some(inheritable) = cs.inheritable() {
        syscall.set_capability(CapSet::Inheritable, &to_set(inheritable))?;
    }

    if let Some(ambient) = cs.ambient() {
        // check specifically for ambient, as those might not always be available
        if let Err(e) = syscall.set_capability(CapSet::Ambient, &to_set(ambient)) {
            tracing::warn!("failed to set ambient capabilities: {}", e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use oci_spec::runtime::LinuxCapabilitiesBuilder;

    use super::*;
    use crate::syscall::test::TestHelperSyscall;

    #[test]
    fn test_to_cap() {
        assert_eq!(SpecCapability::Mknod.to_cap(), CapsCapability::CAP_MKNOD);
        assert_eq!(
            SpecCapability::NetBindService.to_cap(),
            CapsCapability::CAP_NET_BIND_SERVICE
        );
        assert_eq!(
            SpecCapability::CheckpointRestore.to_cap(),
            CapsCapability::CAP_CHECKPOINT_RESTORE
        );
    }

    #[test]
    fn test_drop_privileges() {
        let kill_and_chown: Capabilities = [SpecCapability::Kill, SpecCapability::Chown]
            .into_iter()
            .collect();
        let cs = LinuxCapabilitiesBuilder::default()
            .bounding(kill_and_chown.clone())
            .effective(kill_and_chown.clone())
            .permitted(kill_and_chown.clone())
            .inheritable(Capabilities::new())
            .ambient(Capabilities::new())
            .build()
            .unwrap();

        let syscall = TestHelperSyscall::default();
        drop_privileges(&cs, &syscall).unwrap();

        let got = syscall.get_set_capability_args();
        let expected: CapsHashSet = [CapsCapability::CAP_KILL, CapsCapability::CAP_CHOWN]
            .into_iter()
            .collect();
        assert_eq!(got.len(), 5);
        assert!(matches!(got[0].0, CapSet::Bounding));
        assert_eq!(got[0].1, expected);
        assert!(matches!(got[1].0, CapSet::Effective));
        assert_eq!(got[1].1, expected);
        assert!(matches!(got[2].0, CapSet::Permitted));
        assert_eq!(got[2].1, expected);
        assert!(matches!(got[3].0, CapSet::Inheritable));
        assert!(got[3].1.is_empty());
        assert!(matches!(got[4].0, CapSet::Ambient));
        assert!(got[4].1.is_empty());
    }

    #[test]
    fn test_drop_privileges_only_touches_given_sets() {
        let mut cs = LinuxCapabilities::default();
        cs.set_bounding(Some([SpecCapability::SysAdmin].into_iter().collect()));
        cs.set_effective(None);
        cs.set_permitted(None);
        cs.set_inheritable(None);
        cs.set_ambient(None);

        let syscall = TestHelperSyscall::default();
        drop_privileges(&cs, &syscall).unwrap();

        let got = syscall.get_set_capability_args();
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0].0, CapSet::Bounding));
        assert!(got[0].1.contains(&CapsCapability::CAP_SYS_ADMIN));
    }
}
