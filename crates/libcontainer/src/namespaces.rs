//! Namespaces provide isolation of resources for processes at a kernel level.
//! The init process is cloned straight into its namespaces, so all that is
//! needed here is the clone flag mask derived from the spec.
//! Process (the init process becomes pid 1 of a fresh tree),
//! Mount (filesystem), Interprocess Communication, Network and
//! UTS (hostname and domain information) are supported. User and Cgroup
//! namespaces are accepted and left alone.

use nix::sched::CloneFlags;
use oci_spec::runtime::{LinuxNamespace, LinuxNamespaceType};

type Result<T> = std::result::Result<T, NamespaceError>;

#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error("namespace type not supported: {0:?}")]
    NotSupported(LinuxNamespaceType),
    #[error("joining an existing {0:?} namespace is not supported")]
    JoinExisting(LinuxNamespaceType),
}

/// Holds information about the namespaces the init process is cloned into
#[derive(Debug, Clone)]
pub struct Namespaces {
    cloneFlags: CloneFlags,
    types: Vec<LinuxNamespaceType>,
}

impl Default for Namespaces {
    fn default() -> Self {
        Namespaces {
            cloneFlags: CloneFlags::empty(),
            types: Vec::new(),
        }
    }
}

fn linuxNameSpace2CloneFlag(namespace_type: LinuxNamespaceType) -> Result<Option<CloneFlags>> {
    let flag = match namespace_type {
        LinuxNamespaceType::Pid => CloneFlags::CLONE_NEWPID,
        LinuxNamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
        LinuxNamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
        LinuxNamespaceType::Network => CloneFlags::CLONE_NEWNET,
        LinuxNamespaceType::Mount => CloneFlags::CLONE_NEWNS,
        LinuxNamespaceType::User | LinuxNamespaceType::Cgroup => {
            tracing::debug!(?namespace_type, "namespace is accepted but not created");
            return Ok(None);
        }
        LinuxNamespaceType::Time => return Err(NamespaceError::NotSupported(namespace_type)),
    };

    Ok(Some(flag))
}

impl TryFrom<Option<&Vec<LinuxNamespace>>> for Namespaces {
    type Error = NamespaceError;

    fn try_from(namespaces: Option<&Vec<LinuxNamespace>>) -> Result<Self> {
        let mut ret = Namespaces::default();

        for linuxNameSpace in namespaces.into_iter().flatten() {
            if linuxNameSpace.path().is_some() {
                return Err(NamespaceError::JoinExisting(linuxNameSpace.typ()));
            }

            if let Some(flag) = linuxNameSpace2CloneFlag(linuxNameSpace.typ())? {
                ret.cloneFlags |= flag;
            }
            ret.types.push(linuxNameSpace.typ());
        }

        Ok(ret)
    }
}

impl Namespaces {
    /// Flags handed to clone(2) for the init process
    pub fn clone_flags(&self) -> CloneFlags {
        self.cloneFlags
    }

    /// Whether the spec lists a namespace of the given type
    pub fn contains(&self, typ: LinuxNamespaceType) -> bool {
        self.types.contains(&typ)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use oci_spec::runtime::LinuxNamespaceBuilder;

    use super::*;

    fn namespace(typ: LinuxNamespaceType) -> LinuxNamespace {
        LinuxNamespaceBuilder::default().typ(typ).build().unwrap()
    }

    #[test]
    fn test_clone_flags() -> Result<()> {
        let list = vec![
            namespace(LinuxNamespaceType::Uts),
            namespace(LinuxNamespaceType::Mount),
            namespace(LinuxNamespaceType::Pid),
        ];
        let namespaces = Namespaces::try_from(Some(&list))?;
        assert_eq!(
            namespaces.clone_flags(),
            CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID
        );
        assert!(namespaces.contains(LinuxNamespaceType::Pid));
        assert!(!namespaces.contains(LinuxNamespaceType::Network));
        Ok(())
    }

    #[test]
    fn test_user_and_cgroup_are_ignored() -> Result<()> {
        let list = vec![
            namespace(LinuxNamespaceType::User),
            namespace(LinuxNamespaceType::Cgroup),
            namespace(LinuxNamespaceType::Ipc),
            namespace(LinuxNamespaceType::Network),
        ];
        let namespaces = Namespaces::try_from(Some(&list))?;
        assert_eq!(
            namespaces.clone_flags(),
            CloneFlags::CLONE_NEWIPC | CloneFlags::CLONE_NEWNET
        );
        assert!(namespaces.contains(LinuxNamespaceType::User));
        Ok(())
    }

    #[test]
    fn test_no_namespaces() -> Result<()> {
        let namespaces = Namespaces::try_from(None)?;
        assert!(namespaces.clone_flags().is_empty());
        Ok(())
    }

    #[test]
    fn test_rejects_time_and_path() {
        let list = vec![namespace(LinuxNamespaceType::Time)];
        assert!(matches!(
            Namespaces::try_from(Some(&list)),
            Err(NamespaceError::NotSupported(LinuxNamespaceType::Time))
        ));

        let list = vec![LinuxNamespaceBuilder::default()
            .typ(LinuxNamespaceType::Network)
            .path("/proc/1/ns/net")
            .build()
            .unwrap()];
        assert!(matches!(
            Namespaces::try_from(Some(&list)),
            Err(NamespaceError::JoinExisting(LinuxNamespaceType::Network))
        ));
    }
}
