use std::path::PathBuf;

use oci_spec::runtime::LinuxNamespaceType;

use crate::container::ContainerStatus;

/// Sections of the spec which have to be present to create a container
#[derive(Debug, thiserror::Error)]
pub enum MissingSpecError {
    #[error("missing process in spec")]
    Process,
    #[error("missing linux in spec")]
    Linux,
    #[error("missing args in the process spec")]
    Args,
    #[error("missing root in the spec")]
    Root,
}

#[derive(Debug, thiserror::Error)]
pub enum ErrInvalidID {
    #[error("container id can't be empty")]
    Empty,
    #[error("container id contains invalid characters: {0}")]
    InvalidChars(char),
    #[error("container id can't be used to represent a file name (such as . or ..)")]
    FileName,
}

#[derive(Debug, thiserror::Error)]
pub enum ErrInvalidSpec {
    #[error("runtime spec has incompatible version. Only 1.X.Y is supported")]
    UnsupportedVersion,
    #[error("apparmor is specified but not enabled on this system")]
    AppArmorNotEnabled,
    #[error("a mount namespace is required")]
    MountNamespaceRequired,
    #[error("a hostname is set but the container has no uts namespace")]
    HostnameWithoutUts,
    #[error("invalid rootfs propagation: {0}")]
    RootfsPropagation(String),
    #[error("joining an existing {0:?} namespace is not supported")]
    JoinNamespace(LinuxNamespaceType),
    #[error("the time namespace is not supported")]
    TimeNamespace,
    #[error("device {0:?} of type 'a' can't be created as a node")]
    DeviceTypeAll(PathBuf),
    #[error("SCMP_ACT_NOTIFY is not supported")]
    SeccompNotify,
    #[error("seccomp rule without syscall names")]
    SeccompEmptyNames,
    #[error("a terminal is requested but no console socket is given")]
    TerminalWithoutConsoleSocket,
}

#[derive(Debug, thiserror::Error)]
pub enum LibcontainerError {
    #[error("failed to create container: container already exists")]
    Exist,
    #[error("container {0} does not exist")]
    NoDirectory(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("requires container to be {expected}, but it is {actual}")]
    IncorrectStatus {
        expected: &'static str,
        actual: ContainerStatus,
    },
    #[error("timed out waiting for the container to stop")]
    StopTimeout,

    #[error(transparent)]
    MissingSpec(#[from] MissingSpecError),
    #[error(transparent)]
    InvalidID(#[from] ErrInvalidID),
    #[error(transparent)]
    InvalidSpec(#[from] ErrInvalidSpec),

    #[error(transparent)]
    OtherIO(#[from] std::io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    State(#[from] crate::container::state::StateError),
    #[error(transparent)]
    Process(#[from] crate::process::factory::ProcessError),
    #[error(transparent)]
    Channel(#[from] crate::process::channel::ChannelError),
    #[error(transparent)]
    Fifo(#[from] crate::process::fifo::FifoError),
    #[error(transparent)]
    Namespace(#[from] crate::namespaces::NamespaceError),
    #[error(transparent)]
    InitProcess(#[from] crate::process::init::InitProcessError),
    #[error(transparent)]
    Procfs(#[from] procfs::ProcError),
    #[error(transparent)]
    CgroupCreate(#[from] libcgroups::common::CreateCgroupSetupError),
    #[error(transparent)]
    CgroupManager(#[from] libcgroups::common::AnyManagerError),
    #[error(transparent)]
    Tty(#[from] crate::tty::TTYError),
    #[error(transparent)]
    Syscall(#[from] crate::syscall::SyscallError),
    #[error("{0}")]
    Other(String),
}
