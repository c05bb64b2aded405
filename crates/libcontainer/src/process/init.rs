//! Runs inside the freshly cloned init process. Receives the container over
//! the sync pipe, isolates and restricts itself step by step, waits on the
//! exec fifo and finally replaces itself with the workload.

use std::convert::Infallible;
use std::fs;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use libcgroups::common::{self, CgroupManager, ControllerOpt};
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, Pid};
use oci_spec::runtime::{LinuxNamespaceType, Spec};

use super::channel::{self, SyncReceiver, CONSOLE_SOCKET_FD, SYNC_PIPE_FD};
use super::fifo;
use crate::container::Container;
use crate::error::MissingSpecError;
use crate::namespaces::Namespaces;
use crate::rootfs::mount::MountError;
use crate::rootfs::utils::propagation_flags;
use crate::rootfs::{RootFS, RootfsError};
use crate::syscall::syscall::create_syscall;
use crate::syscall::{Syscall, SyscallError};
use crate::workload::{self, ExecutorError, ExecutorValidationError};
use crate::{apparmor, capabilities, namespaces, tty};

const OOM_SCORE_ADJ_PATH: &str = "/proc/self/oom_score_adj";

#[derive(Debug, thiserror::Error)]
pub enum InitProcessError {
    #[error(transparent)]
    Channel(#[from] channel::ChannelError),
    #[error("the container record carries no spec")]
    NoSpec,
    #[error(transparent)]
    MissingSpec(#[from] MissingSpecError),
    #[error(transparent)]
    Namespaces(#[from] namespaces::NamespaceError),
    #[error("failed to open the container state directory {path:?}")]
    StateDir { path: PathBuf, source: nix::Error },
    #[error("invalid workload")]
    InvalidExecutable(#[from] ExecutorValidationError),
    #[error("failed to set hostname")]
    SetHostname(#[source] SyscallError),
    #[error(transparent)]
    AppArmor(#[from] apparmor::AppArmorError),
    #[error(transparent)]
    CgroupCreate(#[from] common::CreateCgroupSetupError),
    #[error(transparent)]
    CgroupManager(#[from] common::AnyManagerError),
    #[error("failed to set rlimit")]
    SetRlimit(#[source] SyscallError),
    #[error(transparent)]
    Rootfs(#[from] RootfsError),
    #[error("invalid rootfs propagation")]
    RootfsPropagation(#[source] MountError),
    #[error(transparent)]
    Tty(#[from] tty::TTYError),
    #[error("failed to set no new privileges")]
    NoNewPrivileges(#[source] nix::Error),
    #[cfg(feature = "libseccomp")]
    #[error(transparent)]
    Seccomp(#[from] crate::seccomp::SeccompError),
    #[cfg(not(feature = "libseccomp"))]
    #[error("seccomp profile given but ferrocell was built without seccomp support")]
    SeccompUnsupported,
    #[error("failed to set oom score adjustment")]
    OomScoreAdj(#[source] std::io::Error),
    #[error("failed to drop capabilities")]
    DropCapabilities(#[source] SyscallError),
    #[error("failed to change working directory to {path:?}")]
    Chdir { path: PathBuf, source: nix::Error },
    #[error(transparent)]
    Fifo(#[from] fifo::FifoError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

type Result<T> = std::result::Result<T, InitProcessError>;

/// Entry point of the init process. Only returns on failure; the exit status
/// is the only way the failure reaches the runtime from here.
pub fn container_init() -> Result<Infallible> {
    // the process factory put the read end of the sync pipe here
    let receiver = unsafe { SyncReceiver::from_raw_fd(SYNC_PIPE_FD) };
    let container: Container = receiver.recv()?;
    tracing::debug!(id = container.id(), "received container");

    let syscall = create_syscall();
    container_init_process(&container, syscall.as_ref())
}

fn container_init_process(container: &Container, syscall: &dyn Syscall) -> Result<Infallible> {
    let spec = container.state.spec.as_ref().ok_or(InitProcessError::NoSpec)?;
    let process = spec.process().as_ref().ok_or(MissingSpecError::Process)?;
    let linux = spec.linux().as_ref().ok_or(MissingSpecError::Linux)?;
    let namespaces = Namespaces::try_from(linux.namespaces().as_ref())?;

    // the state directory is out of reach once the root has been pivoted
    let stateDir = open_state_dir(&container.rootPath)?;

    let executor = workload::default::get_executor();
    executor.validate(spec)?;

    if let Some(hostname) = spec.hostname().as_ref().filter(|h| !h.is_empty()) {
        syscall.set_hostname(hostname).map_err(|err| {
            tracing::error!(?err, ?hostname, "failed to set hostname");
            InitProcessError::SetHostname(err)
        })?;
    }

    if let Some(profile) = process.apparmor_profile() {
        apparmor::apply_profile(profile).map_err(|err| {
            tracing::error!(?err, ?profile, "failed to apply apparmor profile");
            err
        })?;
    }

    if let (Some(cgroup_config), Some(resources)) = (container.cgroup_config(), linux.resources()) {
        let manager = common::create_cgroup_manager(cgroup_config)?;
        let pid = cgroup_task_pid(&namespaces, container.pid());
        tracing::debug!(%pid, path = ?manager.path(), "joining cgroup");
        manager.add_task(pid)?;
        manager.apply(&ControllerOpt { resources })?;
    }

    for rlimit in process.rlimits().iter().flatten() {
        syscall.set_rlimit(rlimit).map_err(|err| {
            tracing::error!(?err, ?rlimit, "failed to set rlimit");
            InitProcessError::SetRlimit(err)
        })?;
    }

    setup_rootfs(spec, container.rootfs())?;

    if process.terminal() == Some(true) && container.console_socket().is_some() {
        tty::setup_console(CONSOLE_SOCKET_FD, syscall)?;
    }

    if process.no_new_privileges() == Some(true) {
        prctl::set_no_new_privileges(true).map_err(|errno| {
            let err = nix::Error::from_raw(errno);
            tracing::error!(?err, "failed to set no new privileges");
            InitProcessError::NoNewPrivileges(err)
        })?;
    }

    if let Some(seccomp) = linux.seccomp() {
        load_seccomp(seccomp)?;
    }

    if let Some(score) = process.oom_score_adj() {
        set_oom_score_adj(Path::new(OOM_SCORE_ADJ_PATH), score)?;
    }

    // after seccomp, so no capability is left to disarm the filter with
    if let Some(caps) = process.capabilities() {
        capabilities::drop_privileges(caps, syscall).map_err(|err| {
            tracing::error!(?err, "failed to drop capabilities");
            InitProcessError::DropCapabilities(err)
        })?;
    }

    let cwd = process.cwd();
    unistd::chdir(cwd).map_err(|err| {
        tracing::error!(?err, ?cwd, "failed to change working directory");
        InitProcessError::Chdir {
            path: cwd.clone(),
            source: err,
        }
    })?;

    fifo::create_exec_fifo_at(stateDir.as_raw_fd())?;
    // held open until execve closes it
    let _fifo = fifo::wait_for_start(stateDir.as_raw_fd())?;
    drop(stateDir);
    tracing::debug!(id = container.id(), "container started, executing workload");

    match executor.exec(spec) {
        Ok(never) => match never {},
        Err(err) => Err(err.into()),
    }
}

fn setup_rootfs(spec: &Spec, rootfs: &Path) -> Result<()> {
    let linux = spec.linux().as_ref().ok_or(MissingSpecError::Linux)?;
    let flags = propagation_flags(linux.rootfs_propagation().as_deref())
        .map_err(InitProcessError::RootfsPropagation)?;

    let rootFS = RootFS::new();
    rootFS.prepare_rootfs(spec, rootfs)?;
    rootFS.pivot(rootfs)?;
    // pivot_root leaves the new root with the propagation of the old one
    rootFS.adjust_root_mount_propagation(flags)?;

    if let Some(paths) = linux.readonly_paths() {
        rootFS.apply_readonly_paths(paths)?;
    }
    if let Some(paths) = linux.masked_paths() {
        rootFS.apply_masked_paths(paths)?;
    }

    Ok(())
}

#[cfg(feature = "libseccomp")]
fn load_seccomp(seccomp: &oci_spec::runtime::LinuxSeccomp) -> Result<()> {
    crate::seccomp::initialize_seccomp(seccomp).map_err(|err| {
        tracing::error!(?err, "failed to load seccomp filter");
        InitProcessError::Seccomp(err)
    })
}

#[cfg(not(feature = "libseccomp"))]
fn load_seccomp(_: &oci_spec::runtime::LinuxSeccomp) -> Result<()> {
    tracing::error!("seccomp profile given but ferrocell was built without seccomp support");
    Err(InitProcessError::SeccompUnsupported)
}

fn open_state_dir(path: &Path) -> Result<OwnedFd> {
    let fd = fcntl::open(
        path,
        OFlag::O_PATH | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .map_err(|err| {
        tracing::error!(?err, ?path, "failed to open container state directory");
        InitProcessError::StateDir {
            path: path.to_path_buf(),
            source: err,
        }
    })?;

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Pid written to cgroup.procs. Inside a new pid namespace the host pid
/// means nothing, 0 stands for the writing process itself.
fn cgroup_task_pid(namespaces: &Namespaces, initPid: Option<Pid>) -> Pid {
    match initPid {
        Some(pid) if !namespaces.contains(LinuxNamespaceType::Pid) => pid,
        _ => Pid::from_raw(0),
    }
}

fn set_oom_score_adj(path: &Path, score: i32) -> Result<()> {
    fs::write(path, score.to_string()).map_err(|err| {
        tracing::error!(?err, score, "failed to set oom score adjustment");
        InitProcessError::OomScoreAdj(err)
    })
}
