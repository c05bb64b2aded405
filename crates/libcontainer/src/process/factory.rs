use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use nix::fcntl::{fcntl, FcntlArg};
use nix::sched::{self, CloneCb};
use nix::sys::signal::Signal;
use nix::unistd::{self, Pid};

use super::channel::{self, SyncSender, CONSOLE_SOCKET_FD, SYNC_PIPE_FD};
use crate::namespaces::Namespaces;

const STACK_SIZE: usize = 4 * 1024 * 1024;
/// Lowest descriptor number the fds handed to the child are parked at, so
/// they can't collide with the numbers they are moved to.
const FD_PARK_MIN: RawFd = 10;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Channel(#[from] channel::ChannelError),
    #[error("failed to resolve the runtime executable")]
    SelfExe(#[source] std::io::Error),
    #[error("failed to connect to console socket {path:?}")]
    ConsoleSocket {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0:?} contains a nul byte")]
    NulByte(String),
    #[error("failed to duplicate descriptor")]
    Dup(#[source] nix::Error),
    #[error("failed to clone the init process")]
    Clone(#[source] nix::Error),
}

type Result<T> = std::result::Result<T, ProcessError>;

/// What the init process is started with
pub struct InitParams<'a> {
    pub namespaces: &'a Namespaces,
    /// Working directory of the init process before it pivots
    pub rootfs: &'a Path,
    pub env: &'a [String],
    pub console_socket: Option<&'a Path>,
    /// Global flags put in front of the `init` subcommand
    pub init_args: &'a [String],
}

/// A freshly cloned init process, still waiting for its container
pub struct InitProcess {
    pub pid: Pid,
    pub sender: SyncSender,
}

/// Clones the init process into its namespaces and re-executes the runtime
/// binary in init mode inside it. Returns without waiting on the child; the
/// caller hands the container over through `sender`.
#[tracing::instrument(level = "debug", skip(params), fields(rootfs = ?params.rootfs))]
pub fn spawn_init(params: &InitParams) -> Result<InitProcess> {
    let exe = std::env::current_exe().map_err(ProcessError::SelfExe)?;
    let exe = exe.to_string_lossy().to_string();

    let console = params
        .console_socket
        .map(|path| {
            UnixStream::connect(path).map_err(|err| {
                tracing::error!(?err, ?path, "failed to connect to console socket");
                ProcessError::ConsoleSocket {
                    path: path.to_path_buf(),
                    source: err,
                }
            })
        })
        .transpose()?;

    let mut args = vec![exe.clone()];
    args.extend(params.init_args.iter().cloned());
    args.push("init".to_owned());

    // everything the child needs is prepared here, it only moves descriptors
    // and execs
    let path = to_cstring(&exe)?;
    let argv = args
        .iter()
        .map(|a| to_cstring(a))
        .collect::<Result<Vec<_>>>()?;
    let envp = params
        .env
        .iter()
        .map(|e| to_cstring(e))
        .collect::<Result<Vec<_>>>()?;
    let cwd = to_cstring(&params.rootfs.to_string_lossy())?;

    let (sender, receiver) = channel::sync_channel()?;
    let pipeFd = park_fd(receiver.as_file().as_raw_fd())?;
    let consoleFd = console
        .as_ref()
        .map(|socket| park_fd(socket.as_raw_fd()))
        .transpose()?;

    let cb: CloneCb = Box::new(|| {
        if unistd::dup2(pipeFd.as_raw_fd(), SYNC_PIPE_FD).is_err() {
            return -1;
        }
        if let Some(fd) = &consoleFd {
            if unistd::dup2(fd.as_raw_fd(), CONSOLE_SOCKET_FD).is_err() {
                return -1;
            }
        }
        if unistd::chdir(cwd.as_c_str()).is_err() {
            return -1;
        }
        match unistd::execve(&path, &argv, &envp) {
            Ok(never) => match never {},
            Err(_) => 127,
        }
    });

    let mut stack = vec![0u8; STACK_SIZE];
    let flags = params.namespaces.clone_flags();
    tracing::debug!(?flags, "cloning init process");
    let pid = unsafe { sched::clone(cb, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
        .map_err(|err| {
            tracing::error!(?err, ?flags, "failed to clone init process");
            ProcessError::Clone(err)
        })?;

    // the child has its own copies now
    drop(receiver);
    drop(pipeFd);
    drop(consoleFd);
    drop(console);

    tracing::debug!(%pid, "init process cloned");
    Ok(InitProcess { pid, sender })
}

fn to_cstring(value: &str) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| ProcessError::NulByte(value.to_owned()))
}

fn park_fd(fd: RawFd) -> Result<OwnedFd> {
    let parked = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(FD_PARK_MIN)).map_err(ProcessError::Dup)?;
    Ok(unsafe { OwnedFd::from_raw_fd(parked) })
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;

    use anyhow::Result;
    use nix::fcntl::FdFlag;

    use super::*;

    #[test]
    fn test_park_fd() -> Result<()> {
        let tmp = tempfile::tempfile()?;
        let parked = park_fd(tmp.as_raw_fd())?;
        assert!(parked.as_raw_fd() >= FD_PARK_MIN);

        let flags = FdFlag::from_bits_truncate(fcntl(parked.as_raw_fd(), FcntlArg::F_GETFD)?);
        assert!(flags.contains(FdFlag::FD_CLOEXEC));
        Ok(())
    }

    #[test]
    fn test_console_socket_must_be_reachable() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let namespaces = Namespaces::default();
        let missing = tmp.path().join("console.sock");
        let params = InitParams {
            namespaces: &namespaces,
            rootfs: tmp.path(),
            env: &[],
            console_socket: Some(&missing),
            init_args: &[],
        };
        assert!(matches!(
            spawn_init(&params),
            Err(ProcessError::ConsoleSocket { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_nul_bytes_are_rejected() {
        assert!(matches!(
            to_cstring("PATH=/bin\0oops"),
            Err(ProcessError::NulByte(_))
        ));
    }
}
