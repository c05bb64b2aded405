//! tty (teletype) for user-system interaction

use std::fs::OpenOptions;
use std::io::IoSlice;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::mount::MsFlags;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags, UnixAddr};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{close, dup2, setsid};

use crate::syscall::Syscall;

#[derive(Debug, thiserror::Error)]
pub enum TTYError {
    #[error("failed to open a new pseudo terminal")]
    OpenPty { source: nix::Error },
    #[error("failed to create console target {path:?}")]
    CreateConsole {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind the pseudo terminal onto {path:?}")]
    MountConsole {
        path: PathBuf,
        source: crate::syscall::SyscallError,
    },
    #[error("failed to send the pty master over the console socket")]
    SendPtyMaster { source: nix::Error },
    #[error("failed to open the pty slave {path}")]
    OpenSlave { path: String, source: nix::Error },
    #[error("failed to make the pty slave the controlling terminal")]
    SetControllingTerminal { source: nix::Error },
    #[error("failed to duplicate the pty slave onto stdio")]
    DupStdio { source: nix::Error },
    #[error("failed to close file descriptor")]
    Close { source: nix::Error },
}

type Result<T> = std::result::Result<T, TTYError>;

const CONSOLE_PATH: &str = "/dev/console";
const STDIO: [RawFd; 3] = [0, 1, 2];

nix::ioctl_write_int_bad!(tiocsctty, libc::TIOCSCTTY);

/// Creates a pseudo terminal for the container, hands its master over the
/// console socket and makes the slave the stdio and controlling terminal of
/// the calling process. Must run after pivot_root.
pub fn setup_console(console_socket: RawFd, syscall: &dyn Syscall) -> Result<()> {
    let master = open_pty()?;
    let slaveName = ptsname_r(&master).map_err(|err| TTYError::OpenPty { source: err })?;
    tracing::debug!(slave = ?slaveName, "opened pseudo terminal");

    mount_console(Path::new(&slaveName), Path::new(CONSOLE_PATH), syscall)?;
    send_pty_master(console_socket, &master, &slaveName)?;
    close(console_socket).map_err(|err| TTYError::Close { source: err })?;

    connect_stdio(&slaveName)?;
    // the runtime side holds its own copy now
    drop(master);

    Ok(())
}

fn open_pty() -> Result<PtyMaster> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
        .map_err(|err| TTYError::OpenPty { source: err })?;
    grantpt(&master).map_err(|err| TTYError::OpenPty { source: err })?;
    unlockpt(&master).map_err(|err| TTYError::OpenPty { source: err })?;
    Ok(master)
}

fn mount_console(slave: &Path, console: &Path, syscall: &dyn Syscall) -> Result<()> {
    let old_mode = umask(Mode::empty());
    let created = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(console)
        .map(|_| ());
    umask(old_mode);
    created.map_err(|err| TTYError::CreateConsole {
        path: console.to_owned(),
        source: err,
    })?;

    syscall
        .mount(Some(slave), console, Some("bind"), MsFlags::MS_BIND, None)
        .map_err(|err| {
            tracing::error!(?err, ?slave, "failed to bind mount the console");
            TTYError::MountConsole {
                path: console.to_owned(),
                source: err,
            }
        })
}

/// Sends the master as SCM_RIGHTS with the slave name as payload
pub fn send_pty_master(socket: RawFd, master: &impl AsRawFd, name: &str) -> Result<()> {
    let fds = [master.as_raw_fd()];
    let iov = [IoSlice::new(name.as_bytes())];
    sendmsg::<UnixAddr>(
        socket,
        &iov,
        &[ControlMessage::ScmRights(&fds)],
        MsgFlags::empty(),
        None,
    )
    .map_err(|err| {
        tracing::error!(?err, "failed to send pty master");
        TTYError::SendPtyMaster { source: err }
    })?;
    Ok(())
}

fn connect_stdio(slaveName: &str) -> Result<()> {
    let slave = nix::fcntl::open(slaveName, OFlag::O_RDWR, Mode::empty()).map_err(|err| {
        TTYError::OpenSlave {
            path: slaveName.to_owned(),
            source: err,
        }
    })?;

    setsid().map_err(|err| TTYError::SetControllingTerminal { source: err })?;
    unsafe { tiocsctty(slave, 0) }
        .map_err(|err| TTYError::SetControllingTerminal { source: err })?;

    for fd in STDIO {
        dup2(slave, fd).map_err(|err| TTYError::DupStdio { source: err })?;
    }

    if !STDIO.contains(&slave) {
        close(slave).map_err(|err| TTYError::Close { source: err })?;
    }

    Ok(())
}
