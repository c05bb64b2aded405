//! The exec fifo holds the init process back between create and start.
//! Init opens it for writing, which blocks until `start` opens it for
//! reading and removes it.

use std::fs::{File, OpenOptions};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{openat, OFlag};
use nix::sys::stat::{self, Mode};
use nix::unistd::{mkfifo, mkfifoat};

pub const EXEC_FIFO_NAME: &str = "exec.fifo";

#[derive(Debug, thiserror::Error)]
pub enum FifoError {
    #[error("failed to create exec fifo {path:?}")]
    Create { path: PathBuf, source: nix::Error },
    #[error("failed to open exec fifo {path:?}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to wait on the exec fifo")]
    Wait(#[source] nix::Error),
    #[error("failed to remove exec fifo {path:?}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("exec fifo {0:?} does not exist")]
    NotExist(PathBuf),
    #[error("init process exited before opening exec fifo {0:?}")]
    InitExited(PathBuf),
}

type Result<T> = std::result::Result<T, FifoError>;

const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn fifo_mode() -> Mode {
    Mode::from_bits_truncate(0o622)
}

/// Creates the fifo at `path`. The mode is applied without the umask.
pub fn create_exec_fifo(path: &Path) -> Result<()> {
    let old_mode = stat::umask(Mode::empty());
    let created = mkfifo(path, fifo_mode());
    stat::umask(old_mode);

    created.map_err(|err| {
        tracing::error!(?err, ?path, "failed to create exec fifo");
        FifoError::Create {
            path: path.to_path_buf(),
            source: err,
        }
    })
}

/// Creates the fifo relative to the state directory unless the runtime
/// already did.
pub fn create_exec_fifo_at(state_dir: RawFd) -> Result<()> {
    match mkfifoat(Some(state_dir), EXEC_FIFO_NAME, fifo_mode()) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(err) => {
            tracing::error!(?err, "failed to create exec fifo");
            Err(FifoError::Create {
                path: PathBuf::from(EXEC_FIFO_NAME),
                source: err,
            })
        }
    }
}

/// Opens the fifo for writing. Blocks until a reader shows up. The returned
/// descriptor is close-on-exec, so the workload never sees it.
pub fn wait_for_start(state_dir: RawFd) -> Result<File> {
    tracing::debug!("waiting for the container to be started");
    let fd = openat(
        Some(state_dir),
        EXEC_FIFO_NAME,
        OFlag::O_WRONLY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .map_err(FifoError::Wait)?;

    Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}

/// Releases a process blocked in [`wait_for_start`]: opens the fifo for
/// reading, then removes it.
///
/// The read side open only returns once init opens the fifo for writing, so
/// it runs on a helper thread while `init_alive` is polled. When init is gone
/// the helper is unblocked by a non-blocking write open and
/// [`FifoError::InitExited`] is returned.
pub fn release<F>(path: &Path, init_alive: F) -> Result<()>
where
    F: Fn() -> bool,
{
    if !path.exists() {
        return Err(FifoError::NotExist(path.to_path_buf()));
    }

    let (tx, rx) = mpsc::channel();
    let fifo_path = path.to_path_buf();
    let opener = thread::spawn(move || {
        let opened = OpenOptions::new().read(true).open(&fifo_path);
        tx.send(()).ok();
        opened
    });

    let mut init_exited = false;
    loop {
        match rx.recv_timeout(RELEASE_POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) if init_exited || !init_alive() => {
                init_exited = true;
                // succeeds once the helper sits in its open, which then returns
                let _ = OpenOptions::new()
                    .write(true)
                    .custom_flags(libc::O_NONBLOCK)
                    .open(path);
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let opened = opener.join().map_err(|_| FifoError::Open {
        path: path.to_path_buf(),
        source: std::io::Error::other("exec fifo opener panicked"),
    })?;
    let reader = opened.map_err(|err| {
        tracing::error!(?err, ?path, "failed to open exec fifo");
        FifoError::Open {
            path: path.to_path_buf(),
            source: err,
        }
    })?;

    if init_exited {
        tracing::error!(?path, "init process exited before the container was started");
        return Err(FifoError::InitExited(path.to_path_buf()));
    }

    std::fs::remove_file(path).map_err(|err| {
        tracing::error!(?err, ?path, "failed to remove exec fifo");
        FifoError::Remove {
            path: path.to_path_buf(),
            source: err,
        }
    })?;
    drop(reader);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::FileTypeExt;
    use std::time::Instant;

    use anyhow::Result;
    use serial_test::serial;

    use super::*;

    fn open_dir(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(path)?)
    }

    #[test]
    #[serial]
    fn test_create_exec_fifo() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join(EXEC_FIFO_NAME);
        create_exec_fifo(&path)?;

        let metadata = std::fs::metadata(&path)?;
        assert!(metadata.file_type().is_fifo());
        assert!(create_exec_fifo(&path).is_err());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_create_exec_fifo_at_tolerates_existing() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dir = open_dir(tmp.path())?;
        create_exec_fifo_at(dir.as_raw_fd())?;
        create_exec_fifo_at(dir.as_raw_fd())?;
        assert!(tmp.path().join(EXEC_FIFO_NAME).exists());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_rendezvous() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join(EXEC_FIFO_NAME);
        create_exec_fifo(&path)?;
        let dir = open_dir(tmp.path())?;

        let (tx, rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            let opened = wait_for_start(dir.as_raw_fd()).map(|_| ());
            tx.send(()).ok();
            opened
        });

        // nobody has opened the fifo for reading yet
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        release(&path, || true)?;
        rx.recv_timeout(Duration::from_secs(5))?;
        waiter.join().expect("waiter panicked")?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_release_without_fifo() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        assert!(matches!(
            release(&tmp.path().join(EXEC_FIFO_NAME), || true),
            Err(FifoError::NotExist(_))
        ));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_release_gives_up_when_init_exits() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join(EXEC_FIFO_NAME);
        create_exec_fifo(&path)?;

        // no writer ever opens the fifo, init reports dead on the third check
        let (tx, rx) = mpsc::channel();
        let fifo_path = path.clone();
        std::thread::spawn(move || {
            let checks = Cell::new(0);
            let released = release(&fifo_path, || {
                checks.set(checks.get() + 1);
                checks.get() < 3
            });
            tx.send((released, checks.get())).ok();
        });

        let (released, checks) = rx.recv_timeout(Duration::from_secs(5))?;
        assert!(matches!(released, Err(FifoError::InitExited(_))));
        assert_eq!(checks, 3);
        // the fifo stays, the container reports stopped through the dead init
        assert!(path.exists());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_release_returns_promptly_for_dead_init() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join(EXEC_FIFO_NAME);
        create_exec_fifo(&path)?;

        let started = Instant::now();
        assert!(matches!(
            release(&path, || false),
            Err(FifoError::InitExited(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }
}
