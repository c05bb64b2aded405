use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use libcontainer::container::builder::ContainerBuilder;
use nix::sys::signal::{self, kill};
use nix::sys::signalfd::SigSet;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Create a container and immediately start it
#[derive(Parser, Debug)]
pub struct Run {
    /// Path to the bundle directory, containing config.json and root filesystem
    #[clap(short, long, default_value = ".")]
    pub bundle: PathBuf,
    /// Unix socket (file) path , which will receive file descriptor of the writing end of the pseudoterminal
    #[clap(short, long)]
    pub console_socket: Option<PathBuf>,
    /// File to write pid of the container created
    #[clap(short, long)]
    pub pid_file: Option<PathBuf>,
    /// Detach from the container process
    #[clap(short, long)]
    pub detach: bool,

    /// Name of the container instance to be started
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
}

pub fn run(
    args: Run,
    root_path: PathBuf,
    systemd_cgroup: bool,
    init_args: Vec<String>,
) -> Result<i32> {
    let mut container = ContainerBuilder::new(args.container_id.clone())
        .with_pid_file(args.pid_file.as_ref())?
        .with_console_socket(args.console_socket.as_ref())
        .with_root_path(root_path)?
        .with_init_args(init_args)
        .validate_id()?
        .as_init(&args.bundle)
        .with_systemd(systemd_cgroup)
        .build()?;

    container
        .start()
        .with_context(|| format!("failed to start container {}", args.container_id))?;

    if args.detach {
        return Ok(0);
    }

    // the record of a started container always carries the init pid
    let init_pid = container
        .pid()
        .with_context(|| format!("container {} has no init process", args.container_id))?;
    let foreground_result = handle_foreground(init_pid);
    // execute the destruction action after the container finishes running
    container.delete(true)?;
    // return result
    foreground_result
}

// handle_foreground will match the `runc` behavior running the foreground mode.
// The ferrocell main process will wait and reap the container init process. The
// ferrocell main process also forwards most of the signals to the container init
// process.
#[tracing::instrument(level = "trace")]
fn handle_foreground(init_pid: Pid) -> Result<i32> {
    tracing::trace!("waiting for container init process to exit");
    // We mask all signals here and forward most of the signals to the container
    // init process.
    let signal_set = SigSet::all();
    signal_set
        .thread_block()
        .with_context(|| "failed to call pthread_sigmask")?;

    // the workload may have exited before SIGCHLD was blocked
    if let Some(exit_code) = reap(init_pid)? {
        return Ok(exit_code);
    }

    loop {
        match signal_set
            .wait()
            .with_context(|| "failed to call sigwait")?
        {
            signal::SIGCHLD => {
                tracing::trace!("reaping child processes");
                if let Some(exit_code) = reap(init_pid)? {
                    return Ok(exit_code);
                }
            }
            signal::SIGURG => {
                // In `runc`, SIGURG is used by go runtime and should not be forwarded to
                // the container process. Here, we just ignore the signal.
            }
            signal::SIGWINCH => {}
            signal => {
                tracing::trace!(?signal, "forwarding signal");
                // There is nothing we can do if we fail to forward the signal.
                let _ = kill(init_pid, Some(signal)).map_err(|err| {
                    tracing::warn!(
                        ?err,
                        ?signal,
                        "failed to forward signal to container init process",
                    );
                });
            }
        }
    }
}

/// Reaps all children until either the container init process exited or no
/// more child can be reaped. A workload killed by a signal exits with
/// 128 + signal, like a shell reports it.
fn reap(init_pid: Pid) -> Result<Option<i32>> {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, status)) if pid == init_pid => return Ok(Some(status)),
            Ok(WaitStatus::Signaled(pid, signal, _)) if pid == init_pid => {
                return Ok(Some(128 + signal as i32))
            }
            Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => return Ok(None),
            // Else, some random child process exited, ignoring...
            Ok(_) => {}
            Err(err) => return Err(err).context("failed to wait for child processes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::unistd::{fork, ForkResult};
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_reap_exit_code() -> Result<()> {
        let child = match unsafe { fork()? } {
            ForkResult::Child => unsafe { nix::libc::_exit(7) },
            ForkResult::Parent { child } => child,
        };

        let exit_code = loop {
            if let Some(code) = reap(child)? {
                break code;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        };
        assert_eq!(exit_code, 7);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_reap_signaled() -> Result<()> {
        let child = match unsafe { fork()? } {
            ForkResult::Child => loop {
                std::thread::sleep(std::time::Duration::from_secs(1));
            },
            ForkResult::Parent { child } => child,
        };
        kill(child, signal::SIGKILL)?;

        let exit_code = loop {
            if let Some(code) = reap(child)? {
                break code;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        };
        assert_eq!(exit_code, 128 + 9);
        Ok(())
    }
}
