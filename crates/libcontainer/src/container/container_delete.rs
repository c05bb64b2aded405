use std::fs;
use std::time::{Duration, Instant};

use libcgroups::common::{self, CgroupManager};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};

use super::{Container, ContainerStatus};
use crate::error::LibcontainerError;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl Container {
    /// Deletes the container
    ///
    /// # Example
    ///
    /// ```no_run
    /// use libcontainer::container::builder::ContainerBuilder;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let mut container = ContainerBuilder::new("74f1a4cb3801".to_owned())
    ///     .as_init("/var/run/docker/bundle")
    ///     .build()?;
    ///
    /// container.delete(true)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn delete(&mut self, force: bool) -> Result<(), LibcontainerError> {
        self.refresh_status()?;

        tracing::debug!(id = self.id(), status = %self.status(), force, "delete container");
        match self.status() {
            ContainerStatus::Stopped => {}
            _ if force => self.stop()?,
            status => {
                tracing::error!(id = self.id(), ?status, "delete requires the container to be stopped");
                return Err(LibcontainerError::IncorrectStatus {
                    expected: "stopped",
                    actual: status,
                });
            }
        }

        self.destroy()
    }

    /// Kills the init process and waits until it is gone
    fn stop(&mut self) -> Result<(), LibcontainerError> {
        if let Some(pid) = self.pid() {
            match signal::kill(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => {
                    tracing::error!(id = self.id(), %pid, ?err, "failed to kill container");
                    return Err(err.into());
                }
            }
        }

        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            self.refresh_status()?;
            if self.status() == ContainerStatus::Stopped {
                return Ok(());
            }

            if Instant::now() >= deadline {
                tracing::error!(id = self.id(), "container did not stop in time");
                return Err(LibcontainerError::StopTimeout);
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
    }

    /// Removes the cgroup and the state directory of a stopped container
    pub fn destroy(&mut self) -> Result<(), LibcontainerError> {
        if self.status() != ContainerStatus::Stopped {
            return Err(LibcontainerError::IncorrectStatus {
                expected: "stopped",
                actual: self.status(),
            });
        }

        if let Some(cgroup_config) = self.cgroup_config() {
            let manager = common::create_cgroup_manager(cgroup_config)?;
            manager.remove().map_err(|err| {
                tracing::error!(id = self.id(), path = ?manager.path(), ?err, "failed to remove cgroup");
                err
            })?;
        }

        if self.rootPath.exists() {
            fs::remove_dir_all(&self.rootPath).map_err(|err| {
                tracing::error!(container_root = ?self.rootPath, ?err, "failed to delete container root");
                LibcontainerError::OtherIO(err)
            })?;
        }
        tracing::debug!(id = self.id(), "container destroyed");

        Ok(())
    }
}
