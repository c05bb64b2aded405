use nix::sys::signal::{self, Signal};

use super::Container;
use crate::error::LibcontainerError;

impl Container {
    /// Sends the specified signal to the container init process
    ///
    /// # Example
    ///
    /// ```no_run
    /// use libcontainer::container::builder::ContainerBuilder;
    /// use nix::sys::signal::Signal;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let mut container = ContainerBuilder::new("74f1a4cb3801".to_owned())
    ///     .as_init("/var/run/docker/bundle")
    ///     .build()?;
    ///
    /// container.kill(Signal::SIGKILL)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn kill(&mut self, signal: Signal) -> Result<(), LibcontainerError> {
        self.refresh_status()?;

        if !self.can_kill() {
            tracing::error!(id = ?self.id(), status = ?self.status(), "cannot kill container due to incorrect state");
            return Err(LibcontainerError::IncorrectStatus {
                expected: "created or running",
                actual: self.status(),
            });
        }

        let pid = self.pid().ok_or_else(|| {
            LibcontainerError::Other(format!("container {} has no init process", self.id()))
        })?;

        signal::kill(pid, signal).map_err(|err| {
            tracing::error!(id = ?self.id(), %pid, ?signal, ?err, "failed to kill container");
            err
        })?;
        tracing::debug!(id = self.id(), ?signal, "signal delivered");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::container::ContainerStatus;

    #[test]
    fn test_kill_stopped_container() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut container = Container::new(
            "sandbox",
            ContainerStatus::Running,
            None,
            tmp.path(),
            tmp.path(),
        )?;
        // without a pid the container derives as stopped
        assert!(matches!(
            container.kill(Signal::SIGTERM),
            Err(LibcontainerError::IncorrectStatus {
                actual: ContainerStatus::Stopped,
                ..
            })
        ));
        Ok(())
    }
}
