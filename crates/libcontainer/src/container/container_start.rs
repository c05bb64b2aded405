use super::{Container, ContainerStatus};
use crate::error::LibcontainerError;
use crate::process::fifo;

impl Container {
    /// Starts a previously created container
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
    /// container.start()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn start(&mut self) -> Result<(), LibcontainerError> {
        self.refresh_status()?;

        if !self.can_start() {
            tracing::error!(status = ?self.status(), id = ?self.id(), "cannot start container due to incorrect state");
            return Err(LibcontainerError::IncorrectStatus {
                expected: "created",
                actual: self.status(),
            });
        }

        let pid = self
            .pid()
            .ok_or_else(|| LibcontainerError::Other("created container has no init pid".to_owned()))?;
        // opening the fifo for reading lets the init process exec the workload
        fifo::release(&self.exec_fifo_path(), || self.is_init_alive(pid))?;

        self.set_status(ContainerStatus::Running).saveState2File()?;
        tracing::debug!(id = self.id(), "container started");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;

    use super::*;

    #[test]
    fn test_start_requires_created() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut container = Container::new(
            "sandbox",
            ContainerStatus::Stopped,
            None,
            tmp.path(),
            tmp.path(),
        )?;
        let err = container.start().expect_err("a stopped container can't be started");
        assert!(matches!(
            err,
            LibcontainerError::IncorrectStatus {
                expected: "created",
                actual: ContainerStatus::Stopped
            }
        ));
        assert!(!Path::new(&container.exec_fifo_path()).exists());
        Ok(())
    }
}
