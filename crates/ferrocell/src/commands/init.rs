//! Entry point of the re-executed runtime, running as the container's init
//! process inside the new namespaces
use anyhow::Result;
use libcontainer::process::init::container_init;

pub fn init() -> Result<()> {
    // only returns on failure, the workload replaces this process otherwise
    match container_init() {
        Ok(never) => match never {},
        Err(err) => {
            tracing::error!(?err, "container init failed");
            Err(err.into())
        }
    }
}
