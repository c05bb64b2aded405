//! Container management
/// This module is responsible for the creation of containers and for the
/// operations on existing ones. The builder loads and validates a bundle,
/// records the container under the state root and starts its init process.
/// The lifecycle operations load that record back by id.
pub mod builder;
#[allow(clippy::module_inception)]
mod container;
mod container_delete;
mod container_kill;
mod container_start;
pub mod init_builder;
pub mod state;
pub use container::Container;
pub(crate) use container::process_start_time;
pub use state::{ContainerStatus, OciState, State};
