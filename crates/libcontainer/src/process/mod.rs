//! The two halves of starting a container process: the factory clones the
//! init process and hands it the container over the sync pipe, the init
//! sequence runs inside the new namespaces and ends in the workload.

pub mod channel;
pub mod factory;
pub mod fifo;
pub mod init;
