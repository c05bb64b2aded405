//! Building blocks of the ferrocell runtime: loading a bundle's spec, the
//! container record and its lifecycle, the process factory that clones the
//! init process and the init sequencer that runs inside the new namespaces.
#![allow(non_snake_case)]

pub mod apparmor;
pub mod capabilities;
pub mod config;
pub mod container;
pub mod error;
pub mod namespaces;
pub mod process;
pub mod rootfs;
#[cfg(feature = "libseccomp")]
pub mod seccomp;
pub mod syscall;
pub mod tty;
pub mod utils;
pub mod workload;

pub use error::LibcontainerError;
