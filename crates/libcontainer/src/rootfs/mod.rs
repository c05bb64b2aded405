//! During kernel initialization, a minimal replica of the ramfs filesystem is loaded, called rootfs.
//! Most systems mount another filesystem over it
//! Here the container's root is built from the bundle rootfs and pivoted into.

pub mod device;
pub mod mount;
#[allow(clippy::module_inception)]
pub mod rootfs;
pub mod symlink;
pub mod utils;

pub use rootfs::{RootFS, RootfsError};
