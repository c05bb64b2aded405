//! Cgroup management for container init processes.
//!
//! Supports the legacy (v1) per-controller hierarchies, the unified (v2)
//! hierarchy and systemd style `slice:prefix:name` cgroup paths on top of the
//! unified hierarchy.
pub mod common;
#[cfg(feature = "systemd")]
pub mod systemd;
#[cfg(test)]
pub(crate) mod test;
#[cfg(feature = "v1")]
pub mod v1;
#[cfg(feature = "v2")]
pub mod v2;
