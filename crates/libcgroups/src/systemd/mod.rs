//! Systemd style cgroup paths (`slice:prefix:name`) resolved onto the unified
//! hierarchy. Units are laid out the way systemd names them, the cgroup itself
//! is driven through the cgroup v2 controllers.
pub mod manager;
