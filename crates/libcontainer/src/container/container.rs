use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use libcgroups::common::CgroupConfig;
use nix::unistd::{Pid, Uid};
use oci_spec::runtime::Spec;
use procfs::process::{ProcState, Process};

use crate::container::{ContainerStatus, State};
use crate::error::LibcontainerError;
use crate::process::fifo::EXEC_FIFO_NAME;
use crate::utils;

/// The record of one container. The runtime owns it and persists it under
/// the state root; the init process receives a copy over the sync pipe.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub state: State,

    /// stateRoot/containerId
    pub rootPath: PathBuf,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            state: State::default(),
            rootPath: PathBuf::from("/run/ferrocell"),
        }
    }
}

impl Container {
    pub fn new(
        containerId: &str,
        containerStatus: ContainerStatus,
        pid: Option<i32>,
        bundlePath: &Path,
        containerRootPath: &Path,
    ) -> Result<Self, LibcontainerError> {
        let containerRootPath = fs::canonicalize(containerRootPath).map_err(|err| {
            LibcontainerError::InvalidInput(format!(
                "invalid container root {containerRootPath:?}: {err:?}"
            ))
        })?;

        let bundlePath = fs::canonicalize(bundlePath).map_err(|err| {
            LibcontainerError::InvalidInput(format!("invalid bundle {bundlePath:?}: {err:?}"))
        })?;

        let state = State::new(containerId, containerStatus, pid, bundlePath);

        Ok(Self {
            state,
            rootPath: containerRootPath,
        })
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn can_start(&self) -> bool {
        self.state.status.can_start()
    }

    pub fn can_kill(&self) -> bool {
        self.state.status.can_kill()
    }

    pub fn can_delete(&self) -> bool {
        self.state.status.can_delete()
    }

    pub fn can_exec(&self) -> bool {
        self.state.status == ContainerStatus::Running
    }

    pub fn bundle(&self) -> &PathBuf {
        &self.state.bundle
    }

    pub fn set_annotations(&mut self, annotations: Option<HashMap<String, String>>) -> &mut Self {
        self.state.annotations = annotations;
        self
    }

    pub fn pid(&self) -> Option<Pid> {
        self.state.pid.map(Pid::from_raw)
    }

    pub fn set_pid(&mut self, pid: i32) -> &mut Self {
        self.state.pid = Some(pid);
        self
    }

    pub fn init_start_time(&self) -> Option<u64> {
        self.state.init_start_time
    }

    pub fn set_init_start_time(&mut self, start_time: u64) -> &mut Self {
        self.state.init_start_time = Some(start_time);
        self
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.state.created
    }

    pub fn creator(&self) -> Option<OsString> {
        let uid = self.state.creator?;
        utils::get_unix_user(Uid::from_raw(uid)).map(|user| OsString::from(user.name))
    }

    pub fn set_creator(&mut self, uid: u32) -> &mut Self {
        self.state.creator = Some(uid);
        self
    }

    pub fn systemd(&self) -> bool {
        self.state.use_systemd
    }

    pub fn set_systemd(&mut self, should_use: bool) -> &mut Self {
        self.state.use_systemd = should_use;
        self
    }

    pub fn rootfs(&self) -> &Path {
        &self.state.rootfs
    }

    pub fn set_rootfs(&mut self, rootfs: PathBuf) -> &mut Self {
        self.state.rootfs = rootfs;
        self
    }

    pub fn console_socket(&self) -> Option<&Path> {
        self.state.console_socket.as_deref()
    }

    pub fn set_console_socket(&mut self, console_socket: Option<PathBuf>) -> &mut Self {
        self.state.console_socket = console_socket;
        self
    }

    pub fn spec(&self) -> Result<&Spec, LibcontainerError> {
        self.state.spec.as_ref().ok_or_else(|| {
            tracing::error!(id = self.id(), "container record carries no spec");
            LibcontainerError::Other(format!("container {} carries no spec", self.id()))
        })
    }

    pub fn set_spec(&mut self, spec: Spec) -> &mut Self {
        self.state.spec = Some(spec);
        self
    }

    pub fn exec_fifo_path(&self) -> PathBuf {
        self.rootPath.join(EXEC_FIFO_NAME)
    }

    /// Cgroup of the container. Only containers whose spec carries both
    /// resources and a cgroups path get one.
    pub fn cgroup_config(&self) -> Option<CgroupConfig> {
        let linux = self.state.spec.as_ref()?.linux().as_ref()?;
        match (linux.resources(), linux.cgroups_path()) {
            (Some(_), Some(cgroup_path)) => Some(CgroupConfig {
                cgroup_path: cgroup_path.clone(),
                systemd_cgroup: self.systemd(),
                container_name: self.id().to_owned(),
            }),
            _ => None,
        }
    }

    pub fn status(&self) -> ContainerStatus {
        self.state.status
    }

    pub fn set_status(&mut self, status: ContainerStatus) -> &mut Self {
        let created = match (status, self.state.created) {
            (ContainerStatus::Created, None) => Some(Utc::now()),
            _ => self.state.created,
        };

        self.state.created = created;
        self.state.status = status;

        self
    }

    /// Derives the status from the init process and the exec fifo:
    /// fifo present means created, a live init without it means running,
    /// anything else means stopped.
    pub fn refresh_status(&mut self) -> Result<(), LibcontainerError> {
        let new_status = match self.pid() {
            None if self.status() == ContainerStatus::Creating => ContainerStatus::Creating,
            None => ContainerStatus::Stopped,
            Some(pid) if !self.is_init_alive(pid) => ContainerStatus::Stopped,
            Some(_) if self.status() == ContainerStatus::Paused => ContainerStatus::Paused,
            Some(_) if self.exec_fifo_path().exists() => ContainerStatus::Created,
            Some(_) => ContainerStatus::Running,
        };

        self.set_status(new_status);
        Ok(())
    }

    pub(crate) fn is_init_alive(&self, pid: Pid) -> bool {
        // Process::new does not spawn anything, it reads /proc/<pid>
        let stat = match Process::new(pid.as_raw()).and_then(|proc| proc.stat()) {
            Ok(stat) => stat,
            Err(_) => return false,
        };

        if matches!(stat.state(), Ok(ProcState::Zombie) | Ok(ProcState::Dead)) {
            return false;
        }

        match self.init_start_time() {
            Some(start_time) if start_time != stat.starttime => {
                tracing::debug!(%pid, "pid was reused by another process");
                false
            }
            _ => true,
        }
    }

    pub fn load(container_root: PathBuf) -> Result<Self, LibcontainerError> {
        let state = State::load(&container_root)?;
        let mut container = Self {
            state,
            rootPath: container_root,
        };
        container.refresh_status()?;
        Ok(container)
    }

    pub fn saveState2File(&self) -> Result<(), LibcontainerError> {
        tracing::debug!(id = self.id(), status = %self.status(), root = ?self.rootPath, "save container state");
        self.state.save(&self.rootPath)?;

        Ok(())
    }
}

/// Start time of `pid` in clock ticks after boot
pub(crate) fn process_start_time(pid: Pid) -> Result<u64, LibcontainerError> {
    let stat = Process::new(pid.as_raw())?.stat()?;
    Ok(stat.starttime)
}
