//! Information about status and state of the container
use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use oci_spec::runtime::Spec;
use serde::{Deserialize, Serialize};

/// Indicates status of the container
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ContainerStatus {
    // The container is being created
    #[default]
    Creating,
    // The runtime has finished the create operation
    Created,
    // The container process has executed the user-specified program but has not exited
    Running,
    // The container process has exited
    Stopped,
    // Reserved, nothing pauses a container
    Paused,
}

impl ContainerStatus {
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerStatus::Created)
    }

    pub fn can_kill(&self) -> bool {
        use ContainerStatus::*;
        match self {
            Creating | Stopped => false,
            Created | Running | Paused => true,
        }
    }

    pub fn can_delete(&self) -> bool {
        matches!(self, ContainerStatus::Stopped)
    }
}

impl Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Creating => "Creating",
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
        };

        write!(f, "{print}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to open container state file {state_file_path:?}")]
    OpenStateFile {
        state_file_path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse container state file {state_file_path:?}")]
    ParseStateFile {
        state_file_path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write container state file {state_file_path:?}")]
    WriteStateFile {
        state_file_path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize container state")]
    Serialize(#[source] serde_json::Error),
}

type Result<T> = std::result::Result<T, StateError>;

/// Stores the state information of the container
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct State {
    // Version is the version of the specification that is supported.
    pub oci_version: String,
    // ID is the container ID
    pub id: String,
    // Status is the runtime status of the container.
    pub status: ContainerStatus,
    // Pid is the process ID for the container process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    // Bundle is the path to the container's bundle directory.
    pub bundle: PathBuf,
    // Annotations are key values associated with the container.
    pub annotations: Option<HashMap<String, String>>,
    // Creation time of the container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    // User that created the container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<u32>,
    // Specifies if systemd should be used to manage cgroups
    pub use_systemd: bool,
    /// Absolute path of the container root filesystem
    #[serde(default)]
    pub rootfs: PathBuf,
    /// Start time of the init process in clock ticks after boot. Tells a
    /// recycled pid apart from the init process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_start_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_socket: Option<PathBuf>,
    /// The spec the container was created from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<Spec>,
}

/// The fields of the OCI runtime state document
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OciState<'a> {
    pub oci_version: &'a str,
    pub id: &'a str,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    pub bundle: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<&'a HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl State {
    const STATE_FILE_PATH: &'static str = "state.json";

    pub fn new(
        container_id: &str,
        status: ContainerStatus,
        pid: Option<i32>,
        bundle: PathBuf,
    ) -> Self {
        Self {
            oci_version: "v1.0.2".to_string(),
            id: container_id.to_string(),
            status,
            pid,
            bundle,
            ..Default::default()
        }
    }

    pub fn save(&self, container_root: &Path) -> Result<()> {
        let state_file_path = Self::file_path(container_root);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&state_file_path)
            .map_err(|err| {
                tracing::error!(
                    state_file_path = ?state_file_path,
                    err = %err,
                    "failed to open container state file",
                );
                StateError::OpenStateFile {
                    state_file_path: state_file_path.to_owned(),
                    source: err,
                }
            })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(StateError::Serialize)?;
        writer.flush().map_err(|err| {
            tracing::error!(?state_file_path, %err, "failed to write container state file");
            StateError::WriteStateFile {
                state_file_path: state_file_path.to_owned(),
                source: err,
            }
        })?;

        Ok(())
    }

    pub fn load(container_root: &Path) -> Result<Self> {
        let state_file_path = Self::file_path(container_root);
        let state_file = File::open(&state_file_path).map_err(|err| {
            tracing::error!(?state_file_path, %err, "failed to open container state file");
            StateError::OpenStateFile {
                state_file_path: state_file_path.to_owned(),
                source: err,
            }
        })?;

        let state: Self = serde_json::from_reader(BufReader::new(state_file)).map_err(|err| {
            tracing::error!(?state_file_path, %err, "failed to parse container state file");
            StateError::ParseStateFile {
                state_file_path: state_file_path.to_owned(),
                source: err,
            }
        })?;

        Ok(state)
    }

    /// Returns the path to the state JSON file for the provided `container_root`.
    ///
    /// ```
    /// # use std::path::Path;
    /// # use libcontainer::container::State;
    ///
    /// let container_root = Path::new("/var/run/containers/container");
    /// let state_file = State::file_path(&container_root);
    /// assert_eq!(state_file.to_str(), Some("/var/run/containers/container/state.json"));
    /// ```
    pub fn file_path(container_root: &Path) -> PathBuf {
        container_root.join(Self::STATE_FILE_PATH)
    }

    pub fn oci_state(&self) -> OciState<'_> {
        OciState {
            oci_version: &self.oci_version,
            id: &self.id,
            status: self.status.to_string().to_lowercase(),
            pid: self.pid,
            bundle: &self.bundle,
            annotations: self.annotations.as_ref(),
            created: self.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_state_round_trip() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut state = State::new(
            "sandbox",
            ContainerStatus::Created,
            Some(42),
            PathBuf::from("/bundle"),
        );
        state.rootfs = PathBuf::from("/bundle/rootfs");
        state.init_start_time = Some(1234);
        state.spec = Some(Spec::default());
        state.save(tmp.path())?;

        let loaded = State::load(tmp.path())?;
        assert_eq!(loaded.id, "sandbox");
        assert_eq!(loaded.status, ContainerStatus::Created);
        assert_eq!(loaded.pid, Some(42));
        assert_eq!(loaded.rootfs, PathBuf::from("/bundle/rootfs"));
        assert_eq!(loaded.init_start_time, Some(1234));
        assert!(loaded.spec.is_some());
        Ok(())
    }

    #[test]
    fn test_load_missing_state() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        assert!(matches!(
            State::load(tmp.path()),
            Err(StateError::OpenStateFile { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_oci_state_document() -> Result<()> {
        let state = State::new(
            "sandbox",
            ContainerStatus::Running,
            Some(7),
            PathBuf::from("/bundle"),
        );
        let doc: Value = serde_json::to_value(state.oci_state())?;
        assert_eq!(doc["ociVersion"], "v1.0.2");
        assert_eq!(doc["status"], "running");
        assert_eq!(doc["pid"], 7);
        assert_eq!(doc["bundle"], "/bundle");
        assert!(doc.get("spec").is_none());
        Ok(())
    }

    #[test]
    fn test_status_transitions() {
        assert!(ContainerStatus::Created.can_start());
        assert!(!ContainerStatus::Running.can_start());
        assert!(ContainerStatus::Running.can_kill());
        assert!(!ContainerStatus::Stopped.can_kill());
        assert!(ContainerStatus::Stopped.can_delete());
        assert!(!ContainerStatus::Created.can_delete());
    }
}
