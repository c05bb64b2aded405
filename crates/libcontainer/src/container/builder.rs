use std::path::PathBuf;

use super::init_builder::InitContainerBuilder;
use crate::error::{ErrInvalidID, LibcontainerError};
use crate::utils::PathBufExt;

pub struct ContainerBuilder {
    /// Id of the container
    pub(super) container_id: String,

    /// Root directory for container state <br>
    /// /run/ferrocell
    pub(super) rootPath: PathBuf,

    /// File which will be used to communicate the pid of the
    /// container process to the higher level runtime
    pub(super) pid_file: Option<PathBuf>,
    /// Socket to communicate the file descriptor of the ptty
    pub(super) console_socket: Option<PathBuf>,
    /// Global flags the init process is re-executed with, so it logs the same
    /// way the invoking runtime does
    pub(super) init_args: Vec<String>,
}

/// Builder that can be used to configure the common properties of a
/// container before it is turned into an init builder
///
/// # Example
///
/// ```no_run
/// use libcontainer::container::builder::ContainerBuilder;
///
/// ContainerBuilder::new("74f1a4cb3801".to_owned())
///     .with_root_path("/run/containers/ferrocell").expect("invalid root path")
///     .with_pid_file(Some("/var/run/docker.pid")).expect("invalid pid file")
///     .with_console_socket(Some("/var/run/docker/sock.tty"))
///     .as_init("/var/run/docker/bundle")
///     .build();
/// ```
impl ContainerBuilder {
    /// Generates the base configuration for a container
    ///
    /// # Example
    ///
    /// ```no_run
    /// use libcontainer::container::builder::ContainerBuilder;
    ///
    /// let builder = ContainerBuilder::new("74f1a4cb3801".to_owned());
    /// ```
    pub fn new(container_id: String) -> Self {
        let root_path = PathBuf::from("/run/ferrocell");
        Self {
            container_id,
            rootPath: root_path,
            pid_file: None,
            console_socket: None,
            init_args: Vec::new(),
        }
    }

    /// validate_id checks if the supplied container ID is valid, returning
    /// the ErrInvalidID in case it is not.
    ///
    /// A valid ID is a non-empty string consisting only of
    /// the following characters:
    /// - uppercase (A-Z) and lowercase (a-z) Latin letters;
    /// - digits (0-9);
    /// - underscore (_);
    /// - plus sign (+);
    /// - minus sign (-);
    /// - period (.).
    ///
    /// In addition, IDs that can't be used to represent a file name
    /// (such as . or ..) are rejected.
    pub fn validate_id(self) -> Result<Self, LibcontainerError> {
        let container_id = self.container_id.clone();
        if container_id.is_empty() {
            Err(ErrInvalidID::Empty)?;
        }

        if container_id == "." || container_id == ".." {
            Err(ErrInvalidID::FileName)?;
        }

        for c in container_id.chars() {
            match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '+' | '-' | '.' => (),
                _ => Err(ErrInvalidID::InvalidChars(c))?,
            }
        }
        Ok(self)
    }

    /// Transforms this builder into an init builder
    /// # Example
    ///
    /// ```no_run
    /// # use libcontainer::container::builder::ContainerBuilder;
    ///
    /// ContainerBuilder::new("74f1a4cb3801".to_owned())
    ///     .as_init("/var/run/docker/bundle")
    ///     .with_systemd(false)
    ///     .build();
    /// ```
    #[allow(clippy::wrong_self_convention)]
    pub fn as_init<P: Into<PathBuf>>(self, bundle: P) -> InitContainerBuilder {
        InitContainerBuilder::new(self, bundle.into())
    }

    /// Sets the root path which will be used to store the container state
    pub fn with_root_path<P: Into<PathBuf>>(mut self, path: P) -> Result<Self, LibcontainerError> {
        let path = path.into();
        self.rootPath = path.canonicalize_safely().map_err(|err| {
            tracing::error!(?path, ?err, "failed to canonicalize root path");
            LibcontainerError::InvalidInput(format!("invalid root path {path:?}: {err:?}"))
        })?;

        Ok(self)
    }

    /// Sets the pid file which will be used to write the pid of the container
    /// process
    pub fn with_pid_file<P: Into<PathBuf>>(
        mut self,
        path: Option<P>,
    ) -> Result<Self, LibcontainerError> {
        self.pid_file = match path.map(|p| p.into()) {
            Some(path) => Some(path.canonicalize_safely().map_err(|err| {
                tracing::error!(?path, ?err, "failed to canonicalize pid file");
                LibcontainerError::InvalidInput(format!("invalid pid file path {path:?}: {err:?}"))
            })?),
            None => None,
        };

        Ok(self)
    }

    /// Sets the console socket, which will be used to send the file descriptor
    /// of the pseudoterminal
    pub fn with_console_socket<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.console_socket = path.map(|p| p.into());
        self
    }

    /// Sets the flags placed in front of the `init` subcommand when the
    /// runtime re-executes itself as the container init process
    /// # Example
    ///
    /// ```no_run
    /// # use libcontainer::container::builder::ContainerBuilder;
    ///
    /// ContainerBuilder::new("74f1a4cb3801".to_owned())
    ///     .with_init_args(vec!["--log-level".to_owned(), "debug".to_owned()]);
    /// ```
    pub fn with_init_args(mut self, init_args: Vec<String>) -> Self {
        self.init_args = init_args;
        self
    }
}
