use std::fmt::{Debug, Display};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, TMPFS_MAGIC};
use nix::unistd::Pid;
use oci_spec::runtime::LinuxResources;
use once_cell::sync::OnceCell;

#[cfg(feature = "systemd")]
use super::systemd;
#[cfg(feature = "v1")]
use super::v1;
#[cfg(feature = "v2")]
use super::v2;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
pub const CGROUP_PROCS: &str = "cgroup.procs";

static CGROUP_SETUP: OnceCell<CgroupSetup> = OnceCell::new();

pub trait CgroupManager {
    type Error;

    /// Adds a task specified by its pid to the cgroup, creating the cgroup
    /// directories first when they are missing
    fn add_task(&self, pid: Pid) -> Result<(), Self::Error>;

    /// Applies resource restrictions to the cgroup
    fn apply(&self, controller_opt: &ControllerOpt) -> Result<(), Self::Error>;

    /// Removes the cgroup
    fn remove(&self) -> Result<(), Self::Error>;

    /// Path of the cgroup directory backing this manager
    fn path(&self) -> &Path;
}

#[derive(thiserror::Error, Debug)]
pub enum AnyManagerError {
    #[cfg(feature = "v1")]
    #[error(transparent)]
    V1(#[from] v1::manager::V1ManagerError),
    #[cfg(feature = "v2")]
    #[error(transparent)]
    V2(#[from] v2::manager::V2ManagerError),
    #[cfg(feature = "systemd")]
    #[error(transparent)]
    Systemd(#[from] systemd::manager::SystemdManagerError),
}

pub enum AnyCgroupManager {
    #[cfg(feature = "v1")]
    V1(v1::manager::Manager),
    #[cfg(feature = "v2")]
    V2(v2::manager::Manager),
    #[cfg(feature = "systemd")]
    Systemd(Box<systemd::manager::Manager>),
}

impl Debug for AnyCgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyCgroupManager").field(&self.path()).finish()
    }
}

macro_rules! dispatch {
    ($self:ident, $manager:ident => $body:expr) => {
        match $self {
            #[cfg(feature = "v1")]
            AnyCgroupManager::V1($manager) => $body,
            #[cfg(feature = "v2")]
            AnyCgroupManager::V2($manager) => $body,
            #[cfg(feature = "systemd")]
            AnyCgroupManager::Systemd($manager) => $body,
        }
    };
}

impl CgroupManager for AnyCgroupManager {
    type Error = AnyManagerError;

    fn add_task(&self, pid: Pid) -> Result<(), Self::Error> {
        dispatch!(self, m => Ok(m.add_task(pid)?))
    }

    fn apply(&self, controller_opt: &ControllerOpt) -> Result<(), Self::Error> {
        dispatch!(self, m => Ok(m.apply(controller_opt)?))
    }

    fn remove(&self) -> Result<(), Self::Error> {
        dispatch!(self, m => Ok(m.remove()?))
    }

    fn path(&self) -> &Path {
        dispatch!(self, m => m.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupSetup {
    Hybrid,
    Legacy,
    Unified,
}

impl Display for CgroupSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match self {
            CgroupSetup::Hybrid => "hybrid",
            CgroupSetup::Legacy => "legacy",
            CgroupSetup::Unified => "unified",
        };

        write!(f, "{print}")
    }
}

/// Resources the controllers apply to a cgroup
#[derive(Debug, Clone, Copy)]
pub struct ControllerOpt<'a> {
    pub resources: &'a LinuxResources,
}

#[derive(thiserror::Error, Debug)]
pub enum WrappedIoError {
    #[error("failed to open {path:?}: {err}")]
    Open { err: std::io::Error, path: PathBuf },
    #[error("failed to write {data} to {path:?}: {err}")]
    Write {
        err: std::io::Error,
        path: PathBuf,
        data: String,
    },
    #[error("failed to read {path:?}: {err}")]
    Read { err: std::io::Error, path: PathBuf },
    #[error("failed to create dir {path:?}: {err}")]
    CreateDir { err: std::io::Error, path: PathBuf },
    #[error("at {path:?}: {err}")]
    Other { err: std::io::Error, path: PathBuf },
}

impl WrappedIoError {
    pub fn inner(&self) -> &std::io::Error {
        match self {
            WrappedIoError::Open { err, .. } => err,
            WrappedIoError::Write { err, .. } => err,
            WrappedIoError::Read { err, .. } => err,
            WrappedIoError::CreateDir { err, .. } => err,
            WrappedIoError::Other { err, .. } => err,
        }
    }
}

pub(crate) trait WrapIoResult {
    type Target;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError>;
    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError>;
}

impl<T> WrapIoResult for Result<T, std::io::Error> {
    type Target = T;

    fn wrap_create_dir<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::CreateDir {
            err,
            path: path.into(),
        })
    }

    fn wrap_read<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Read {
            err,
            path: path.into(),
        })
    }

    fn wrap_open<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Open {
            err,
            path: path.into(),
        })
    }

    fn wrap_write<P: Into<PathBuf>, D: Into<String>>(
        self,
        path: P,
        data: D,
    ) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Write {
            err,
            path: path.into(),
            data: data.into(),
        })
    }

    fn wrap_other<P: Into<PathBuf>>(self, path: P) -> Result<Self::Target, WrappedIoError> {
        self.map_err(|err| WrappedIoError::Other {
            err,
            path: path.into(),
        })
    }
}

#[inline]
pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<(), WrappedIoError> {
    let path = path.as_ref();

    OpenOptions::new()
        .create(false)
        .write(true)
        .truncate(false)
        .open(path)
        .wrap_open(path)?
        .write_all(data.as_bytes())
        .wrap_write(path, data)?;

    Ok(())
}

#[inline]
pub fn write_cgroup_file<P: AsRef<Path>, T: ToString>(
    path: P,
    data: T,
) -> Result<(), WrappedIoError> {
    write_cgroup_file_str(path, &data.to_string())
}

#[inline]
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String, WrappedIoError> {
    let path = path.as_ref();
    fs::read_to_string(path).wrap_read(path)
}

/// Joins an absolute cgroup path onto a hierarchy root without escaping it
pub fn join_cgroup_path(root: &Path, cgroup_path: &Path) -> PathBuf {
    match cgroup_path.strip_prefix("/") {
        Ok(relative) => root.join(relative),
        Err(_) => root.join(cgroup_path),
    }
}

/// Removes a cgroup directory, treating an already missing one as removed
pub fn remove_cgroup_dir(path: &Path) -> Result<(), WrappedIoError> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(WrappedIoError::Other {
            err,
            path: path.to_path_buf(),
        }),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GetCgroupSetupError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("non default cgroup root not supported")]
    NonDefault,
    #[error("failed to detect cgroup setup")]
    FailedToDetect,
}

/// Determines the cgroup setup of the system. Systems typically have one of
/// three setups:
/// - Unified: Pure cgroup v2 system.
/// - Legacy: Pure cgroup v1 system.
/// - Hybrid: Hybrid is basically a cgroup v1 system, except for
///   an additional unified hierarchy which doesn't have any
///   controllers attached. Resource control can purely be achieved
///   through the cgroup v1 hierarchy, not through the cgroup v2 hierarchy.
///
/// The result is computed once and cached for the lifetime of the process.
pub fn get_cgroup_setup() -> Result<CgroupSetup, GetCgroupSetupError> {
    CGROUP_SETUP
        .get_or_try_init(|| get_cgroup_setup_with_root(Path::new(DEFAULT_CGROUP_ROOT)))
        .copied()
}

pub fn get_cgroup_setup_with_root(root_path: &Path) -> Result<CgroupSetup, GetCgroupSetupError> {
    match root_path.exists() {
        true => {
            // If the filesystem is of type cgroup2, the system is in unified mode.
            // If the filesystem is tmpfs instead the system is either in legacy or
            // hybrid mode. If a cgroup2 filesystem has been mounted under the "unified"
            // folder we are in hybrid mode, otherwise we are in legacy mode.
            let stat = statfs(root_path)
                .map_err(|err| WrappedIoError::Other {
                    err: err.into(),
                    path: root_path.to_path_buf(),
                })?;
            if stat.filesystem_type() == CGROUP2_SUPER_MAGIC {
                return Ok(CgroupSetup::Unified);
            }

            if stat.filesystem_type() == TMPFS_MAGIC {
                let unified = root_path.join("unified");
                if unified.exists() {
                    let stat = statfs(&unified).map_err(|err| WrappedIoError::Other {
                        err: err.into(),
                        path: unified.clone(),
                    })?;
                    if stat.filesystem_type() == CGROUP2_SUPER_MAGIC {
                        return Ok(CgroupSetup::Hybrid);
                    }
                }

                return Ok(CgroupSetup::Legacy);
            }
        }
        false => return Err(GetCgroupSetupError::NonDefault),
    }

    Err(GetCgroupSetupError::FailedToDetect)
}

#[derive(Debug, Clone)]
pub struct CgroupConfig {
    pub cgroup_path: PathBuf,
    pub systemd_cgroup: bool,
    pub container_name: String,
}

#[derive(thiserror::Error, Debug)]
pub enum CreateCgroupSetupError {
    #[error("failed to get cgroup setup: {0}")]
    CgroupSetup(#[from] GetCgroupSetupError),
    #[error("systemd cgroup flag passed, but systemd cgroups are only supported on the unified hierarchy")]
    SystemdOnLegacy,
    #[error("cgroup setup {0} is not supported by this build")]
    Unsupported(CgroupSetup),
    #[cfg(feature = "v1")]
    #[error("v1 error: {0}")]
    V1(#[from] v1::manager::V1ManagerError),
    #[cfg(feature = "v2")]
    #[error("v2 error: {0}")]
    V2(#[from] v2::manager::V2ManagerError),
    #[cfg(feature = "systemd")]
    #[error("systemd error: {0}")]
    Systemd(#[from] systemd::manager::SystemdManagerError),
}

pub fn create_cgroup_manager(
    config: CgroupConfig,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    let cgroup_setup = get_cgroup_setup()?;
    tracing::debug!(%cgroup_setup, ?config, "creating cgroup manager");

    match cgroup_setup {
        CgroupSetup::Legacy | CgroupSetup::Hybrid => {
            if config.systemd_cgroup {
                return Err(CreateCgroupSetupError::SystemdOnLegacy);
            }
            create_v1_cgroup_manager(cgroup_setup, &config.cgroup_path)
        }
        CgroupSetup::Unified => {
            if config.systemd_cgroup {
                create_systemd_cgroup_manager(cgroup_setup, config)
            } else {
                create_v2_cgroup_manager(cgroup_setup, &config.cgroup_path)
            }
        }
    }
}

#[cfg(feature = "v1")]
fn create_v1_cgroup_manager(
    _: CgroupSetup,
    cgroup_path: &Path,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    tracing::info!("cgroup manager V1 will be used");
    Ok(AnyCgroupManager::V1(v1::manager::Manager::any(cgroup_path)?))
}

#[cfg(not(feature = "v1"))]
fn create_v1_cgroup_manager(
    setup: CgroupSetup,
    _: &Path,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    Err(CreateCgroupSetupError::Unsupported(setup))
}

#[cfg(feature = "v2")]
fn create_v2_cgroup_manager(
    _: CgroupSetup,
    cgroup_path: &Path,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    tracing::info!("cgroup manager V2 will be used");
    Ok(AnyCgroupManager::V2(v2::manager::Manager::any(cgroup_path)?))
}

#[cfg(not(feature = "v2"))]
fn create_v2_cgroup_manager(
    setup: CgroupSetup,
    _: &Path,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    Err(CreateCgroupSetupError::Unsupported(setup))
}

#[cfg(feature = "systemd")]
fn create_systemd_cgroup_manager(
    _: CgroupSetup,
    config: CgroupConfig,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    tracing::info!("systemd cgroup manager will be used");
    Ok(AnyCgroupManager::Systemd(Box::new(
        systemd::manager::Manager::any(&config.cgroup_path, &config.container_name)?,
    )))
}

#[cfg(not(feature = "systemd"))]
fn create_systemd_cgroup_manager(
    setup: CgroupSetup,
    _: CgroupConfig,
) -> Result<AnyCgroupManager, CreateCgroupSetupError> {
    Err(CreateCgroupSetupError::Unsupported(setup))
}
