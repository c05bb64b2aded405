use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{self, Pid};
use oci_spec::runtime::{LinuxDeviceType, LinuxNamespaceType, LinuxSeccompAction, Spec};

use super::builder::ContainerBuilder;
use super::{process_start_time, Container, ContainerStatus};
use crate::error::{ErrInvalidSpec, LibcontainerError, MissingSpecError};
use crate::namespaces::Namespaces;
use crate::process::factory::{self, InitParams};
use crate::process::fifo;
use crate::rootfs::utils::propagation_flags;
use crate::{apparmor, config, utils};

// Builder that can be used to configure the properties of a new container
pub struct InitContainerBuilder {
    containerBuilder: ContainerBuilder,
    bundlePath: PathBuf,
    use_systemd: bool,
}

impl InitContainerBuilder {
    /// Generates the base configuration for a new container from which
    /// configuration methods can be chained
    pub(super) fn new(containerBuilder: ContainerBuilder, bundlePath: PathBuf) -> Self {
        Self {
            containerBuilder,
            bundlePath,
            use_systemd: false,
        }
    }

    /// Sets if systemd should be used for managing cgroups
    pub fn with_systemd(mut self, should_use: bool) -> Self {
        self.use_systemd = should_use;
        self
    }

    /// Creates a new container. On return the init process is blocked on the
    /// exec fifo and the container is `created`.
    #[tracing::instrument(level = "debug", skip(self), fields(id = %self.containerBuilder.container_id))]
    pub fn build(self) -> Result<Container, LibcontainerError> {
        let spec = self.loadSpecFromFile()?;

        // rootPath/containerId
        let containerRootPath = self.createContainerRoot()?;

        self.createInContainerRoot(spec, &containerRootPath)
            .map_err(|err| {
                tracing::error!(?err, dir = ?containerRootPath, "failed to create container, cleaning up");
                if let Err(err) = fs::remove_dir_all(&containerRootPath) {
                    tracing::warn!(?err, dir = ?containerRootPath, "failed to remove container directory");
                }
                err
            })
    }

    fn createInContainerRoot(
        &self,
        spec: Spec,
        containerRootPath: &Path,
    ) -> Result<Container, LibcontainerError> {
        let mut container = self.createContainer(containerRootPath)?;

        let rootfsPath = spec.root().as_ref().ok_or(MissingSpecError::Root)?.path().clone();
        let process = spec.process().as_ref().ok_or(MissingSpecError::Process)?;
        let linux = spec.linux().as_ref().ok_or(MissingSpecError::Linux)?;
        let namespaces = Namespaces::try_from(linux.namespaces().as_ref())?;
        let consoleSocket = match process.terminal() {
            Some(true) => self.containerBuilder.console_socket.clone(),
            _ => None,
        };

        container
            .set_systemd(self.use_systemd)
            .set_annotations(spec.annotations().clone())
            .set_creator(unistd::geteuid().as_raw())
            .set_rootfs(rootfsPath.clone())
            .set_console_socket(consoleSocket.clone());

        // the fifo exists before init does, so the container reads as created
        // from the moment create returns
        fifo::create_exec_fifo(&container.exec_fifo_path())?;

        let initProcess = factory::spawn_init(&InitParams {
            namespaces: &namespaces,
            rootfs: &rootfsPath,
            env: process.env().as_deref().unwrap_or_default(),
            console_socket: consoleSocket.as_deref(),
            init_args: &self.containerBuilder.init_args,
        })?;
        let pid = initProcess.pid;

        let handOver = || -> Result<(), LibcontainerError> {
            container
                .set_pid(pid.as_raw())
                .set_init_start_time(process_start_time(pid)?)
                .set_spec(spec.clone())
                .set_status(ContainerStatus::Created);
            container.saveState2File()?;

            initProcess.sender.send(&container)?;

            if let Some(pid_file) = &self.containerBuilder.pid_file {
                utils::write_file_atomically(pid_file, format!("{pid}"))?;
            }
            Ok(())
        };

        if let Err(err) = handOver() {
            kill_init(pid);
            return Err(err);
        }

        tracing::debug!(id = container.id(), %pid, "container created");
        Ok(container)
    }

    fn createContainerRoot(&self) -> Result<PathBuf, LibcontainerError> {
        let containerRootPath = self
            .containerBuilder
            .rootPath
            .join(&self.containerBuilder.container_id);
        tracing::debug!("container directory will be {:?}", containerRootPath);

        if containerRootPath.exists() {
            tracing::error!(id = self.containerBuilder.container_id, dir = ?containerRootPath, "container already exists");
            return Err(LibcontainerError::Exist);
        }

        fs::create_dir_all(&containerRootPath).map_err(|err| {
            tracing::error!(?containerRootPath, "failed to create container directory: {}", err);
            LibcontainerError::OtherIO(err)
        })?;

        Ok(containerRootPath)
    }

    /// Reads config.json of the bundle
    fn loadSpecFromFile(&self) -> Result<Spec, LibcontainerError> {
        let spec = config::load(&self.bundlePath)?;
        self.validateSpec(&spec)?;
        Ok(spec)
    }

    /// Rejects everything the init process would fail on, before anything is
    /// changed on the host
    fn validateSpec(&self, spec: &Spec) -> Result<(), LibcontainerError> {
        let version = spec.version();
        if !version.starts_with("1.") {
            tracing::error!("runtime spec has incompatible version '{}'. Only 1.X.Y is supported", version);
            Err(ErrInvalidSpec::UnsupportedVersion)?;
        }

        spec.root().as_ref().ok_or(MissingSpecError::Root)?;
        let process = spec.process().as_ref().ok_or(MissingSpecError::Process)?;
        match process.args() {
            Some(args) if !args.is_empty() => {}
            _ => Err(MissingSpecError::Args)?,
        }

        if let Some(profile) = process.apparmor_profile().as_ref().filter(|p| !p.is_empty()) {
            let apparmor_is_enabled = apparmor::is_enabled().map_err(|err| {
                tracing::error!(?err, "failed to check if apparmor is enabled");
                LibcontainerError::OtherIO(err)
            })?;

            if !apparmor_is_enabled {
                tracing::error!(?profile, "apparmor profile exists in the spec, but apparmor is not activated on this system");
                Err(ErrInvalidSpec::AppArmorNotEnabled)?;
            }
        }

        if process.terminal() == Some(true) && self.containerBuilder.console_socket.is_none() {
            tracing::error!("terminal requested without a console socket");
            Err(ErrInvalidSpec::TerminalWithoutConsoleSocket)?;
        }

        let linux = spec.linux().as_ref().ok_or(MissingSpecError::Linux)?;

        let namespaces = linux.namespaces().as_deref().unwrap_or_default();
        for namespace in namespaces {
            if namespace.path().is_some() {
                Err(ErrInvalidSpec::JoinNamespace(namespace.typ()))?;
            }
            if namespace.typ() == LinuxNamespaceType::Time {
                Err(ErrInvalidSpec::TimeNamespace)?;
            }
        }
        let has = |typ| namespaces.iter().any(|ns| ns.typ() == typ);
        if !has(LinuxNamespaceType::Mount) {
            tracing::error!("the container must have its own mount namespace");
            Err(ErrInvalidSpec::MountNamespaceRequired)?;
        }
        if spec.hostname().as_ref().is_some_and(|h| !h.is_empty()) && !has(LinuxNamespaceType::Uts) {
            tracing::error!("a hostname can't be set without a uts namespace");
            Err(ErrInvalidSpec::HostnameWithoutUts)?;
        }

        if let Some(propagation) = linux.rootfs_propagation() {
            propagation_flags(Some(propagation))
                .map_err(|_| ErrInvalidSpec::RootfsPropagation(propagation.clone()))?;
        }

        for device in linux.devices().iter().flatten() {
            if device.typ() == LinuxDeviceType::A {
                Err(ErrInvalidSpec::DeviceTypeAll(device.path().clone()))?;
            }
        }

        if let Some(seccomp) = linux.seccomp() {
            if seccomp.default_action() == LinuxSeccompAction::ScmpActNotify {
                Err(ErrInvalidSpec::SeccompNotify)?;
            }
            for syscall in seccomp.syscalls().iter().flatten() {
                if syscall.action() == LinuxSeccompAction::ScmpActNotify {
                    Err(ErrInvalidSpec::SeccompNotify)?;
                }
                if syscall.names().is_empty() {
                    Err(ErrInvalidSpec::SeccompEmptyNames)?;
                }
            }
        }

        Ok(())
    }

    fn createContainer(&self, containerRootPath: &Path) -> Result<Container, LibcontainerError> {
        let container = Container::new(
            &self.containerBuilder.container_id,
            ContainerStatus::Creating,
            None,
            &self.bundlePath,
            containerRootPath,
        )?;
        container.saveState2File()?;
        Ok(container)
    }
}

/// Best effort, the creation already failed
fn kill_init(pid: Pid) {
    if let Err(err) = signal::kill(pid, Signal::SIGKILL) {
        tracing::warn!(%pid, ?err, "failed to kill init process");
        return;
    }
    let _ = waitpid(pid, None);
}
