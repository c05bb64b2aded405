//! Handles the creation of a new container
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use libcontainer::container::builder::ContainerBuilder;

/// Create a container
#[derive(Parser, Debug)]
pub struct Create {
    /// Path to the bundle directory, containing config.json and root filesystem
    #[clap(short, long, default_value = ".")]
    pub bundle: PathBuf,
    /// Unix socket (file) path , which will receive file descriptor of the writing end of the pseudoterminal
    #[clap(short, long)]
    pub console_socket: Option<PathBuf>,
    /// File to write pid of the container created
    #[clap(short, long)]
    pub pid_file: Option<PathBuf>,

    /// Name of the container instance to be started
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
}

// One thing to note is that in the end, container is just another process in Linux
// it has specific/different control group, namespace, using which program executing in it
// can be given impression that is is running on a complete system, but on the system which
// it is running, it is just another process, and has attributes such as pid, file descriptors, etc.
// associated with it like any other process.
pub fn create(
    args: Create,
    root_path: PathBuf,
    systemd_cgroup: bool,
    init_args: Vec<String>,
) -> Result<()> {
    ContainerBuilder::new(args.container_id.clone())
        .with_pid_file(args.pid_file.as_ref())?
        .with_console_socket(args.console_socket.as_ref())
        .with_root_path(root_path)? // /run/user/1000/ferrocell
        .with_init_args(init_args)
        .validate_id()?
        .as_init(&args.bundle)
        .with_systemd(systemd_cgroup)
        .build()?;

    Ok(())
}
