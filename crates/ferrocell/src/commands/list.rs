//! Contains Functionality of list container command
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use libcontainer::container::{Container, ContainerStatus, State};
use serde::Serialize;
use tabwriter::TabWriter;

/// List created containers
#[derive(Parser, Debug)]
pub struct List {
    /// Specify the format (default or table)
    #[clap(long, default_value = "table")]
    pub format: String,
    /// Only display container IDs
    #[clap(long, short)]
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerInfo {
    id: String,
    pid: i32,
    status: ContainerStatus,
    bundle: PathBuf,
    created: String,
    creator: String,
}

impl From<&Container> for ContainerInfo {
    fn from(container: &Container) -> Self {
        let pid = match container.status() {
            ContainerStatus::Stopped => 0,
            _ => container.pid().map(|pid| pid.as_raw()).unwrap_or_default(),
        };
        let created = container
            .created()
            .map(|utc| DateTime::<Local>::from(utc).to_rfc3339())
            .unwrap_or_default();
        let creator = container
            .creator()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            id: container.id().to_owned(),
            pid,
            status: container.status(),
            bundle: container.bundle().clone(),
            created,
            creator,
        }
    }
}

/// lists all existing containers
pub fn list(args: List, root_path: PathBuf) -> Result<()> {
    let containers = load_containers(&root_path)?;

    if args.quiet {
        for container in &containers {
            println!("{}", container.id());
        }
        return Ok(());
    }

    match args.format.as_str() {
        "table" => print_table(&containers),
        "json" => {
            let infos: Vec<ContainerInfo> = containers.iter().map(ContainerInfo::from).collect();
            println!("{}", serde_json::to_string_pretty(&infos)?);
            Ok(())
        }
        unknown => bail!("unknown list format {unknown}, expected table or json"),
    }
}

/// Every directory below the root holding a readable state file. Directories
/// of containers that are being deleted concurrently are skipped.
fn load_containers(root_path: &Path) -> Result<Vec<Container>> {
    let mut containers = Vec::new();
    for entry in fs::read_dir(root_path)? {
        let container_dir = entry?.path();
        if !container_dir.is_dir() || !State::file_path(&container_dir).exists() {
            continue;
        }

        match Container::load(container_dir.clone()) {
            Ok(container) => containers.push(container),
            Err(err) => tracing::warn!(?container_dir, ?err, "skipping unreadable container"),
        }
    }
    containers.sort_by(|a, b| a.id().cmp(b.id()));

    Ok(containers)
}

fn print_table(containers: &[Container]) -> Result<()> {
    let mut content = String::new();
    for info in containers.iter().map(ContainerInfo::from) {
        content.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            info.id,
            info.pid,
            info.status,
            info.bundle.display(),
            info.created,
            info.creator
        ));
    }

    let mut tab_writer = TabWriter::new(io::stdout());
    writeln!(&mut tab_writer, "ID\tPID\tSTATUS\tBUNDLE\tCREATED\tCREATOR")?;
    write!(&mut tab_writer, "{content}")?;
    tab_writer.flush()?;

    Ok(())
}
