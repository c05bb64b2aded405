//! Runs an extra process inside the namespaces of a running container
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;
use libcontainer::utils::parse_env;

use crate::commands::load_container;

/// Execute a process within an existing container
#[derive(Parser, Debug)]
pub struct Exec {
    /// Current working directory of the process, defaults to the one of the container
    #[clap(long)]
    pub cwd: Option<PathBuf>,
    /// Environment variables that should be set in the process, on top of the container's
    #[clap(short, long, value_parser = parse_key_val::<String, String>, number_of_values = 1)]
    pub env: Vec<(String, String)>,
    /// Identifier of the container
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
    /// Command that should be executed in the container
    #[clap(required = true, last = true)]
    pub command: Vec<String>,
}

fn parse_key_val<T, U>(s: &str) -> Result<(T, U), Box<dyn std::error::Error + Send + Sync + 'static>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: std::error::Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

/// Enters every namespace of the init process through nsenter and waits for
/// the command. Returns the exit code of the command.
pub fn exec(args: Exec, root_path: PathBuf) -> Result<i32> {
    let container = load_container(root_path, &args.container_id)?;
    if !container.can_exec() {
        bail!(
            "cannot exec in container {} with status {}",
            args.container_id,
            container.status()
        );
    }
    let pid = container
        .pid()
        .with_context(|| format!("container {} has no init process", args.container_id))?;

    let process = container.spec()?.process().as_ref();
    let mut envs = process
        .and_then(|process| process.env().as_deref())
        .map(parse_env)
        .unwrap_or_default();
    envs.extend(args.env);
    let cwd = args
        .cwd
        .or_else(|| process.map(|process| process.cwd().clone()))
        .unwrap_or_else(|| PathBuf::from("/"));

    let mut cmd = Command::new("nsenter");
    cmd.arg("--target")
        .arg(pid.to_string())
        .arg("--all")
        .arg(format!("--wd={}", cwd.display()))
        .arg("--")
        .args(&args.command)
        .env_clear()
        .envs(&envs);
    tracing::debug!(?cmd, "exec into container");

    let status = cmd
        .status()
        .with_context(|| format!("failed to run nsenter for container {}", args.container_id))?;

    Ok(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec_args() {
        let args = Exec::try_parse_from([
            "exec",
            "--env",
            "RUST_LOG=debug",
            "--cwd",
            "/srv",
            "sandbox",
            "--",
            "ls",
            "-l",
        ])
        .unwrap();
        assert_eq!(args.container_id, "sandbox");
        assert_eq!(args.command, vec!["ls", "-l"]);
        assert_eq!(args.env, vec![("RUST_LOG".to_owned(), "debug".to_owned())]);
        assert_eq!(args.cwd, Some(PathBuf::from("/srv")));
    }

    #[test]
    fn test_env_needs_a_value() {
        assert!(Exec::try_parse_from(["exec", "--env", "RUST_LOG", "sandbox", "--", "ls"]).is_err());
    }

    #[test]
    fn test_exec_in_missing_container() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let args = Exec::try_parse_from(["exec", "missing", "--", "true"])?;
        assert!(exec(args, tmp.path().to_path_buf()).is_err());
        Ok(())
    }
}
