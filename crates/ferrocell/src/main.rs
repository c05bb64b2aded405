//! # ferrocell
//! A minimal OCI container runtime. It is meant to be driven by a
//! higher level runtime, which passes container ids, bundles and flags.
#![allow(non_snake_case)]
mod commands;
mod observability;
mod rootpath;

use std::path::PathBuf;

use anyhow::Result;
use clap::{crate_version, CommandFactory, Parser};

use crate::commands::{
    completion, create, delete, exec, init, kill, list, run, start, state,
};

/// Global options, the same for every subcommand
#[derive(Parser, Debug)]
pub struct GlobalOpts {
    /// root directory to store container state
    #[clap(short, long)]
    pub root: Option<PathBuf>,
    /// set the log file to write ferrocell logs to (default is '/dev/stderr')
    #[clap(short, long, global = true)]
    pub log: Option<PathBuf>,
    /// change log format to json (default is 'text')
    #[clap(long, global = true)]
    pub log_format: Option<String>,
    /// set the log level (default is 'error')
    #[clap(long, global = true)]
    pub log_level: Option<String>,
    /// enable debug logging
    #[clap(long, global = true)]
    pub debug: bool,
    /// use systemd style cgroup paths (slice:prefix:name)
    #[clap(long)]
    pub systemd_cgroup: bool,
    /// enable logging to systemd-journald
    #[clap(long, global = true)]
    pub systemd_log: bool,
}

impl GlobalOpts {
    /// Flags the init process is re-executed with, so it logs to the same
    /// place. The init process runs from inside the rootfs, so the log file
    /// has to be absolute.
    fn init_args(&self) -> Result<Vec<String>> {
        let mut args = Vec::new();
        if let Some(log) = &self.log {
            let log = if log.is_absolute() {
                log.clone()
            } else {
                std::env::current_dir()?.join(log)
            };
            args.push("--log".to_owned());
            args.push(log.to_string_lossy().to_string());
        }
        if let Some(format) = &self.log_format {
            args.push("--log-format".to_owned());
            args.push(format.clone());
        }
        if let Some(level) = &self.log_level {
            args.push("--log-level".to_owned());
            args.push(level.clone());
        }
        if self.debug {
            args.push("--debug".to_owned());
        }
        if self.systemd_log {
            args.push("--systemd-log".to_owned());
        }
        Ok(args)
    }
}

// High-level commandline option definition
// This takes global options as well as individual commands as specified in [OCI runtime-spec](https://github.com/opencontainers/runtime-spec/blob/master/runtime.md)
#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    Create(create::Create),
    Start(start::Start),
    Run(run::Run),
    Kill(kill::Kill),
    Delete(delete::Delete),
    State(state::State),
    List(list::List),
    Exec(exec::Exec),
    Completion(completion::Completion),
    /// Runs inside a new container, started by ferrocell itself
    #[clap(hide = true)]
    Init,
}

/// This is the entry point in the container runtime. The binary is run by a high-level container runtime,
/// with various flags passed. This parses the flags, creates and manages appropriate resources.
fn main() -> Result<()> {
    let opts = Opts::parse();
    let mut app = Opts::command();

    observability::init(&opts).map_err(|err| {
        eprintln!("failed to initialize observability: {}", err);
        err
    })?;

    tracing::debug!("started by user {} with {:?}", nix::unistd::geteuid(), std::env::args_os());

    // the init process has everything it needs on its sync pipe
    if let SubCommand::Init = opts.subcmd {
        return init::init();
    }

    // root: /run/ferrocell, otherwise $XDG_RUNTIME_DIR/ferrocell
    let rootPath = rootpath::determine(opts.global.root.clone())?;
    let systemd_cgroup = opts.global.systemd_cgroup;

    let cmd_result = match opts.subcmd {
        SubCommand::Create(args) => {
            create::create(args, rootPath, systemd_cgroup, opts.global.init_args()?)
        }
        SubCommand::Start(args) => start::start(args, rootPath),
        SubCommand::Run(args) => {
            match run::run(args, rootPath, systemd_cgroup, opts.global.init_args()?) {
                Ok(exit_code) => std::process::exit(exit_code),
                Err(e) => {
                    tracing::error!("error in executing command: {:?}", e);
                    eprintln!("run failed : {e:?}");
                    std::process::exit(-1);
                }
            }
        }
        SubCommand::Kill(args) => kill::kill(args, rootPath),
        SubCommand::Delete(args) => delete::delete(args, rootPath),
        SubCommand::State(args) => state::state(args, rootPath),
        SubCommand::List(args) => list::list(args, rootPath),
        SubCommand::Exec(args) => match exec::exec(args, rootPath) {
            Ok(exit_code) => std::process::exit(exit_code),
            Err(e) => {
                tracing::error!("error in executing command: {:?}", e);
                eprintln!("exec failed : {e:?}");
                std::process::exit(-1);
            }
        },
        SubCommand::Completion(args) => completion::completion(args, &mut app),
        SubCommand::Init => init::init(),
    };

    if let Err(ref e) = cmd_result {
        tracing::error!("error in executing command: {:?}", e);
        eprintln!("error in executing command: {:?}", e);
    }

    cmd_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Opts::command().debug_assert();
    }

    #[test]
    fn test_init_args_forward_logging_flags() -> Result<()> {
        let opts = Opts::try_parse_from([
            "ferrocell",
            "--log",
            "/var/log/ferrocell.log",
            "--log-format",
            "json",
            "--debug",
            "--systemd-cgroup",
            "create",
            "--bundle",
            "/bundle",
            "sandbox",
        ])?;

        assert_eq!(
            opts.global.init_args()?,
            vec![
                "--log",
                "/var/log/ferrocell.log",
                "--log-format",
                "json",
                "--debug"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_init_args_make_log_absolute() -> Result<()> {
        let opts = Opts::try_parse_from(["ferrocell", "--log", "ferrocell.log", "init"])?;
        let args = opts.global.init_args()?;
        assert!(PathBuf::from(&args[1]).is_absolute());
        Ok(())
    }
}
