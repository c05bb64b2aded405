//! Contains functionality of kill container command
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::Parser;
use nix::sys::signal::Signal;

use crate::commands::load_container;

/// Send the specified signal to the container
#[derive(Parser, Debug)]
pub struct Kill {
    #[clap(value_parser = clap::builder::NonEmptyStringValueParser::new(), required = true)]
    pub container_id: String,
    /// Signal name (TERM, SIGTERM) or number, defaults to SIGTERM
    #[clap(default_value = "SIGTERM")]
    pub signal: String,
}

pub fn kill(args: Kill, root_path: PathBuf) -> Result<()> {
    let mut container = load_container(root_path, &args.container_id)?;
    let signal = parse_signal(&args.signal)?;
    container.kill(signal)?;
    Ok(())
}

/// Accepts `SIGKILL`, `KILL`, `kill` and `9` alike
fn parse_signal(signal: &str) -> Result<Signal> {
    if let Ok(number) = signal.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| anyhow!("{signal} is not a valid signal"));
    }

    let mut name = signal.to_ascii_uppercase();
    if !name.starts_with("SIG") {
        name.insert_str(0, "SIG");
    }

    Signal::from_str(&name).map_err(|_| anyhow!("{signal} is not a valid signal"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!(parse_signal("SIGKILL").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("KILL").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("term").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("SigHup").unwrap(), Signal::SIGHUP);
    }

    #[test]
    fn test_parse_signal_numbers() {
        assert_eq!(parse_signal("9").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal("15").unwrap(), Signal::SIGTERM);
        assert!(parse_signal("0").is_err());
        assert!(parse_signal("-1").is_err());
    }

    #[test]
    fn test_parse_signal_invalid() {
        assert!(parse_signal("SIGFOO").is_err());
        assert!(parse_signal("").is_err());
    }

    #[test]
    fn test_signal_defaults_to_term() {
        let args = Kill::try_parse_from(["kill", "sandbox"]).unwrap();
        assert_eq!(args.signal, "SIGTERM");
    }
}
