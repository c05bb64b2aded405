use std::io;

use anyhow::Result;
use clap::{Command, Parser};
use clap_complete::{generate, Shell};

/// Generate scripts for shell completion
#[derive(Debug, Parser)]
pub struct Completion {
    /// Shell to generate the completion script for
    #[clap(value_enum)]
    pub shell: Shell,
}

pub fn completion(args: Completion, app: &mut Command) -> Result<()> {
    let name = app.get_name().to_string();
    generate(args.shell, app, name, &mut io::stdout());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_is_positional() {
        let args = Completion::try_parse_from(["completion", "bash"]).unwrap();
        assert_eq!(args.shell, Shell::Bash);
        assert!(Completion::try_parse_from(["completion", "cmd"]).is_err());
    }
}
