use std::convert::Infallible;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use nix::unistd;
use oci_spec::runtime::Spec;

use super::{Executor, ExecutorError, ExecutorValidationError, EMPTY};

#[derive(Clone)]
pub struct DefaultExecutor {}

impl Executor for DefaultExecutor {
    fn exec(&self, spec: &Spec) -> Result<Infallible, ExecutorError> {
        tracing::debug!("executing workload with default handler");
        let process = spec.process().as_ref().ok_or(ExecutorError::InvalidArg)?;
        let args = process
            .args()
            .as_ref()
            .filter(|args| !args.is_empty())
            .ok_or_else(|| {
                tracing::error!("no arguments provided to execute");
                ExecutorError::InvalidArg
            })?;
        let envs = process.env().as_ref().unwrap_or(&EMPTY);

        let executable = resolve_executable(&args[0], envs).map_err(|err| {
            tracing::error!(?err, executable = ?args[0], "failed to resolve executable");
            ExecutorError::Other(err.to_string())
        })?;

        let path = to_cstring(&executable.to_string_lossy())?;
        let argv = args
            .iter()
            .map(|a| to_cstring(a))
            .collect::<Result<Vec<_>, _>>()?;
        let envp = envs
            .iter()
            .map(|e| to_cstring(e))
            .collect::<Result<Vec<_>, _>>()?;

        // only comes back if the image could not be replaced
        let err = match unistd::execve(&path, &argv, &envp) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        tracing::error!(?err, filename = ?path, args = ?argv, "failed to execve");
        Err(ExecutorError::Execution {
            command: executable.to_string_lossy().to_string(),
            source: err,
        })
    }

    fn validate(&self, spec: &Spec) -> Result<(), ExecutorValidationError> {
        let proc = spec
            .process()
            .as_ref()
            .ok_or(ExecutorValidationError::ArgValidationError(
                "spec did not contain process".into(),
            ))?;

        match proc.args().as_ref().and_then(|args| args.first()) {
            Some(executable) if !executable.is_empty() => Ok(()),
            _ => Err(ExecutorValidationError::ArgValidationError(
                "process args must not be empty".into(),
            )),
        }
    }
}

pub fn get_executor() -> Box<dyn Executor> {
    Box::new(DefaultExecutor {})
}

fn to_cstring(value: &str) -> Result<CString, ExecutorError> {
    CString::new(value.as_bytes()).map_err(|err| {
        tracing::error!("failed to convert {value:?} to cstring: {}", err);
        ExecutorError::InvalidArg
    })
}

/// Finds `name` the way a shell would: as is if it contains a slash,
/// otherwise in the PATH of the workload environment.
pub fn resolve_executable(
    name: &str,
    envs: &[String],
) -> Result<PathBuf, ExecutorValidationError> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return check_executable(name, path);
    }

    let path_var = envs
        .iter()
        .find_map(|e| e.strip_prefix("PATH="))
        .ok_or_else(|| {
            tracing::error!("PATH environment variable is not set");
            ExecutorValidationError::ArgValidationError(format!(
                "executable '{name}' not found: PATH is not set"
            ))
        })?;

    let path = get_executable_path(name, path_var).ok_or_else(|| {
        tracing::error!(executable = ?name, "executable for container process not found in PATH");
        ExecutorValidationError::ArgValidationError(format!("executable '{name}' not found in $PATH"))
    })?;
    check_executable(name, path)
}

fn check_executable(name: &str, path: PathBuf) -> Result<PathBuf, ExecutorValidationError> {
    match is_executable(&path) {
        Ok(true) => {
            tracing::debug!(executable = ?path, "found executable in executor");
            Ok(path)
        }
        Ok(false) => Err(ExecutorValidationError::ArgValidationError(format!(
            "executable '{name}' at path '{path:?}' does not have correct permissions"
        ))),
        Err(err) => Err(ExecutorValidationError::ArgValidationError(format!(
            "failed to check permissions for executable '{name}' at path '{path:?}' : {err}"
        ))),
    }
}

fn get_executable_path(name: &str, path_var: &str) -> Option<PathBuf> {
    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| PathBuf::from(dir).join(name))
        .find(|candidate| candidate.is_file())
}

fn is_executable(path: &Path) -> std::result::Result<bool, std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = path.metadata()?;
    let permissions = metadata.permissions();
    // directories carry the execute bit too
    Ok(metadata.is_file() && permissions.mode() & 0o111 != 0)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Result;
    use oci_spec::runtime::{ProcessBuilder, SpecBuilder};

    use super::*;

    fn write_script(dir: &Path, name: &str, mode: u32) -> Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;
        Ok(path)
    }

    #[test]
    fn test_resolve_executable_in_path() -> Result<()> {
        let first = tempfile::tempdir()?;
        let second = tempfile::tempdir()?;
        let expected = write_script(second.path(), "hello", 0o755)?;
        let envs = vec![format!(
            "PATH={}:{}",
            first.path().display(),
            second.path().display()
        )];

        assert_eq!(resolve_executable("hello", &envs)?, expected);
        Ok(())
    }

    #[test]
    fn test_resolve_executable_with_slash_ignores_path() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let script = write_script(tmp.path(), "run.sh", 0o700)?;
        let name = script.to_string_lossy().to_string();

        assert_eq!(resolve_executable(&name, &[])?, script);
        Ok(())
    }

    #[test]
    fn test_resolve_executable_failures() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        write_script(tmp.path(), "noexec", 0o644)?;
        let envs = vec![format!("PATH={}", tmp.path().display())];

        assert!(resolve_executable("missing", &envs).is_err());
        assert!(resolve_executable("noexec", &envs).is_err());
        assert!(resolve_executable("noexec", &[]).is_err());
        Ok(())
    }

    #[test]
    fn test_validate_requires_args() -> Result<()> {
        let executor = DefaultExecutor {};
        let mut process = ProcessBuilder::default().args(Vec::<String>::new()).build()?;
        let spec = SpecBuilder::default().process(process.clone()).build()?;
        assert!(executor.validate(&spec).is_err());

        process.set_args(Some(vec!["/bin/true".to_string()]));
        let spec = SpecBuilder::default().process(process).build()?;
        assert!(executor.validate(&spec).is_ok());
        Ok(())
    }
}
