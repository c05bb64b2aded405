use std::convert::Infallible;

use oci_spec::runtime::Spec;

pub mod default;

pub static EMPTY: Vec<String> = Vec::new();

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid argument")]
    InvalidArg,
    #[error("failed to execute workload {command:?}")]
    Execution { command: String, source: nix::Error },
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorValidationError {
    #[error("invalid argument: {0}")]
    ArgValidationError(String),
}

/// Replaces the init process with the container workload. Runs as the very
/// last step of init, inside the new root.
pub trait Executor: Send + Sync {
    /// Only returns if the workload could not be started.
    fn exec(&self, spec: &Spec) -> Result<Infallible, ExecutorError>;

    /// Checks the workload can be started before the point of no return.
    fn validate(&self, spec: &Spec) -> Result<(), ExecutorValidationError>;
}
