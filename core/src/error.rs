use thiserror::Error;

/// Errors surfaced by dispatch and plugin loading.
///
/// Callers receive these inside an `anyhow::Error`; use
/// `err.downcast_ref::<StegaError>()` to branch on the kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StegaError {
    #[error("Missing required flag: --{0}")]
    MissingFlag(String),
    #[error("Invalid value for flag --{flag}: {reason}")]
    InvalidFlagValue { flag: String, reason: String },
    #[error("Command \"{0}\" not found.")]
    CommandNotFound(String),
    #[error("Subcommand \"{0}\" not found.")]
    SubcommandNotFound(String),
    #[error("Command nesting exceeds {0} levels")]
    NestingTooDeep(usize),
    #[error("Failed to load plugin \"{plugin}\": {message}")]
    Validation { plugin: String, message: String },
}

impl StegaError {
    /// Whether the error came from turning argv into a command invocation.
    pub fn is_dispatch_error(&self) -> bool {
        !matches!(self, StegaError::Validation { .. })
    }
}
