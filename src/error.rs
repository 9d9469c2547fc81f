use std::{fmt, io, path::PathBuf};

/// Workflow stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Input,
    Backup,
    Merge,
    Validate,
    Install,
    Rollback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Input => "input",
            Stage::Backup => "backup",
            Stage::Merge => "merge",
            Stage::Validate => "validate",
            Stage::Install => "install",
            Stage::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Rejected secret inputs. Raised before any file is touched.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("bot token must not be empty")]
    EmptyToken,
    #[error("chat id must not be empty")]
    EmptyChatId,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("merged document is empty")]
    Empty,
    #[error("merged document is not valid YAML: {0}")]
    Malformed(String),
    #[error("merged document is not a mapping")]
    NotAMapping,
    #[error("WebhookTemplate is missing")]
    MissingTemplate,
    #[error("WebhookTemplate is not a string")]
    TemplateNotString,
    #[error("WebhookTemplate is not valid JSON: {0}")]
    TemplateMalformed(String),
    #[error("chat_id missing or empty in WebhookTemplate")]
    MissingChatId,
    #[error("chat_id in WebhookTemplate is {found:?}, expected {expected:?}")]
    ChatIdMismatch { expected: String, found: String },
}

/// Outcome of a failed update attempt, as reported to the operator.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),

    #[error("{stage} failed on {}: {source}", .path.display())]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("validation failed: {cause}")]
    Validation {
        cause: ValidationError,
        rolled_back: bool,
        /// Metadata the rollback could not carry over.
        warnings: Vec<String>,
    },

    #[error("validation failed ({cause}) and rollback from {} failed: {source}", .backup.display())]
    RollbackFailed {
        cause: ValidationError,
        backup: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UpdateError {
    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>, source: io::Error) -> Self {
        UpdateError::Io { stage, path: path.into(), source }
    }

    pub fn stage(&self) -> Stage {
        match self {
            UpdateError::Input(_) => Stage::Input,
            UpdateError::Io { stage, .. } => *stage,
            UpdateError::Validation { .. } => Stage::Validate,
            UpdateError::RollbackFailed { .. } => Stage::Rollback,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            UpdateError::Validation { warnings, .. } => warnings,
            _ => &[],
        }
    }

    /// Human-readable state of the live configuration after this failure.
    pub fn live_file_status(&self) -> &'static str {
        match self {
            UpdateError::Input(_) => "live configuration unchanged (nothing was written)",
            UpdateError::Io { stage: Stage::Install, .. } => {
                "live configuration unchanged (install is atomic)"
            }
            UpdateError::Io { .. } => "live configuration unchanged",
            UpdateError::Validation { rolled_back: true, .. } => {
                "live configuration rolled back from backup"
            }
            UpdateError::Validation { rolled_back: false, .. } => {
                "live configuration unchanged (no prior file to restore)"
            }
            UpdateError::RollbackFailed { .. } => {
                "live configuration may differ from the backup, restore it manually"
            }
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            UpdateError::Io { .. } => 1,
            UpdateError::Validation { .. } => 2,
            UpdateError::Input(_) => 3,
            UpdateError::RollbackFailed { .. } => 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} restart {service} exited with {status}: {stderr}")]
    Failed {
        program: String,
        service: String,
        status: String,
        stderr: String,
    },
    #[error("{program} restart {service} timed out after {secs}s")]
    Timeout {
        program: String,
        service: String,
        secs: u64,
    },
}
