//! Error types for environment lifecycle operations

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::render::TemplateKind;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors surfaced by the lifecycle workflows and their components
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Environment name does not match `^[a-z0-9-]+$`
    #[error("invalid environment name '{name}': {reason}")]
    Validation { name: String, reason: String },

    /// A local artifact required before touching the control plane is missing
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// External command exited non-zero
    #[error("`{command}` failed ({}): {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// External command exceeded its deadline and was killed
    #[error("`{command}` timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// External program could not be started at all
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Inventory listing or status retrieval failed
    #[error("node discovery failed while {stage}: {source}")]
    Discovery {
        stage: &'static str,
        #[source]
        source: Box<LifecycleError>,
    },

    /// Machine status payload could not be parsed
    #[error("malformed status for machine {machine_id}: {source}")]
    MalformedMachineStatus {
        machine_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Hostname matched zero or several role tokens under the reject policy
    #[error("machine {machine_id} ({hostname}) has an ambiguous role")]
    AmbiguousMachine { machine_id: String, hostname: String },

    /// Template execution failed
    #[error("failed to render {template} template: {source}")]
    Render {
        template: TemplateKind,
        #[source]
        source: minijinja::Error,
    },

    /// Readiness poll expired and strict readiness is enabled
    #[error("{what} not ready after {waited:?}")]
    ReadinessTimeout { what: &'static str, waited: Duration },

    /// Some per-resource deletions failed; every resource was still attempted
    #[error(
        "delete of {environment} finished with {} failed step(s): {}",
        .failures.len(),
        summarize(.failures)
    )]
    PartialDelete {
        environment: String,
        failures: Vec<DeleteFailure>,
    },

    /// Suffix length must be even and at least 2
    #[error("suffix length must be an even number >= 2, got {0}")]
    InvalidSuffixLength(usize),

    /// OS random source failed
    #[error("random source unavailable: {0}")]
    RandomSource(String),

    /// Local file operation failed
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        LifecycleError::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        LifecycleError::Precondition {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LifecycleError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn discovery(stage: &'static str, source: LifecycleError) -> Self {
        LifecycleError::Discovery {
            stage,
            source: Box::new(source),
        }
    }

    /// True when a failed command reported that its target does not exist.
    ///
    /// The workflows never treat this as success on their own; callers may use
    /// it to word messages for repeated deletes.
    pub fn is_not_found(&self) -> bool {
        match self {
            LifecycleError::CommandFailed { stderr, .. } => {
                let lower = stderr.to_lowercase();
                lower.contains("not found") || lower.contains("notfound")
            }
            LifecycleError::Discovery { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// One failed step of a delete workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Resource the step targeted (machine id or claim name)
    pub target: String,
    /// Rendered error message
    pub error: String,
}

impl fmt::Display for DeleteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn summarize(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
