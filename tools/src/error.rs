//! Pipeline error taxonomy
//!
//! Every failure a run can hit is one of these variants. None of them
//! escape the orchestrator: `executor` folds them into a failed `ToolResult`.

use std::fmt;
use std::time::Duration;

use crate::registry::Operation;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Non-empty list of validation issues for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationIssue>);

impl ValidationErrors {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", joined.join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("permission denied: {operation} requires '{permission}'")]
    PermissionDenied {
        operation: Operation,
        permission: &'static str,
    },

    #[error("invalid input: {0}")]
    Validation(ValidationErrors),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("{operation} is unavailable: required binary '{binary}' not found on this host")]
    ToolUnavailable {
        operation: Operation,
        binary: String,
    },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    ExecutionTimeout {
        operation: Operation,
        after: Duration,
    },

    #[error("{operation} failed: {message}")]
    ExecutionFailure {
        operation: Operation,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("could not parse {operation} output: {reason}")]
    Parse {
        operation: Operation,
        reason: String,
    },

    #[error("{operation} result failed sanity checks: {}", .errors.join("; "))]
    SanityCheck {
        operation: Operation,
        errors: Vec<String>,
    },
}

impl PipelineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors(vec![ValidationIssue::new(field, message)]))
    }

    pub fn parse(operation: Operation, reason: impl Into<String>) -> Self {
        Self::Parse {
            operation,
            reason: reason.into(),
        }
    }

    pub fn failure(operation: Operation, message: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            operation,
            exit_code: None,
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used in audit events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Validation(_) => "validation",
            Self::UnsupportedPlatform(_) => "unsupported_platform",
            Self::ToolUnavailable { .. } => "tool_unavailable",
            Self::ExecutionTimeout { .. } => "timeout",
            Self::ExecutionFailure { .. } => "execution_failure",
            Self::Parse { .. } => "parse",
            Self::SanityCheck { .. } => "sanity_check",
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
