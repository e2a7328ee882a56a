//! Unified error handling with fix suggestions for the orchestrator core.
//!
//! Every domain failure carries a stable `code` (see [`OrchestratorError::code`]) the
//! way the original Python `ESAAError(code, message)` pair does, plus a human fix
//! suggestion through the [`FixSuggestion`] trait so the CLI can print actionable
//! remediation next to the error.

use thiserror::Error;

/// Trait for errors that can provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Top-level error type for the orchestrator core.
///
/// `Corrupted` is intentionally its own variant (not folded into the generic
/// validation/workflow cases): it is the only class that `verify` maps to
/// `verify_status = "corrupted"` rather than treating as a normal domain error.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{message}")]
    Workflow { code: &'static str, message: String },

    #[error("{message}")]
    Environment { code: &'static str, message: String },

    #[error("{message}")]
    Corrupted { code: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

macro_rules! domain_error_ctor {
    ($name:ident, $variant:ident) => {
        pub fn $name(code: &'static str, message: impl Into<String>) -> Self {
            OrchestratorError::$variant {
                code,
                message: message.into(),
            }
        }
    };
}

impl OrchestratorError {
    domain_error_ctor!(validation, Validation);
    domain_error_ctor!(workflow, Workflow);
    domain_error_ctor!(environment, Environment);
    domain_error_ctor!(corrupted, Corrupted);

    /// Stable machine-readable error code, e.g. `SCHEMA_INVALID`, `TASK_NOT_FOUND`.
    /// I/O and parse errors surface a generic code since they carry no domain code
    /// of their own.
    pub fn code(&self) -> &str {
        match self {
            OrchestratorError::Validation { code, .. }
            | OrchestratorError::Workflow { code, .. }
            | OrchestratorError::Environment { code, .. }
            | OrchestratorError::Corrupted { code, .. } => code,
            OrchestratorError::Io(_) => "IO_ERROR",
            OrchestratorError::Json(_) => "JSON_INVALID",
            OrchestratorError::Yaml(_) => "YAML_INVALID",
        }
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(self, OrchestratorError::Corrupted { .. })
    }
}

impl FixSuggestion for OrchestratorError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self.code() {
            "SCHEMA_INVALID" => "Check the agent output against agent_result.schema.json",
            "UNKNOWN_ACTION" => "Use an action from the canonical action set in AGENT_CONTRACT.yaml",
            "WORKFLOW_GATE" => "Add the required verification checks before completing this task",
            "BOUNDARY_VIOLATION" => "Write only inside the allowed paths for this task's kind",
            "NOT_LOCK_OWNER" => "Only the actor that claimed the task may complete or review it",
            "IMMUTABLE_DONE" => "Tasks in status done cannot be reopened; file a new hotfix task instead",
            "LOCKED_TASK" => "Task is already claimed by another actor",
            "INVALID_TRANSITION" => "Check the task's current status before issuing this action",
            "TASK_NOT_FOUND" => "Verify the task_id exists in the current roadmap",
            "DUPLICATE_TASK" => "Choose a task_id that does not already exist",
            "ISSUE_NOT_FOUND" => "Verify the issue_id was previously reported",
            "INIT_BLOCKED" => "Pass --force to reinitialize an event store that already has events",
            "INVALID_ARGUMENT" => "Check the command's argument values",
            "UNKNOWN_COMMAND" => "Run with --help to see the available commands",
            "JSONL_INVALID" | "EVENT_SEQ_INVALID" | "EVENT_SEQ_NON_MONOTONIC"
            | "EVENT_ID_DUPLICATE" | "EVENT_MISSING_FIELDS" => {
                "The event store is corrupted; restore from backup or replay a known-good prefix"
            }
            _ => return None,
        })
    }
}

pub fn print_error<E: std::error::Error + FixSuggestion>(error: &E) {
    eprintln!("Error: {}", error);
    if let Some(suggestion) = error.fix_suggestion() {
        eprintln!("  Fix: {}", suggestion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_carries_code_and_message() {
        let err = OrchestratorError::validation("SCHEMA_INVALID", "bad shape");
        assert_eq!(err.code(), "SCHEMA_INVALID");
        assert_eq!(err.to_string(), "bad shape");
        assert!(!err.is_corrupted());
    }

    #[test]
    fn corrupted_error_is_distinguishable() {
        let err = OrchestratorError::corrupted("JSONL_INVALID", "bad json");
        assert!(err.is_corrupted());
    }

    #[test]
    fn known_codes_have_fix_suggestions() {
        let codes = [
            "SCHEMA_INVALID",
            "UNKNOWN_ACTION",
            "WORKFLOW_GATE",
            "BOUNDARY_VIOLATION",
            "NOT_LOCK_OWNER",
            "IMMUTABLE_DONE",
            "TASK_NOT_FOUND",
        ];
        for code in codes {
            let err = OrchestratorError::validation(code, "msg");
            assert!(err.fix_suggestion().is_some(), "missing suggestion for {code}");
        }
    }

    #[test]
    fn io_error_wraps_with_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: OrchestratorError = io.into();
        assert_eq!(err.code(), "IO_ERROR");
    }
}
