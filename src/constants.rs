//! Canonical constants: schema version, on-disk paths, and the closed action vocabulary.

/// Canonical schema version written by this build. Legacy events default to `"0.3.0"`
/// at parse time (see [`crate::event::normalize_legacy_event`]) but never poison the
/// projection hash, which always reports the roadmap-level version below.
pub const SCHEMA_VERSION: &str = "0.4.0";
pub const ESAA_VERSION: &str = "0.4.x";

pub const ROADMAP_DIR: &str = ".roadmap";
pub const EVENT_STORE_PATH: &str = ".roadmap/activity.jsonl";
pub const ROADMAP_PATH: &str = ".roadmap/roadmap.json";
pub const ISSUES_PATH: &str = ".roadmap/issues.json";
pub const LESSONS_PATH: &str = ".roadmap/lessons.json";

pub const AGENT_RESULT_SCHEMA_PATH: &str = ".roadmap/agent_result.schema.json";
pub const AGENT_CONTRACT_PATH: &str = ".roadmap/AGENT_CONTRACT.yaml";

pub const INBOX_DIR: &str = ".roadmap/inbox";
pub const INBOX_DONE_DIR: &str = ".roadmap/inbox/done";
pub const INBOX_REJECTED_DIR: &str = ".roadmap/inbox/rejected";

pub const DEFAULT_PROJECT_NAME: &str = "esaa-core";

/// The closed set of event actions. Anything outside this set is `UNKNOWN_ACTION`,
/// both at store-parse time and during agent-output validation.
pub const CANONICAL_ACTIONS: &[&str] = &[
    "run.start",
    "run.end",
    "task.create",
    "claim",
    "complete",
    "review",
    "issue.report",
    "hotfix.create",
    "issue.resolve",
    "output.rejected",
    "orchestrator.file.write",
    "orchestrator.view.mutate",
    "verify.start",
    "verify.ok",
    "verify.fail",
];

pub fn is_canonical_action(action: &str) -> bool {
    CANONICAL_ACTIONS.contains(&action)
}
